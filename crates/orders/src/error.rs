use common::OrderId;
use thiserror::Error;

use crate::OrderState;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum OrderStoreError {
    /// The referenced order does not exist.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// An order with this ID already exists.
    #[error("order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// A state transition lost the compare-and-set race: the stored state no
    /// longer matches the expected pre-state.
    #[error("order {order_id} already finalized as {actual}")]
    AlreadyFinalized { order_id: OrderId, actual: OrderState },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl OrderStoreError {
    /// Returns true for transient storage failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, OrderStoreError::Database(_))
    }
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, OrderStoreError>;
