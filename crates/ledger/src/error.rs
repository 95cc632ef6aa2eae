use common::{HoldId, SkuId};
use thiserror::Error;

use crate::hold::HoldState;

/// Errors that can occur when interacting with the inventory ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Not enough available stock to satisfy a reservation.
    #[error("insufficient stock for {sku}: requested {requested}, available {available}")]
    InsufficientStock {
        sku: SkuId,
        requested: u32,
        available: u32,
    },

    /// The referenced hold does not exist.
    #[error("hold not found: {0}")]
    HoldNotFound(HoldId),

    /// The hold is already in the opposite terminal state.
    #[error("hold {hold_id} already finalized as {state}")]
    AlreadyFinalized { hold_id: HoldId, state: HoldState },

    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

impl LedgerError {
    /// Returns true for transient storage failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, LedgerError::Database(_))
    }
}

/// Result type for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
