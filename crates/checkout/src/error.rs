use common::{OrderId, SkuId};
use ledger::LedgerError;
use orders::{OrderState, OrderStoreError};
use thiserror::Error;

/// Errors surfaced by checkout, payment reconciliation, and sweeping.
#[derive(Debug, Error)]
pub enum CheckoutError {
    /// One or more SKUs did not have enough available stock.
    ///
    /// User-correctable; lists every offending SKU so the client can adjust
    /// the cart in one round trip.
    #[error("insufficient stock for {skus:?}")]
    InsufficientStock { skus: Vec<SkuId> },

    /// The checkout request had no purchasable line items.
    #[error("checkout request contains no items")]
    EmptyCheckout,

    /// The referenced order does not exist.
    #[error("order not found: {0}")]
    OrderNotFound(OrderId),

    /// The order already reached a contradictory terminal state.
    #[error("order {order_id} already finalized as {state}")]
    AlreadyFinalized { order_id: OrderId, state: OrderState },

    /// The callback signature did not verify.
    #[error("payment callback signature verification failed")]
    InvalidSignature,

    /// An error from the inventory ledger.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// An error from the order store.
    #[error(transparent)]
    Orders(#[from] OrderStoreError),
}

impl CheckoutError {
    /// Returns true for transient storage failures worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            CheckoutError::Ledger(e) => e.is_transient(),
            CheckoutError::Orders(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for checkout operations.
pub type Result<T> = std::result::Result<T, CheckoutError>;
