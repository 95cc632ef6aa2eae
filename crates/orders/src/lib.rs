//! Order aggregate store: persisted order records with lifecycle state.
//!
//! An order is created in `PendingPayment` and moves exactly once into one of
//! the terminal states `Paid`, `Cancelled`, or `Expired`. The terminal
//! transition is an optimistic compare-and-set on the stored state, which is
//! what keeps the payment reconciler and the expiry sweeper from both
//! finalizing the same order.

mod error;
mod memory;
mod order;
mod postgres;
mod state;
mod store;

pub use error::{OrderStoreError, Result};
pub use memory::InMemoryOrderStore;
pub use order::{LineItem, Order};
pub use postgres::PostgresOrderStore;
pub use state::OrderState;
pub use store::OrderStore;
