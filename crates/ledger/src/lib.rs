//! Inventory ledger: authoritative per-SKU stock counters with reservation holds.
//!
//! The ledger exposes three mutations. `reserve` atomically converts available
//! stock into an expiring [`Hold`]; `commit` consumes a hold's reserved
//! quantity permanently; `release` returns it to available stock. Commit and
//! release are idempotent so that retried payment callbacks and concurrent
//! sweeps never double-adjust the counters.

mod error;
mod hold;
mod memory;
mod postgres;
mod stock;
mod store;

pub use error::{LedgerError, Result};
pub use hold::{Hold, HoldState};
pub use memory::InMemoryStockStore;
pub use postgres::PostgresStockStore;
pub use stock::StockRecord;
pub use store::StockStore;
