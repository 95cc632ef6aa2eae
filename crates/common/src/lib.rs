//! Shared value types used across the ledger, order store, and checkout crates.

mod types;

pub use types::{CustomerId, HoldId, Money, OrderId, SkuId};
