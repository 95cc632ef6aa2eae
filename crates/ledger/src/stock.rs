//! Per-SKU stock counters.

use common::SkuId;
use serde::{Deserialize, Serialize};

/// Authoritative stock counters for one SKU.
///
/// Invariant: `available` and `reserved` never go negative, and their sum
/// never exceeds the total stock ever put on the shelf minus what has been
/// committed (sold).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    /// The SKU these counters belong to.
    pub sku: SkuId,

    /// Quantity free to reserve.
    pub available: u32,

    /// Quantity claimed by active holds.
    pub reserved: u32,
}

impl StockRecord {
    /// Creates a record with everything available and nothing reserved.
    pub fn new(sku: SkuId, available: u32) -> Self {
        Self {
            sku,
            available,
            reserved: 0,
        }
    }

    /// Returns the total uncommitted quantity (available + reserved).
    pub fn on_hand(&self) -> u32 {
        self.available + self.reserved
    }
}
