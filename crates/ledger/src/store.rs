//! The `StockStore` trait: the ledger's persistence seam.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{HoldId, OrderId, SkuId};

use crate::{Hold, Result, StockRecord};

/// Persistence interface for stock counters and reservation holds.
///
/// Implementations must make `reserve` atomic with respect to concurrent
/// reservations on the same SKU: the availability check and the counter
/// mutation form one indivisible unit. Contention is scoped per SKU; unrelated
/// SKUs never block each other beyond the store's own write path.
#[async_trait]
pub trait StockStore: Send + Sync {
    /// Sets the available quantity for a SKU, creating the record if needed.
    ///
    /// Used for seeding and restocking; does not touch `reserved`.
    async fn put_stock(&self, sku: SkuId, available: u32) -> Result<()>;

    /// Returns the stock record for a SKU, if one exists.
    async fn stock(&self, sku: &SkuId) -> Result<Option<StockRecord>>;

    /// Atomically reserves `quantity` units of `sku` for `order_id`.
    ///
    /// On success `available` decreases and `reserved` increases by
    /// `quantity`, and a new active hold expiring `ttl` from now is recorded.
    /// Fails with [`LedgerError::InsufficientStock`] when not enough stock is
    /// available (an unknown SKU counts as zero available).
    ///
    /// [`LedgerError::InsufficientStock`]: crate::LedgerError::InsufficientStock
    async fn reserve(
        &self,
        sku: &SkuId,
        quantity: u32,
        order_id: OrderId,
        ttl: Duration,
    ) -> Result<Hold>;

    /// Permanently consumes a hold's reserved quantity (`reserved -= qty`).
    ///
    /// Idempotent: committing an already-committed hold is an Ok no-op.
    /// Committing a released hold fails with `AlreadyFinalized`.
    async fn commit(&self, hold_id: HoldId) -> Result<()>;

    /// Returns a hold's reserved quantity to available stock.
    ///
    /// Idempotent: releasing an already-released hold is an Ok no-op.
    /// Releasing a committed hold fails with `AlreadyFinalized`.
    async fn release(&self, hold_id: HoldId) -> Result<()>;

    /// Returns a hold by ID, if it exists.
    async fn hold(&self, hold_id: HoldId) -> Result<Option<Hold>>;

    /// Returns all holds belonging to an order.
    async fn holds_for_order(&self, order_id: OrderId) -> Result<Vec<Hold>>;

    /// Returns all active holds whose expiry has passed as of `as_of`.
    async fn expired_holds(&self, as_of: DateTime<Utc>) -> Result<Vec<Hold>>;
}
