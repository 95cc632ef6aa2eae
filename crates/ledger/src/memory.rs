use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::{HoldId, OrderId, SkuId};
use tokio::sync::RwLock;

use crate::{Hold, HoldState, LedgerError, Result, StockRecord, StockStore};

#[derive(Debug, Default)]
struct LedgerState {
    stock: HashMap<SkuId, StockRecord>,
    holds: HashMap<HoldId, Hold>,
}

/// In-memory stock store for testing and single-process deployments.
///
/// A single write lock over the ledger state makes every mutation atomic;
/// per-SKU linearizability follows trivially. The PostgreSQL implementation
/// provides the same semantics via conditional updates.
#[derive(Clone, Default)]
pub struct InMemoryStockStore {
    state: Arc<RwLock<LedgerState>>,
}

impl InMemoryStockStore {
    /// Creates a new empty in-memory stock store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of holds in the given state.
    pub async fn hold_count(&self, state: HoldState) -> usize {
        self.state
            .read()
            .await
            .holds
            .values()
            .filter(|h| h.state == state)
            .count()
    }
}

#[async_trait]
impl StockStore for InMemoryStockStore {
    async fn put_stock(&self, sku: SkuId, available: u32) -> Result<()> {
        let mut state = self.state.write().await;
        state
            .stock
            .entry(sku.clone())
            .and_modify(|r| r.available = available)
            .or_insert_with(|| StockRecord::new(sku, available));
        Ok(())
    }

    async fn stock(&self, sku: &SkuId) -> Result<Option<StockRecord>> {
        Ok(self.state.read().await.stock.get(sku).cloned())
    }

    async fn reserve(
        &self,
        sku: &SkuId,
        quantity: u32,
        order_id: OrderId,
        ttl: Duration,
    ) -> Result<Hold> {
        let mut state = self.state.write().await;

        let Some(record) = state.stock.get_mut(sku) else {
            return Err(LedgerError::InsufficientStock {
                sku: sku.clone(),
                requested: quantity,
                available: 0,
            });
        };
        if record.available < quantity {
            return Err(LedgerError::InsufficientStock {
                sku: sku.clone(),
                requested: quantity,
                available: record.available,
            });
        }
        record.available -= quantity;
        record.reserved += quantity;

        let hold = Hold::new(sku.clone(), quantity, order_id, Utc::now(), ttl);
        state.holds.insert(hold.id, hold.clone());
        Ok(hold)
    }

    async fn commit(&self, hold_id: HoldId) -> Result<()> {
        let mut state = self.state.write().await;

        let (sku, quantity) = {
            let hold = state
                .holds
                .get_mut(&hold_id)
                .ok_or(LedgerError::HoldNotFound(hold_id))?;

            match hold.state {
                HoldState::Committed => return Ok(()),
                HoldState::Released => {
                    return Err(LedgerError::AlreadyFinalized {
                        hold_id,
                        state: HoldState::Released,
                    });
                }
                HoldState::Active => {
                    hold.state = HoldState::Committed;
                    (hold.sku.clone(), hold.quantity)
                }
            }
        };

        if let Some(record) = state.stock.get_mut(&sku) {
            record.reserved -= quantity;
        }
        Ok(())
    }

    async fn release(&self, hold_id: HoldId) -> Result<()> {
        let mut state = self.state.write().await;

        let (sku, quantity) = {
            let hold = state
                .holds
                .get_mut(&hold_id)
                .ok_or(LedgerError::HoldNotFound(hold_id))?;

            match hold.state {
                HoldState::Released => return Ok(()),
                HoldState::Committed => {
                    return Err(LedgerError::AlreadyFinalized {
                        hold_id,
                        state: HoldState::Committed,
                    });
                }
                HoldState::Active => {
                    hold.state = HoldState::Released;
                    (hold.sku.clone(), hold.quantity)
                }
            }
        };

        if let Some(record) = state.stock.get_mut(&sku) {
            record.reserved -= quantity;
            record.available += quantity;
        }
        Ok(())
    }

    async fn hold(&self, hold_id: HoldId) -> Result<Option<Hold>> {
        Ok(self.state.read().await.holds.get(&hold_id).cloned())
    }

    async fn holds_for_order(&self, order_id: OrderId) -> Result<Vec<Hold>> {
        Ok(self
            .state
            .read()
            .await
            .holds
            .values()
            .filter(|h| h.order_id == order_id)
            .cloned()
            .collect())
    }

    async fn expired_holds(&self, as_of: DateTime<Utc>) -> Result<Vec<Hold>> {
        Ok(self
            .state
            .read()
            .await
            .holds
            .values()
            .filter(|h| h.is_expired(as_of))
            .cloned()
            .collect())
    }
}
