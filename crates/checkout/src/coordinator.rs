//! Checkout coordination: reserve stock, then persist the pending order.

use std::collections::BTreeMap;

use chrono::{Duration, Utc};
use common::{CustomerId, Money, OrderId, SkuId};
use ledger::{Hold, LedgerError, StockStore};
use orders::{LineItem, Order, OrderStore};
use uuid::Uuid;

use crate::error::{CheckoutError, Result};
use crate::retry::{BackoffPolicy, with_backoff};

/// A client checkout request: what to buy, for whom.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    /// The purchasing customer.
    pub customer_id: CustomerId,
    /// Requested line items; duplicates per SKU are merged.
    pub items: Vec<CheckoutItem>,
}

/// One requested line item with its price snapshot.
#[derive(Debug, Clone)]
pub struct CheckoutItem {
    pub sku: SkuId,
    pub quantity: u32,
    pub unit_price: Money,
}

/// The successful result of a checkout: what the client needs to pay.
#[derive(Debug, Clone)]
pub struct CheckoutReceipt {
    /// The created order, in pending-payment state.
    pub order_id: OrderId,
    /// Opaque token the client presents to the payment provider.
    pub payment_token: String,
}

/// Orchestrates the atomic "reserve stock → create order" sequence.
///
/// Holds are acquired in ascending SKU order so two checkouts contending for
/// the same pair of SKUs can never deadlock by acquiring in opposite order.
/// No failure path leaves a partial reservation behind.
pub struct CheckoutCoordinator<L, O> {
    ledger: L,
    orders: O,
    hold_ttl: Duration,
    backoff: BackoffPolicy,
}

impl<L, O> CheckoutCoordinator<L, O>
where
    L: StockStore,
    O: OrderStore,
{
    /// Creates a new coordinator. `hold_ttl` bounds how long an unpaid
    /// reservation survives.
    pub fn new(ledger: L, orders: O, hold_ttl: Duration) -> Self {
        Self {
            ledger,
            orders,
            hold_ttl,
            backoff: BackoffPolicy::default(),
        }
    }

    /// Overrides the retry policy for order persistence.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    /// Executes a checkout attempt.
    ///
    /// Every line item is attempted so a rejection can list every
    /// insufficient SKU; on any failure all acquired holds are released
    /// before the error is returned, leaving the ledger as if the checkout
    /// was never attempted.
    #[tracing::instrument(skip(self, request), fields(customer_id = %request.customer_id))]
    pub async fn checkout(&self, request: CheckoutRequest) -> Result<CheckoutReceipt> {
        metrics::counter!("checkout_attempts_total").increment(1);
        let started = std::time::Instant::now();

        let items = merge_items(request.items)?;
        let order_id = OrderId::new();

        // Acquire holds in ascending SKU order (BTreeMap iteration order).
        let mut holds: Vec<Hold> = Vec::with_capacity(items.len());
        let mut insufficient: Vec<SkuId> = Vec::new();

        for item in items.values() {
            match self
                .ledger
                .reserve(&item.sku, item.quantity, order_id, self.hold_ttl)
                .await
            {
                Ok(hold) => holds.push(hold),
                Err(LedgerError::InsufficientStock { sku, .. }) => insufficient.push(sku),
                Err(e) => {
                    self.release_all(&holds).await;
                    return Err(e.into());
                }
            }
        }

        if !insufficient.is_empty() {
            self.release_all(&holds).await;
            metrics::counter!("checkout_rejected_total").increment(1);
            tracing::info!(skus = ?insufficient, "checkout rejected, insufficient stock");
            return Err(CheckoutError::InsufficientStock { skus: insufficient });
        }

        let order = Order::new(
            order_id,
            request.customer_id,
            items
                .into_values()
                .map(|i| LineItem::new(i.sku, i.quantity, i.unit_price))
                .collect(),
            holds.iter().map(|h| h.id).collect(),
            Utc::now(),
        );

        let persisted = with_backoff(self.backoff, || {
            let order = order.clone();
            async move { Ok(self.orders.insert(order).await?) }
        })
        .await;

        if let Err(e) = persisted {
            // Compensate: a failed checkout must not leak reservations.
            self.release_all(&holds).await;
            return Err(e);
        }

        metrics::histogram!("checkout_duration_seconds").record(started.elapsed().as_secs_f64());
        tracing::info!(%order_id, holds = holds.len(), "checkout accepted");

        Ok(CheckoutReceipt {
            order_id,
            payment_token: Uuid::new_v4().simple().to_string(),
        })
    }

    async fn release_all(&self, holds: &[Hold]) {
        for hold in holds {
            // Releasing a fresh active hold can only fail on storage trouble;
            // the sweeper reclaims anything missed here once it expires.
            if let Err(e) = self.ledger.release(hold.id).await {
                tracing::warn!(hold_id = %hold.id, error = %e, "failed to release hold during rollback");
            }
        }
    }
}

/// Merges duplicate SKUs and drops zero-quantity lines, keyed by SKU so
/// iteration yields the fixed global acquisition order.
fn merge_items(items: Vec<CheckoutItem>) -> Result<BTreeMap<SkuId, CheckoutItem>> {
    let mut merged: BTreeMap<SkuId, CheckoutItem> = BTreeMap::new();
    for item in items {
        if item.quantity == 0 {
            continue;
        }
        merged
            .entry(item.sku.clone())
            .and_modify(|existing| existing.quantity += item.quantity)
            .or_insert(item);
    }

    if merged.is_empty() {
        return Err(CheckoutError::EmptyCheckout);
    }
    Ok(merged)
}
