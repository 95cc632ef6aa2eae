//! Background reclamation of stale unpaid reservations.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use common::OrderId;
use ledger::{Hold, StockStore};
use orders::{OrderState, OrderStore, OrderStoreError};
use tokio::sync::watch;

use crate::error::Result;

/// What one sweep pass accomplished.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Orders transitioned to Expired.
    pub expired_orders: usize,
    /// Holds released back to available stock.
    pub released_holds: usize,
    /// Holds finalized for orders that were already terminal (crash repair).
    pub repaired_holds: usize,
    /// Expiry transitions lost to a concurrent payment callback.
    pub lost_races: usize,
}

/// Periodically expires unpaid orders and reclaims their holds.
///
/// The sweeper talks to the ledger and order store through the same atomic
/// operations the request path uses; whichever of the sweeper and the payment
/// reconciler lands its terminal transition first wins, and the loser's
/// attempt is dropped silently.
pub struct ExpirySweeper<L, O> {
    ledger: L,
    orders: O,
    orphan_grace: Duration,
}

impl<L, O> ExpirySweeper<L, O>
where
    L: StockStore,
    O: OrderStore,
{
    /// Creates a new sweeper. `orphan_grace` is the extra delay past expiry
    /// before a hold with no persisted order is reclaimed.
    pub fn new(ledger: L, orders: O, orphan_grace: Duration) -> Self {
        Self {
            ledger,
            orders,
            orphan_grace,
        }
    }

    /// Runs sweep passes on `interval` until `shutdown` flips to true.
    ///
    /// Sweep errors are logged and retried on the next tick; the cadence
    /// itself is the backoff.
    pub async fn run(&self, interval: std::time::Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sweep_once(Utc::now()).await {
                        Ok(report) if report != SweepReport::default() => {
                            tracing::info!(?report, "sweep pass finished");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "sweep pass failed"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        tracing::info!("expiry sweeper shutting down");
                        return;
                    }
                }
            }
        }
    }

    /// Scans expired active holds as of `now` and reclaims them.
    #[tracing::instrument(skip(self))]
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        // Group by owning order so each order transitions at most once.
        let mut by_order: BTreeMap<OrderId, Vec<Hold>> = BTreeMap::new();
        for hold in self.ledger.expired_holds(now).await? {
            by_order.entry(hold.order_id).or_default().push(hold);
        }

        for (order_id, holds) in by_order {
            match self.orders.get(order_id).await? {
                Some(order) if order.state == OrderState::PendingPayment => {
                    self.expire_order(order_id, now, &mut report).await?;
                }
                Some(order) => {
                    // Terminal order with active holds left behind: a crash
                    // interrupted finalization. Finish the job.
                    for hold in &holds {
                        match order.state {
                            OrderState::Paid => self.ledger.commit(hold.id).await?,
                            _ => self.ledger.release(hold.id).await?,
                        }
                        report.repaired_holds += 1;
                    }
                }
                None => {
                    // No order was ever persisted for these holds (crash
                    // between reserving and persisting); release once the
                    // grace period past expiry has passed.
                    for hold in &holds {
                        if hold.expires_at + self.orphan_grace <= now {
                            self.ledger.release(hold.id).await?;
                            report.released_holds += 1;
                            tracing::info!(hold_id = %hold.id, %order_id, "released orphaned hold");
                        }
                    }
                }
            }
        }

        metrics::counter!("sweeper_expired_orders_total").increment(report.expired_orders as u64);
        metrics::counter!("sweeper_released_holds_total").increment(report.released_holds as u64);
        Ok(report)
    }

    async fn expire_order(
        &self,
        order_id: OrderId,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        match self
            .orders
            .transition(order_id, OrderState::PendingPayment, OrderState::Expired, now)
            .await
        {
            Ok(()) => {
                report.expired_orders += 1;
                // Release every hold of the order, not just the ones already
                // past expiry, so the order's reservations go together.
                for hold in self.ledger.holds_for_order(order_id).await? {
                    self.ledger.release(hold.id).await?;
                    report.released_holds += 1;
                }
                tracing::info!(%order_id, "expired unpaid order");
                Ok(())
            }
            Err(OrderStoreError::AlreadyFinalized { actual, .. }) => {
                // A payment callback won the race; drop our attempt.
                report.lost_races += 1;
                tracing::debug!(%order_id, state = %actual, "expiry lost race to finalizer");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}
