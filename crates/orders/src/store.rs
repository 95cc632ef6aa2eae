//! The `OrderStore` trait: the order aggregate's persistence seam.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId};

use crate::{Order, OrderState, Result};

/// Persistence interface for order records.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order. Fails with `DuplicateOrder` if the ID is taken.
    async fn insert(&self, order: Order) -> Result<()>;

    /// Loads an order by ID.
    async fn get(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Returns all orders placed by a customer, newest first.
    async fn orders_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>>;

    /// Transitions an order's state with optimistic concurrency.
    ///
    /// The transition applies only if the stored state still equals
    /// `expected`; otherwise it fails with `AlreadyFinalized` carrying the
    /// actual state. Transitioning to `Paid` records `paid_at`; transitioning
    /// to `Cancelled` or `Expired` records `closed_at`.
    async fn transition(
        &self,
        order_id: OrderId,
        expected: OrderState,
        next: OrderState,
        at: DateTime<Utc>,
    ) -> Result<()>;
}
