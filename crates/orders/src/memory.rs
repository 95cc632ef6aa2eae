use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId};
use tokio::sync::RwLock;

use crate::{Order, OrderState, OrderStore, OrderStoreError, Result};

/// In-memory order store for testing and single-process deployments.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the total number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.orders.read().await.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<()> {
        let mut orders = self.orders.write().await;
        if orders.contains_key(&order.id) {
            return Err(OrderStoreError::DuplicateOrder(order.id));
        }
        orders.insert(order.id, order);
        Ok(())
    }

    async fn get(&self, order_id: OrderId) -> Result<Option<Order>> {
        Ok(self.orders.read().await.get(&order_id).cloned())
    }

    async fn orders_for_customer(&self, customer_id: CustomerId) -> Result<Vec<Order>> {
        let orders = self.orders.read().await;
        let mut found: Vec<Order> = orders
            .values()
            .filter(|o| o.customer_id == customer_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(found)
    }

    async fn transition(
        &self,
        order_id: OrderId,
        expected: OrderState,
        next: OrderState,
        at: DateTime<Utc>,
    ) -> Result<()> {
        let mut orders = self.orders.write().await;
        let order = orders
            .get_mut(&order_id)
            .ok_or(OrderStoreError::OrderNotFound(order_id))?;

        if order.state != expected {
            return Err(OrderStoreError::AlreadyFinalized {
                order_id,
                actual: order.state,
            });
        }

        order.state = next;
        match next {
            OrderState::Paid => order.paid_at = Some(at),
            OrderState::Cancelled | OrderState::Expired => order.closed_at = Some(at),
            OrderState::PendingPayment => {}
        }
        Ok(())
    }
}
