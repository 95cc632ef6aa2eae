//! Order records and line items.

use chrono::{DateTime, Utc};
use common::{CustomerId, HoldId, Money, OrderId, SkuId};
use serde::{Deserialize, Serialize};

use crate::OrderState;

/// One ordered SKU with its quantity and price snapshot.
///
/// The unit price is captured at checkout time so later catalog price changes
/// never alter what the customer owes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// The ordered SKU.
    pub sku: SkuId,

    /// Quantity ordered.
    pub quantity: u32,

    /// Price per unit at checkout time.
    pub unit_price: Money,
}

impl LineItem {
    /// Creates a new line item.
    pub fn new(sku: impl Into<SkuId>, quantity: u32, unit_price: Money) -> Self {
        Self {
            sku: sku.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns the total price for this line (quantity * unit price).
    pub fn total_price(&self) -> Money {
        self.unit_price.multiply(self.quantity)
    }
}

/// A persisted order.
///
/// Owns its line items; references (never owns) its reservation holds by ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier.
    pub id: OrderId,

    /// Customer who placed the order.
    pub customer_id: CustomerId,

    /// Ordered line items with price snapshots.
    pub items: Vec<LineItem>,

    /// Reservation holds backing this order, one per line item.
    pub hold_ids: Vec<HoldId>,

    /// Current lifecycle state.
    pub state: OrderState,

    /// When the order was created.
    pub created_at: DateTime<Utc>,

    /// When the order was paid, if it was.
    pub paid_at: Option<DateTime<Utc>>,

    /// When the order was cancelled or expired, if it was.
    pub closed_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Creates a new pending-payment order.
    pub fn new(
        id: OrderId,
        customer_id: CustomerId,
        items: Vec<LineItem>,
        hold_ids: Vec<HoldId>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            customer_id,
            items,
            hold_ids,
            state: OrderState::PendingPayment,
            created_at,
            paid_at: None,
            closed_at: None,
        }
    }

    /// Returns the total amount owed for the order.
    pub fn total_amount(&self) -> Money {
        self.items
            .iter()
            .fold(Money::zero(), |acc, item| acc + item.total_price())
    }

    /// Returns true if the order reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
