//! Reservation holds: expiring claims on stock quantity.

use chrono::{DateTime, Duration, Utc};
use common::{HoldId, OrderId, SkuId};
use serde::{Deserialize, Serialize};

/// The lifecycle state of a reservation hold.
///
/// ```text
/// Active ──► Committed   (payment succeeded, stock consumed)
///    └─────► Released    (cancelled/expired, stock returned)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum HoldState {
    /// Stock is reserved, awaiting payment.
    #[default]
    Active,

    /// Reserved quantity was consumed (terminal).
    Committed,

    /// Reserved quantity was returned to available stock (terminal).
    Released,
}

impl HoldState {
    /// Returns true if no further transitions are possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, HoldState::Committed | HoldState::Released)
    }

    /// Returns the state name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldState::Active => "active",
            HoldState::Committed => "committed",
            HoldState::Released => "released",
        }
    }

    /// Parses a state name as stored in the database.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(HoldState::Active),
            "committed" => Some(HoldState::Committed),
            "released" => Some(HoldState::Released),
            _ => None,
        }
    }
}

impl std::fmt::Display for HoldState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A temporary claim on stock quantity tied to one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hold {
    /// Unique hold identifier.
    pub id: HoldId,

    /// The SKU this hold claims stock from.
    pub sku: SkuId,

    /// Reserved quantity.
    pub quantity: u32,

    /// The order this hold belongs to.
    pub order_id: OrderId,

    /// Current lifecycle state.
    pub state: HoldState,

    /// When the hold was created.
    pub created_at: DateTime<Utc>,

    /// When an unpaid hold becomes reclaimable by the sweeper.
    pub expires_at: DateTime<Utc>,
}

impl Hold {
    /// Creates a new active hold expiring `ttl` from `now`.
    pub fn new(sku: SkuId, quantity: u32, order_id: OrderId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            id: HoldId::new(),
            sku,
            quantity,
            order_id,
            state: HoldState::Active,
            created_at: now,
            expires_at: now + ttl,
        }
    }

    /// Returns true if the hold is active and past its expiry.
    pub fn is_expired(&self, as_of: DateTime<Utc>) -> bool {
        self.state == HoldState::Active && self.expires_at <= as_of
    }
}
