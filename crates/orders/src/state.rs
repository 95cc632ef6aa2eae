//! Order lifecycle state machine.

use serde::{Deserialize, Serialize};

/// The state of an order in its lifecycle.
///
/// State transitions:
/// ```text
/// PendingPayment ──┬──► Paid
///                  ├──► Cancelled
///                  └──► Expired
/// ```
///
/// `PendingPayment` is the only non-terminal state; each terminal transition
/// happens exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderState {
    /// Stock is held, awaiting the payment callback.
    #[default]
    PendingPayment,

    /// Payment confirmed, holds committed (terminal).
    Paid,

    /// Payment failed or was cancelled, holds released (terminal).
    Cancelled,

    /// Payment never arrived before the holds expired (terminal).
    Expired,
}

impl OrderState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderState::PendingPayment)
    }

    /// Returns the state name as stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderState::PendingPayment => "pending_payment",
            OrderState::Paid => "paid",
            OrderState::Cancelled => "cancelled",
            OrderState::Expired => "expired",
        }
    }

    /// Parses a state name as stored in the database.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending_payment" => Some(OrderState::PendingPayment),
            "paid" => Some(OrderState::Paid),
            "cancelled" => Some(OrderState::Cancelled),
            "expired" => Some(OrderState::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
