//! Payment-provider callback reconciliation.
//!
//! Providers deliver notifications at least once and not necessarily in
//! order. The reconciler verifies authenticity first, then applies the
//! outcome through an optimistic state transition so that replays are
//! absorbed and contradictory late arrivals lose cleanly.

use base64::{Engine as _, engine::general_purpose};
use chrono::Utc;
use common::OrderId;
use hmac::{Hmac, Mac};
use ledger::StockStore;
use orders::{OrderState, OrderStore, OrderStoreError};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{CheckoutError, Result};

type HmacSha256 = Hmac<Sha256>;

/// Payment outcome reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentOutcome {
    /// The customer paid.
    Success,
    /// The charge failed.
    Failure,
    /// The customer cancelled at the provider.
    Cancel,
}

impl PaymentOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            PaymentOutcome::Success => "success",
            PaymentOutcome::Failure => "failure",
            PaymentOutcome::Cancel => "cancel",
        }
    }
}

/// A payment-provider notification, as delivered to the webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentNotification {
    /// The order this notification settles.
    pub order_id: OrderId,
    /// Reported outcome.
    pub outcome: PaymentOutcome,
    /// Provider-side transaction token.
    pub transaction_id: String,
    /// Provider timestamp, echoed into the signature.
    pub timestamp: String,
    /// Anti-replay nonce, echoed into the signature.
    pub nonce: String,
    /// Base64 HMAC-SHA256 over the canonical payload.
    pub signature: String,
}

/// Verifies (and, for tests and outbound use, produces) callback signatures.
///
/// The signed payload is the canonical string
/// `"{timestamp}\n{nonce}\n{order_id}\n{outcome}\n{transaction_id}\n"`,
/// HMAC-SHA256 under the shared provider secret, base64-encoded.
#[derive(Clone)]
pub struct SignatureVerifier {
    secret: Vec<u8>,
}

impl SignatureVerifier {
    /// Creates a verifier for the given shared secret.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    fn canonical_payload(notification: &PaymentNotification) -> String {
        format!(
            "{}\n{}\n{}\n{}\n{}\n",
            notification.timestamp,
            notification.nonce,
            notification.order_id,
            notification.outcome.as_str(),
            notification.transaction_id,
        )
    }

    /// Computes the signature for a notification.
    pub fn sign(&self, notification: &PaymentNotification) -> String {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any size");
        mac.update(Self::canonical_payload(notification).as_bytes());
        general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    /// Verifies a notification's signature in constant time.
    pub fn verify(&self, notification: &PaymentNotification) -> bool {
        let Ok(claimed) = general_purpose::STANDARD.decode(&notification.signature) else {
            return false;
        };

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any size");
        mac.update(Self::canonical_payload(notification).as_bytes());
        mac.verify_slice(&claimed).is_ok()
    }
}

/// What the reconciler did with a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// The order transitioned and its holds were finalized.
    Applied,
    /// A redelivery of an outcome already recorded; state unchanged.
    AlreadyApplied,
}

/// Consumes payment notifications and finalizes orders exactly once.
pub struct PaymentReconciler<L, O> {
    ledger: L,
    orders: O,
    verifier: SignatureVerifier,
}

impl<L, O> PaymentReconciler<L, O>
where
    L: StockStore,
    O: OrderStore,
{
    /// Creates a new reconciler.
    pub fn new(ledger: L, orders: O, verifier: SignatureVerifier) -> Self {
        Self {
            ledger,
            orders,
            verifier,
        }
    }

    /// Handles one notification.
    ///
    /// Safe under at-least-once delivery: a redelivery matching the recorded
    /// terminal state returns `Ok(AlreadyApplied)` and re-finalizes the holds
    /// (idempotent), which also repairs a crash between the state transition
    /// and the hold finalization. A contradictory late arrival fails with
    /// `AlreadyFinalized`.
    #[tracing::instrument(skip(self, notification), fields(order_id = %notification.order_id, outcome = ?notification.outcome))]
    pub async fn handle(&self, notification: &PaymentNotification) -> Result<ReconcileOutcome> {
        metrics::counter!("payment_callbacks_total").increment(1);

        // Authenticity before any state change.
        if !self.verifier.verify(notification) {
            metrics::counter!("payment_callbacks_rejected_total").increment(1);
            tracing::warn!("payment callback failed signature verification");
            return Err(CheckoutError::InvalidSignature);
        }

        let order_id = notification.order_id;
        let order = self
            .orders
            .get(order_id)
            .await?
            .ok_or(CheckoutError::OrderNotFound(order_id))?;

        let target = match notification.outcome {
            PaymentOutcome::Success => OrderState::Paid,
            PaymentOutcome::Failure | PaymentOutcome::Cancel => OrderState::Cancelled,
        };

        match order.state {
            OrderState::PendingPayment => {
                match self
                    .orders
                    .transition(order_id, OrderState::PendingPayment, target, Utc::now())
                    .await
                {
                    Ok(()) => {
                        self.finalize_holds(order_id, target).await?;
                        tracing::info!(state = %target, "payment callback applied");
                        Ok(ReconcileOutcome::Applied)
                    }
                    // Lost the race against another callback or the sweeper;
                    // re-resolve against the state that actually won.
                    Err(OrderStoreError::AlreadyFinalized { actual, .. }) => {
                        self.resolve_terminal(order_id, actual, target).await
                    }
                    Err(e) => Err(e.into()),
                }
            }
            state => self.resolve_terminal(order_id, state, target).await,
        }
    }

    /// Resolves a notification against an order already in a terminal state.
    async fn resolve_terminal(
        &self,
        order_id: OrderId,
        actual: OrderState,
        target: OrderState,
    ) -> Result<ReconcileOutcome> {
        if actual == target || (actual == OrderState::Expired && target == OrderState::Cancelled) {
            // Redelivery (or a cancel for an order the sweeper already
            // expired): re-finalize the holds in case a previous attempt
            // crashed between the transition and the ledger update.
            self.finalize_holds(order_id, actual).await?;
            return Ok(ReconcileOutcome::AlreadyApplied);
        }

        tracing::warn!(%order_id, %actual, attempted = %target, "contradictory payment callback dropped");
        Err(CheckoutError::AlreadyFinalized {
            order_id,
            state: actual,
        })
    }

    /// Commits or releases every hold linked to the order.
    async fn finalize_holds(&self, order_id: OrderId, state: OrderState) -> Result<()> {
        for hold in self.ledger.holds_for_order(order_id).await? {
            match state {
                OrderState::Paid => self.ledger.commit(hold.id).await?,
                OrderState::Cancelled | OrderState::Expired => {
                    self.ledger.release(hold.id).await?
                }
                OrderState::PendingPayment => {}
            }
        }
        Ok(())
    }
}
