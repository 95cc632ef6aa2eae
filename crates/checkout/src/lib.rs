//! Checkout coordination over the inventory ledger and order store.
//!
//! Three collaborators share the same atomic store operations and nothing
//! else:
//!
//! - [`CheckoutCoordinator`] turns a cart into holds plus a pending order,
//!   all-or-nothing.
//! - [`PaymentReconciler`] consumes signed payment-provider callbacks and
//!   finalizes orders exactly once under at-least-once delivery.
//! - [`ExpirySweeper`] reclaims holds whose payment never arrived.

mod config;
mod coordinator;
mod error;
mod retry;
mod sweeper;
mod webhook;

pub use config::CheckoutConfig;
pub use coordinator::{CheckoutCoordinator, CheckoutItem, CheckoutReceipt, CheckoutRequest};
pub use error::{CheckoutError, Result};
pub use retry::{BackoffPolicy, with_backoff};
pub use sweeper::{ExpirySweeper, SweepReport};
pub use webhook::{
    PaymentNotification, PaymentOutcome, PaymentReconciler, ReconcileOutcome, SignatureVerifier,
};
