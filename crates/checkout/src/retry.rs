//! Bounded exponential backoff for transient storage failures.

use std::future::Future;
use std::time::Duration;

use crate::CheckoutError;

/// Retry policy for operations against the persistent stores.
#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,
    /// Delay before the first retry; doubles on each subsequent retry.
    pub base_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// Runs `op` until it succeeds, fails with a non-transient error, or the
/// attempt budget is exhausted. Only storage errors are retried; domain
/// rejections (insufficient stock, lost CAS races) surface immediately.
pub async fn with_backoff<T, F, Fut>(policy: BackoffPolicy, mut op: F) -> Result<T, CheckoutError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CheckoutError>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 1;

    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() && attempt < policy.max_attempts => {
                tracing::warn!(attempt, error = %e, "transient storage error, retrying");
                tokio::time::sleep(delay).await;
                delay *= 2;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn transient() -> CheckoutError {
        CheckoutError::Orders(orders::OrderStoreError::Database(sqlx::Error::PoolTimedOut))
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let result = with_backoff(BackoffPolicy::default(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, CheckoutError>(42)
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_errors() {
        let policy = BackoffPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = with_backoff(policy, move || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(transient())
                } else {
                    Ok("ok")
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), "ok");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let policy = BackoffPolicy {
            max_attempts: 2,
            base_delay: Duration::from_millis(1),
        };
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = with_backoff(policy, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(transient())
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn domain_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), _> = with_backoff(BackoffPolicy::default(), move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(CheckoutError::EmptyCheckout)
            }
        })
        .await;

        assert!(matches!(result, Err(CheckoutError::EmptyCheckout)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
