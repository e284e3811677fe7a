//! Retry support for upstream requests
//!
//! Exponential backoff with jitter, gated on the error taxonomy's
//! [`should_retry`](crate::error::Error::should_retry) classification:
//! transport trouble and 5xx responses get another attempt, everything
//! else fails fast.

use crate::error::Result;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Default cap on attempts per logical request
const DEFAULT_MAX_ATTEMPTS: usize = 10;

/// Default first backoff step
const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(100);

/// Default ceiling on a single backoff step
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(5);

/// Backoff policy for upstream network calls
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Build a policy with explicit attempt and delay bounds
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Drive `operation` until it succeeds, exhausts the attempt cap, or
    /// fails with an error the taxonomy marks permanent
    pub async fn execute<F, Fut, T>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0usize;
        loop {
            attempt += 1;
            let err = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!("Upstream call recovered on attempt {}", attempt);
                    }
                    return Ok(value);
                }
                Err(err) => err,
            };

            if attempt >= self.max_attempts || !err.should_retry() {
                debug!(
                    "Giving up on upstream call after attempt {} ({}): {}",
                    attempt,
                    err.category(),
                    err
                );
                return Err(err);
            }

            let delay = self.delay_for(attempt);
            warn!(
                "Upstream call attempt {}/{} failed, backing off {:?}: {}",
                attempt, self.max_attempts, delay, err
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Delay before the attempt following `attempt`: doubled each round,
    /// capped, then spread by up to +10% so restarting clients don't hit
    /// the node in lockstep
    fn delay_for(&self, attempt: usize) -> Duration {
        let doublings = (attempt - 1).min(16) as u32;
        let stepped = self
            .base_delay
            .saturating_mul(1u32 << doublings)
            .min(self.max_delay);
        stepped + stepped.mul_f64(rand::random::<f64>() * 0.1)
    }
}

/// Run an upstream call under the default policy
pub async fn retry_http<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    RetryPolicy::default().execute(operation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(
            max_attempts,
            Duration::from_millis(1),
            Duration::from_millis(10),
        )
    }

    #[tokio::test]
    async fn first_try_needs_no_backoff() {
        let value = fast_policy(4)
            .execute(|| async { Ok::<_, Error>("challenge") })
            .await
            .unwrap();
        assert_eq!(value, "challenge");
    }

    #[tokio::test]
    async fn transient_failures_are_absorbed() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let value = fast_policy(5)
            .execute(move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 3 {
                        Err(Error::network_http_error("http://node", 503, "unavailable"))
                    } else {
                        Ok(n)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn attempt_cap_is_honored() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result = fast_policy(3)
            .execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Error::network("node unreachable")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_fail_on_the_spot() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let result = fast_policy(5)
            .execute(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(Error::submission_rejected("addr", "ch-1", "bad nonce")) }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles_up_to_the_ceiling() {
        let policy = RetryPolicy::new(
            10,
            Duration::from_millis(100),
            Duration::from_secs(5),
        );

        // Jitter adds at most 10%, so bound-check rather than compare exactly.
        let first = policy.delay_for(1);
        assert!(first >= Duration::from_millis(100));
        assert!(first <= Duration::from_millis(110));

        let third = policy.delay_for(3);
        assert!(third >= Duration::from_millis(400));
        assert!(third <= Duration::from_millis(440));

        let late = policy.delay_for(9);
        assert!(late >= Duration::from_secs(5));
        assert!(late <= Duration::from_millis(5500));
    }
}
