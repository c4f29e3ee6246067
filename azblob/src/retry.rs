//! Retry policy for individual service requests.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::BlobResult;

/// Exponential backoff applied to retryable failures.
///
/// Only errors for which [`crate::BlobError::is_retryable`] holds are
/// repeated; terminal service errors surface on the first attempt.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Backoff multiplier for exponential backoff.
    pub multiplier: f64,

    /// Upper bound for a single delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(800),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// A policy that never repeats a request.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Delay to wait after `attempts` failed attempts (1-indexed):
    /// `base_delay * multiplier^(attempts - 1)`, capped at `max_delay`.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }

    /// Run `op` until it succeeds, fails terminally, or attempts run out.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut op: F) -> BlobResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = BlobResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.next_delay(attempt);
                    warn!(operation, attempt, ?delay, error = %err, "retrying request");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BlobError, ServiceCode};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick() -> RetryPolicy {
        RetryPolicy::new().with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn exponential_backoff_increases() {
        let policy = RetryPolicy::new();

        let d1 = policy.next_delay(1);
        let d2 = policy.next_delay(2);
        let d3 = policy.next_delay(3);

        assert_eq!(d1, policy.base_delay);
        assert!(d2 > d1);
        assert!(d3 > d2);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = RetryPolicy::new().with_max_delay(Duration::from_secs(5));
        assert_eq!(policy.next_delay(30), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn transient_errors_are_retried() {
        let calls = AtomicU32::new(0);
        let result = quick()
            .run("probe", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(BlobError::service(503, ServiceCode::ServerBusy, "busy"))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn terminal_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let result: BlobResult<()> = quick()
            .run("probe", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BlobError::service(403, ServiceCode::AuthenticationFailed, "denied"))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn attempts_are_bounded() {
        let calls = AtomicU32::new(0);
        let result: BlobResult<()> = quick()
            .with_max_attempts(3)
            .run("probe", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(BlobError::service(500, ServiceCode::InternalError, "boom"))
            })
            .await;

        assert!(result.unwrap_err().is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
