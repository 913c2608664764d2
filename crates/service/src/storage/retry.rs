use std::future::Future;
use std::time::Duration;

use configs::RetryConfig;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::StoreError;

/// Exponential backoff for transient remote failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff_base: Duration,
    backoff_max: Duration,
    enabled: bool,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff_base: Duration, backoff_max: Duration, enabled: bool) -> Self {
        Self { max_attempts, backoff_base, backoff_max, enabled }
    }

    pub fn from_config(cfg: &RetryConfig) -> Self {
        Self::new(cfg.max_attempts, cfg.backoff_base(), cfg.backoff_max(), cfg.enabled)
    }

    /// A single attempt, no retries.
    pub fn disabled() -> Self {
        Self::new(1, Duration::ZERO, Duration::ZERO, false)
    }

    pub fn max_attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Delay before retry number `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2_u32.checked_pow(attempt - 1).unwrap_or(u32::MAX);
        self.backoff_base.saturating_mul(factor).min(self.backoff_max)
    }

    pub fn should_retry(&self, attempt: u32, error: &StoreError) -> bool {
        if !self.enabled || attempt >= self.max_attempts() {
            return false;
        }
        error.is_retryable()
    }
}

/// Run `operation` until it succeeds, fails permanently, or attempts run out.
pub async fn retry_with_policy<F, Fut, T>(policy: &RetryPolicy, op: &str, mut operation: F) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, StoreError>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(op, attempt, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) if policy.should_retry(attempt, &error) => {
                let delay = policy.backoff(attempt);
                warn!(op, attempt, ?delay, %error, "transient failure, retrying");
                sleep(delay).await;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn policy(max_attempts: u32, enabled: bool) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1), Duration::from_millis(10), enabled)
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy::new(10, Duration::from_millis(100), Duration::from_millis(350), true);
        assert_eq!(p.backoff(1), Duration::from_millis(100));
        assert_eq!(p.backoff(2), Duration::from_millis(200));
        assert_eq!(p.backoff(3), Duration::from_millis(350));
        assert_eq!(p.backoff(40), Duration::from_millis(350));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let counter = Arc::new(AtomicU32::new(0));
        let result = retry_with_policy(&policy(3, true), "test", || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(StoreError::Transient("503".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.expect("ok"), 42);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn stops_at_max_attempts() {
        let counter = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = retry_with_policy(&policy(2, true), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Transient("timeout".into()))
            }
        })
        .await;
        assert!(matches!(result, Err(StoreError::Transient(_))));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn permanent_errors_and_disabled_policy_do_not_retry() {
        let counter = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = retry_with_policy(&policy(5, true), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Unavailable("401".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        let counter = Arc::new(AtomicU32::new(0));
        let result: Result<(), _> = retry_with_policy(&policy(5, false), "test", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(StoreError::Transient("503".into()))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
