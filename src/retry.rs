//! Bounded retry with exponential backoff.
//!
//! Shared by the tool executor, the chat client, and the OpenAI embedding
//! provider. The caller decides which errors are transient; everything
//! else returns immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::config::ExecutorConfig;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt (so at most `max_retries + 1` calls).
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Policy with the default backoff curve and a custom retry count.
    pub fn with_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay_ms = self.base_delay_ms as f64 * self.backoff_multiplier.powi(attempt as i32);
        let clamped = delay_ms.min(self.max_delay_ms as f64) as u64;
        Duration::from_millis(clamped)
    }
}

/// Whole milliseconds in `duration`, saturating at `u64::MAX`.
pub fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl From<&ExecutorConfig> for RetryPolicy {
    fn from(cfg: &ExecutorConfig) -> Self {
        Self {
            max_retries: cfg.max_retries,
            base_delay_ms: cfg.base_delay_ms,
            max_delay_ms: cfg.max_delay_ms,
            backoff_multiplier: cfg.backoff_multiplier,
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's retries are exhausted.
///
/// Returns the final outcome together with the number of attempts made.
pub async fn retry_async<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> (Result<T, E>, u32)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut attempt = 0;

    loop {
        match operation().await {
            Ok(value) => return (Ok(value), attempt + 1),
            Err(err) => {
                if !is_retryable(&err) {
                    return (Err(err), attempt + 1);
                }
                if attempt >= policy.max_retries {
                    warn!(
                        operation = operation_name,
                        attempts = attempt + 1,
                        err = %err,
                        "max retries exceeded"
                    );
                    return (Err(err), attempt + 1);
                }

                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    operation = operation_name,
                    attempt = attempt + 1,
                    max = policy.max_retries,
                    delay_ms = duration_ms(delay),
                    err = %err,
                    "retrying after error"
                );

                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 5,
            backoff_multiplier: 2.0,
        }
    }

    #[test]
    fn test_delay_exponential_backoff() {
        let policy = RetryPolicy {
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(1000));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(8000));
    }

    #[test]
    fn test_delay_clamped_to_max() {
        let policy = RetryPolicy {
            base_delay_ms: 10000,
            max_delay_ms: 30000,
            backoff_multiplier: 2.0,
            ..Default::default()
        };
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(30000));
    }

    #[test]
    fn test_duration_ms_saturates() {
        assert_eq!(duration_ms(Duration::from_millis(1500)), 1500);
        assert_eq!(duration_ms(Duration::from_micros(999)), 0);
        assert_eq!(duration_ms(Duration::MAX), u64::MAX);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let (result, attempts) = retry_async(&fast_policy(3), "test", |_: &String| true, || {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err("transient".to_string())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let (result, attempts): (Result<i32, String>, u32) =
            retry_async(&fast_policy(5), "test", |_: &String| false, || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("bad input".to_string())
                }
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let (result, attempts): (Result<i32, String>, u32) =
            retry_async(&fast_policy(2), "test", |_: &String| true, || async {
                Err("always fails".to_string())
            })
            .await;
        assert!(result.is_err());
        assert_eq!(attempts, 3);
    }
}
