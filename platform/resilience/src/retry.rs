//! Retry with exponential backoff and full jitter
//!
//! Wraps a fallible async operation with bounded retries. Backoff doubles per
//! attempt, is capped, and each sleep is drawn uniformly from
//! `[0, backoff]` (full jitter) so that synchronized retry storms spread out.

use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts (first call included)
    pub max_attempts: u32,
    /// Initial backoff duration (doubles on each retry)
    pub initial_backoff: Duration,
    /// Maximum backoff duration to cap exponential growth
    pub max_backoff: Duration,
    /// Draw each sleep uniformly from [0, backoff] instead of sleeping the
    /// full backoff
    pub full_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(30),
            full_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Profile for AI calls: tight budget, two retries on top of the first
    /// attempt.
    pub fn ai_default(retry_max_attempts: u32) -> Self {
        Self {
            max_attempts: retry_max_attempts + 1,
            initial_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(4),
            full_jitter: true,
        }
    }
}

/// Retry a fallible async operation with exponential backoff.
///
/// `is_retryable` classifies errors: a non-retryable error is returned
/// immediately without burning the remaining attempts.
///
/// # Errors
///
/// Returns the last error once attempts are exhausted or the first
/// non-retryable error.
pub async fn retry_with_backoff<F, Fut, T, E, R>(
    operation: F,
    config: &RetryConfig,
    context: &str,
    is_retryable: R,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0;
    let mut backoff = config.initial_backoff;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    debug!(context = %context, attempt, "operation succeeded after retry");
                }
                return Ok(result);
            }
            Err(e) => {
                if !is_retryable(&e) {
                    debug!(context = %context, error = %e, "error not retryable, giving up");
                    return Err(e);
                }

                if attempt >= config.max_attempts {
                    warn!(
                        context = %context,
                        attempts = attempt,
                        error = %e,
                        "operation failed after max retries"
                    );
                    return Err(e);
                }

                let delay = if config.full_jitter {
                    let max_ms = backoff.as_millis().max(1) as u64;
                    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
                } else {
                    backoff
                };

                warn!(
                    context = %context,
                    attempt,
                    max_attempts = config.max_attempts,
                    backoff_ms = delay.as_millis() as u64,
                    error = %e,
                    "operation failed, retrying with backoff"
                );

                sleep(delay).await;
                backoff = std::cmp::min(backoff * 2, config.max_backoff);
            }
        }
    }
}

/// Retry treating every error as transient.
pub async fn retry_all_errors<F, Fut, T, E>(
    operation: F,
    config: &RetryConfig,
    context: &str,
) -> Result<T, E>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_backoff(operation, config, context, |_| true).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn quick_config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(20),
            full_jitter: false,
        }
    }

    #[tokio::test]
    async fn succeeds_on_first_attempt() {
        let result = retry_all_errors(
            || async { Ok::<_, String>(42) },
            &quick_config(3),
            "test_op",
        )
        .await;

        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result = retry_all_errors(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                    if n < 3 {
                        Err(format!("attempt {n}"))
                    } else {
                        Ok(42)
                    }
                }
            },
            &quick_config(3),
            "test_op",
        )
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, String> = retry_all_errors(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err("persistent".to_string())
                }
            },
            &quick_config(2),
            "test_op",
        )
        .await;

        assert_eq!(result, Err("persistent".to_string()));
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_error_returns_immediately() {
        let attempts = Arc::new(AtomicU32::new(0));
        let attempts_clone = attempts.clone();

        let result: Result<i32, String> = retry_with_backoff(
            || {
                let attempts = attempts_clone.clone();
                async move {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err("validation: bad field".to_string())
                }
            },
            &quick_config(5),
            "test_op",
            |e| !e.starts_with("validation"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn backoff_is_capped() {
        let config = RetryConfig {
            max_attempts: 4,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(25),
            full_jitter: false,
        };

        let start = std::time::Instant::now();
        let _: Result<i32, String> =
            retry_all_errors(|| async { Err("e".to_string()) }, &config, "test_op").await;

        // Sleeps: 10 + 20 + 25 (capped) = 55ms minimum.
        assert!(start.elapsed() >= Duration::from_millis(55));
    }

    #[tokio::test]
    async fn jittered_delay_never_exceeds_backoff() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_millis(10),
            full_jitter: true,
        };

        let start = std::time::Instant::now();
        let _: Result<i32, String> =
            retry_all_errors(|| async { Err("e".to_string()) }, &config, "test_op").await;

        // Two jittered sleeps of at most 10ms each, plus scheduling slack.
        assert!(start.elapsed() < Duration::from_millis(200));
    }
}
