//! Retry logic with exponential backoff for handling transient failures.
//!
//! Used for startup connections, where the database may still be coming up.
//!
//! # Example
//!
//! ```rust
//! use dentalbook_runtime::retry::{RetryPolicy, retry_with_backoff};
//! use std::time::Duration;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let policy = RetryPolicy::builder()
//!     .max_retries(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .build();
//!
//! let pool_size = retry_with_backoff(&policy, "connect", || async {
//!     Ok::<_, String>(10)
//! })
//! .await?;
//! # Ok(())
//! # }
//! ```

use crate::metrics::RetryMetrics;
use std::time::Duration;
use tokio::time::sleep;

/// Retry policy configuration for exponential backoff.
///
/// # Default Values
///
/// - `max_retries`: 5
/// - `initial_delay`: 500ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (`None` retries forever)
    pub max_retries: Option<u32>,
    /// Initial delay before first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: Some(5),
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Create a new policy builder.
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder {
            policy: Self::default(),
        }
    }

    /// Delay before retry number `attempt` (0-based).
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    #[must_use]
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let cap_ms = self.max_delay.as_millis() as f64;

        if !delay_ms.is_finite() || delay_ms >= cap_ms {
            self.max_delay
        } else {
            Duration::from_millis(delay_ms as u64)
        }
    }

    fn exhausted(&self, attempt: u32) -> bool {
        self.max_retries.is_some_and(|max| attempt >= max)
    }
}

/// Builder for [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Set maximum number of retries.
    #[must_use]
    pub const fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = Some(max_retries);
        self
    }

    /// Set initial delay before first retry.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set maximum delay.
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Build the [`RetryPolicy`].
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        self.policy
    }
}

/// Retry an async operation with exponential backoff.
///
/// `operation_name` only labels logs.
///
/// # Errors
///
/// Returns the last error once the policy's retries are exhausted.
pub async fn retry_with_backoff<F, Fut, T, E>(
    policy: &RetryPolicy,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_with_predicate(policy, operation_name, operation, |_| true).await
}

/// Retry an async operation, but only for errors `is_retryable` accepts.
///
/// # Errors
///
/// Returns the error immediately if it is not retryable, or the last error
/// once the policy's retries are exhausted.
pub async fn retry_with_predicate<F, Fut, T, E, P>(
    policy: &RetryPolicy,
    operation_name: &str,
    mut operation: F,
    is_retryable: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt: u32 = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    RetryMetrics::record_success();
                    tracing::info!(operation = operation_name, attempt, "Operation succeeded after retry");
                }
                return Ok(result);
            },
            Err(err) => {
                if !is_retryable(&err) {
                    tracing::warn!(operation = operation_name, error = %err, "Error is not retryable");
                    return Err(err);
                }

                if policy.exhausted(attempt) {
                    RetryMetrics::record_exhausted();
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Operation failed after max retries"
                    );
                    return Err(err);
                }

                let delay = policy.delay_for_attempt(attempt);
                RetryMetrics::record_attempt();
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "Operation failed, retrying"
                );

                sleep(delay).await;
                attempt = attempt.saturating_add(1);
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::builder()
            .max_retries(max_retries)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build()
    }

    #[test]
    fn delay_grows_exponentially_up_to_the_cap() {
        let policy = RetryPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_millis(500))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(u32::MAX), Duration::from_millis(500));
    }

    #[test]
    fn exhausts_after_max_retries() {
        let unlimited = RetryPolicy {
            max_retries: None,
            ..RetryPolicy::default()
        };
        assert!(!unlimited.exhausted(10_000));
        assert!(!fast(2).exhausted(1));
        assert!(fast(2).exhausted(2));
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result = retry_with_backoff(&fast(3), "test", || {
            let c = Arc::clone(&counter);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst);
                if attempt < 2 { Err(format!("attempt {attempt} failed")) } else { Ok(42) }
            }
        })
        .await;

        assert_eq!(result, Ok(42));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_with_the_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), String> = retry_with_backoff(&fast(2), "test", || {
            let c = Arc::clone(&counter);
            async move {
                let attempt = c.fetch_add(1, Ordering::SeqCst);
                Err(format!("failure {attempt}"))
            }
        })
        .await;

        assert_eq!(result, Err("failure 2".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_immediately() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);

        let result: Result<(), String> = retry_with_predicate(
            &fast(5),
            "test",
            || {
                let c = Arc::clone(&counter);
                async move {
                    c.fetch_add(1, Ordering::SeqCst);
                    Err("permanent".to_string())
                }
            },
            |e| e.contains("transient"),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
