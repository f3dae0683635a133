//! Retry logic with exponential backoff and jitter.
//!
//! Provides configurable retry behavior for side-effecting operations with:
//! - Exponential backoff capped at a maximum delay
//! - Proportional jitter to prevent thundering herd
//! - A pluggable retryability predicate
//! - Cancellation that interrupts a pending backoff wait
//! - Statistics tracking

use crate::cancel::CancellationToken;
use crate::config::RetryDefaults;
use crate::error::{CovpagesError, Result};
use crate::resilience::classify;
use rand::Rng;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Predicate deciding whether an error is worth another attempt.
pub type RetryPredicate = Arc<dyn Fn(&CovpagesError) -> bool + Send + Sync>;

/// Configuration for retry behavior.
#[derive(Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first one). Never below 1.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Maximum delay cap.
    pub max_delay: Duration,
    /// Exponential base (typically 2.0 for doubling).
    pub multiplier: f64,
    /// Jitter as a fraction of the delay, in `[0, 1]`.
    pub jitter_fraction: f64,
    /// Which errors are retried.
    pub retry_if: RetryPredicate,
}

impl fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("max_attempts", &self.max_attempts)
            .field("initial_delay", &self.initial_delay)
            .field("max_delay", &self.max_delay)
            .field("multiplier", &self.multiplier)
            .field("jitter_fraction", &self.jitter_fraction)
            .finish_non_exhaustive()
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: RetryDefaults::MAX_ATTEMPTS,
            initial_delay: RetryDefaults::INITIAL_DELAY,
            max_delay: RetryDefaults::MAX_DELAY,
            multiplier: RetryDefaults::MULTIPLIER,
            jitter_fraction: RetryDefaults::JITTER_FRACTION,
            retry_if: Arc::new(|e| classify::is_retryable_error(e)),
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Preset for raw network calls: more attempts, shorter waits.
    pub fn network() -> Self {
        Self {
            max_attempts: RetryDefaults::NETWORK_MAX_ATTEMPTS,
            initial_delay: RetryDefaults::NETWORK_INITIAL_DELAY,
            max_delay: RetryDefaults::NETWORK_MAX_DELAY,
            jitter_fraction: RetryDefaults::NETWORK_JITTER_FRACTION,
            retry_if: Arc::new(|e| {
                classify::is_retryable_network_error(e) || classify::is_retryable_http_error(e)
            }),
            ..Self::default()
        }
    }

    /// Preset for the GitHub API: long waits to ride out rate limiting.
    pub fn github_api() -> Self {
        Self {
            max_attempts: RetryDefaults::GITHUB_MAX_ATTEMPTS,
            initial_delay: RetryDefaults::GITHUB_INITIAL_DELAY,
            max_delay: RetryDefaults::GITHUB_MAX_DELAY,
            retry_if: Arc::new(|e| classify::is_retryable_github_error(e)),
            ..Self::default()
        }
    }

    /// Set the maximum number of attempts (clamped to at least 1).
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Set the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Set the maximum delay cap.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    /// Set the jitter fraction (clamped to `[0, 1]`).
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = fraction.clamp(0.0, 1.0);
        self
    }

    /// Replace the retryability predicate.
    pub fn with_retry_if(
        mut self,
        predicate: impl Fn(&CovpagesError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.retry_if = Arc::new(predicate);
        self
    }

    /// Calculate the delay after a failed attempt (1-indexed).
    ///
    /// `min(initial_delay * multiplier^(attempt-1), max_delay)`, then scaled by
    /// a random factor in `[1 - jitter, 1 + jitter]` and re-capped.
    pub fn calculate_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let delay_secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        let max_secs = self.max_delay.as_secs_f64();
        let capped_secs = if delay_secs.is_finite() {
            delay_secs.min(max_secs)
        } else {
            max_secs
        };

        let jitter = self.jitter_fraction.clamp(0.0, 1.0);
        let final_secs = if jitter > 0.0 {
            let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
            (capped_secs * factor).min(max_secs)
        } else {
            capped_secs
        };

        Duration::from_secs_f64(final_secs.max(0.0))
    }
}

/// Statistics about a retry operation.
#[derive(Debug, Clone, Default)]
pub struct RetryStats {
    /// Number of attempts made.
    pub attempts: u32,
    /// Total delay accumulated.
    pub total_delay: Duration,
    /// Whether the operation ultimately succeeded.
    pub success: bool,
    /// Last error message if failed.
    pub last_error: Option<String>,
}

/// Retry an async operation and report statistics alongside the result.
///
/// Cancellation is checked at the top of every attempt and interrupts a
/// pending backoff wait.
pub async fn retry_with_stats<F, Fut, T>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    mut operation: F,
) -> (Result<T>, RetryStats)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut stats = RetryStats::default();
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        if let Err(e) = cancel.check() {
            return (Err(e), stats);
        }

        stats.attempts = attempt;

        let err = match operation().await {
            Ok(value) => {
                stats.success = true;
                if attempt > 1 {
                    debug!(attempts = attempt, "Operation succeeded after retries");
                }
                return (Ok(value), stats);
            }
            Err(e) => e,
        };

        stats.last_error = Some(err.to_string());

        if !(policy.retry_if)(&err) {
            debug!(error = %err, "Error is not retryable");
            return (
                Err(CovpagesError::NonRetryable {
                    source: Box::new(err),
                }),
                stats,
            );
        }

        if attempt >= max_attempts {
            warn!(
                attempts = max_attempts,
                error = %err,
                "All retry attempts exhausted"
            );
            return (
                Err(CovpagesError::RetryExhausted {
                    attempts: max_attempts,
                    source: Box::new(err),
                }),
                stats,
            );
        }

        let delay = policy.calculate_delay(attempt);
        stats.total_delay += delay;

        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            error = %err,
            "Attempt failed, retrying"
        );

        if let Err(e) = cancel.sleep(delay).await {
            return (Err(e), stats);
        }
    }
}

/// Retry an async operation with exponential backoff.
pub async fn retry<F, Fut, T>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    retry_with_stats(cancel, policy, operation).await.0
}
