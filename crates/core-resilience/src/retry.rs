//! Retry with exponential backoff and cooperative cancellation
//!
//! Transient failures are retried with exponentially growing delays, capped at
//! `max_backoff`. Permanent failures are returned immediately. A
//! [`CancellationToken`] is checked before every attempt and raced against
//! both the operation and the backoff sleep, so a cancelled caller never
//! waits out a full backoff.
//!
//! # Example
//!
//! ```
//! use sensus_core_resilience::{ResilienceError, RetryPolicy};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), ResilienceError> {
//! let policy = RetryPolicy::default();
//! let cancel = CancellationToken::new();
//!
//! let value = policy
//!     .execute(&cancel, |_attempt| async { Ok::<_, ResilienceError>(42) })
//!     .await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use crate::error::ResilienceError;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Configuration for retry behavior
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries after the first attempt
    pub max_retries: usize,
    /// Delay before the first retry
    pub initial_backoff: Duration,
    /// Upper bound for any single delay
    pub max_backoff: Duration,
    /// Backoff multiplier (exponential backoff)
    pub backoff_multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that makes exactly one attempt
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Delay to wait before retry number `retry` (1-based)
    pub fn backoff_for(&self, retry: usize) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let exponent = (retry - 1).min(i32::MAX as usize) as i32;
        let secs = self.initial_backoff.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_backoff.as_secs_f64() {
            self.max_backoff
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Execute `op` until it succeeds, fails permanently, runs out of
    /// retries, or `cancel` fires.
    ///
    /// The closure receives the 1-based attempt number. When retries are
    /// exhausted the last transient error is returned unchanged.
    pub async fn execute<F, Fut, T>(
        &self,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, ResilienceError>
    where
        F: FnMut(usize) -> Fut,
        Fut: Future<Output = Result<T, ResilienceError>>,
    {
        let mut attempt = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(ResilienceError::Cancelled);
            }
            attempt += 1;

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ResilienceError::Cancelled),
                outcome = op(attempt) => outcome,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt <= self.max_retries => {
                    let delay = self.backoff_for(attempt);
                    debug!(attempt, ?delay, error = %e, "retrying after transient failure");

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(ResilienceError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}
