//! Retry policy with linear backoff
//!
//! A failed retrieval is retried only when its error is transient
//! ([`IsRetryable`]) and the task still has retries left. The delay before
//! retry number `n` is `n * base_delay`, so with the default one second base
//! the waits are 1s, 2s, 3s, ...
//!
//! # Example
//!
//! ```
//! use media_batch_dl::config::RetryConfig;
//! use media_batch_dl::error::FetchError;
//! use media_batch_dl::retry::{RetryDecision, RetryPolicy};
//! use std::time::Duration;
//!
//! let policy = RetryPolicy::new(&RetryConfig::default());
//!
//! let decision = policy.decide(&FetchError::ServerError { status: 503 }, 1);
//! assert_eq!(decision, RetryDecision::RetryAfter(Duration::from_secs(2)));
//!
//! let decision = policy.decide(&FetchError::NotFound, 0);
//! assert_eq!(decision, RetryDecision::GiveUp);
//! ```

use crate::config::RetryConfig;
use crate::error::FetchError;
use rand::Rng;
use std::time::Duration;

/// Trait for errors that can be classified as retryable or not
///
/// Transient failures (network errors, timeouts, 5xx) should return `true`.
/// Permanent failures (404, 403, malformed references) should return `false`.
pub trait IsRetryable {
    /// Returns true if the error is transient and the operation should be retried
    fn is_retryable(&self) -> bool;
}

impl IsRetryable for FetchError {
    fn is_retryable(&self) -> bool {
        match self {
            FetchError::ServerError { .. }
            | FetchError::Network(_)
            | FetchError::Timeout { .. } => true,
            FetchError::NotFound
            | FetchError::AccessDenied
            | FetchError::Http { .. }
            | FetchError::InvalidReference { .. } => false,
        }
    }
}

/// What to do after a failed attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryDecision {
    /// Wait for the delay, then dispatch again
    RetryAfter(Duration),
    /// The failure is terminal
    GiveUp,
}

/// Decides whether and when a failed task is retried
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
    jitter: bool,
}

impl RetryPolicy {
    /// Build a policy from configuration
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.base_delay,
            jitter: config.jitter,
        }
    }

    /// Maximum retries per task
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Backoff before retry number `retry_count` (linear, before jitter)
    pub fn backoff_delay(&self, retry_count: u32) -> Duration {
        self.base_delay.saturating_mul(retry_count)
    }

    /// Decide the fate of a task whose attempt failed after `retry_count` retries
    pub fn decide<E: IsRetryable>(&self, error: &E, retry_count: u32) -> RetryDecision {
        if !error.is_retryable() || retry_count >= self.max_retries {
            return RetryDecision::GiveUp;
        }

        let delay = self.backoff_delay(retry_count + 1);
        let delay = if self.jitter { add_jitter(delay) } else { delay };
        RetryDecision::RetryAfter(delay)
    }
}

/// Add random jitter to a delay to prevent thundering herd
///
/// Jitter is uniformly distributed between 0% and 100% of the delay.
/// This means the actual delay will be between `delay` and `2 * delay`.
fn add_jitter(delay: Duration) -> Duration {
    let mut rng = rand::thread_rng();
    let jitter_factor: f64 = rng.gen_range(0.0..=1.0);
    let jittered_secs = delay.as_secs_f64() * (1.0 + jitter_factor);
    Duration::from_secs_f64(jittered_secs)
}
