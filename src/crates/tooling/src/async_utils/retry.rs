//! Retry logic with exponential backoff
//!
//! Provides a configurable retry policy for transient failures in async
//! operations, with optional jitter to avoid thundering herds.

use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Configuration for retrying failed operations
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first)
    pub max_attempts: usize,

    /// Initial interval between retries in seconds
    pub initial_interval: f64,

    /// Multiplier for the interval after each retry
    pub backoff_factor: f64,

    /// Maximum interval between retries in seconds
    pub max_interval: f64,

    /// Whether to add random jitter to intervals
    pub jitter: bool,
}

impl RetryPolicy {
    /// Create a new retry policy with the given max attempts
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            initial_interval: 0.5,
            backoff_factor: 2.0,
            max_interval: 30.0,
            jitter: true,
        }
    }

    /// Set the initial interval between retries
    pub fn with_initial_interval(mut self, seconds: f64) -> Self {
        self.initial_interval = seconds;
        self
    }

    /// Set the maximum interval between retries
    pub fn with_max_interval(mut self, seconds: f64) -> Self {
        self.max_interval = seconds;
        self
    }

    /// Enable or disable jitter
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Calculate the delay before a given retry (0-indexed)
    ///
    /// Exponential backoff `initial_interval * backoff_factor^attempt`,
    /// capped at `max_interval`, with jitter in [0.5, 1.5] when enabled.
    pub fn calculate_delay(&self, attempt: usize) -> Duration {
        let base = self.initial_interval * self.backoff_factor.powi(attempt as i32);
        let capped = base.min(self.max_interval);

        let final_delay = if self.jitter {
            let mut rng = rand::thread_rng();
            capped * rng.gen_range(0.5..=1.5)
        } else {
            capped
        };

        Duration::from_secs_f64(final_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3)
    }
}

/// Execute an operation with retry
///
/// Runs `operation` up to `policy.max_attempts` times, sleeping between
/// attempts according to the policy. The `label` appears in log lines.
/// Callers that must not retry certain errors filter via `is_retryable`.
pub async fn with_retry<F, Fut, T, E>(
    policy: &RetryPolicy,
    label: &str,
    is_retryable: impl Fn(&E) -> bool,
    mut operation: F,
) -> std::result::Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = std::result::Result<T, E>>,
    E: std::fmt::Display,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        if attempt > 0 {
            let delay = policy.calculate_delay(attempt - 1);
            debug!(label = %label, attempt, delay_ms = delay.as_millis() as u64, "Retrying after delay");
            sleep(delay).await;
        }

        match operation().await {
            Ok(result) => {
                if attempt > 0 {
                    debug!(label = %label, attempt, "Retry succeeded");
                }
                return Ok(result);
            }
            Err(e) => {
                let retryable = is_retryable(&e);
                warn!(
                    label = %label,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    retryable,
                    error = %e,
                    "Operation failed"
                );
                last_error = Some(e);
                if !retryable {
                    break;
                }
            }
        }
    }

    Err(last_error.expect("at least one attempt was made"))
}
