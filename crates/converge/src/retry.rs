//! Retry logic with exponential backoff for transient step failures.

use crate::clock::Clock;
use crate::error::StepError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Backoff policy for transient failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the first)
    pub max_attempts: u32,
    /// Base delay between retries
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Maximum delay between retries
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(120),
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            ..Default::default()
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }
}

/// Callback trait for retry notifications.
pub trait RetryCallback {
    /// Called before sleeping ahead of the next attempt.
    ///
    /// `attempt` is the 1-indexed attempt that just failed.
    fn on_retry(&mut self, attempt: u32, max_attempts: u32, error: &StepError, delay: Duration);
}

/// Execute an operation, retrying retryable errors with exponential backoff.
///
/// Non-retryable errors are returned immediately. When every attempt fails
/// the last error is returned.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    clock: &dyn Clock,
    callback: &mut dyn RetryCallback,
    mut operation: F,
) -> Result<T, StepError>
where
    F: FnMut() -> Result<T, StepError>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        match operation() {
            Ok(value) => return Ok(value),
            Err(e) => {
                if !e.is_retryable() || attempt + 1 >= max_attempts {
                    return Err(e);
                }

                let delay = config.delay_for_attempt(attempt);
                callback.on_retry(attempt + 1, max_attempts, &e, delay);
                clock.sleep(delay);
                attempt += 1;
            }
        }
    }
}
