//! Retry logic with exponential backoff for transient backend errors.

use crate::error::Error;
use std::thread;
use std::time::Duration;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first one
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Upper bound for a single delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryConfig {
    /// Create a new retry config with custom settings.
    pub fn new(max_attempts: u32, base_delay: Duration, backoff_factor: f64) -> Self {
        Self {
            max_attempts,
            base_delay,
            backoff_factor,
            max_delay: Duration::from_secs(30),
        }
    }

    /// Calculate the delay for a given attempt number (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay = self.base_delay.as_secs_f64() * self.backoff_factor.powi(exponent);
        let capped = delay.min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    /// Create a config that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

/// Callback trait for retry progress notifications.
pub trait RetryCallback {
    /// Called before sleeping ahead of the next attempt.
    ///
    /// # Arguments
    /// * `attempt` - Attempt that just failed (1-indexed)
    /// * `max_attempts` - Maximum number of attempts
    /// * `error` - The error that triggered the retry
    /// * `delay` - Time until the next attempt
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration);
}

/// Callback that logs each retry at warn level, prefixed with an operation label.
pub struct LogRetry<'a>(pub &'a str);

impl RetryCallback for LogRetry<'_> {
    fn on_retry(&self, attempt: u32, max_attempts: u32, error: &Error, delay: Duration) {
        log::warn!(
            "{}: attempt {}/{} failed: {}. Retrying in {}ms",
            self.0,
            attempt,
            max_attempts,
            error,
            delay.as_millis()
        );
    }
}

/// The error that ended a retried operation.
#[derive(Debug)]
pub struct RetryFailure {
    /// Last error returned by the operation
    pub error: Error,
    /// Number of attempts made
    pub attempts: u32,
}

impl RetryFailure {
    /// Whether the operation kept failing transiently until the budget ran out.
    pub fn exhausted(&self) -> bool {
        self.error.is_retryable()
    }
}

impl From<RetryFailure> for Error {
    fn from(failure: RetryFailure) -> Self {
        failure.error
    }
}

/// Execute an operation with retry logic.
///
/// Retries the operation while it returns a retryable error, sleeping with
/// exponential backoff between attempts. Non-retryable errors return at once.
pub fn with_retry<T, F>(
    config: &RetryConfig,
    callback: Option<&dyn RetryCallback>,
    mut operation: F,
) -> Result<T, RetryFailure>
where
    F: FnMut() -> crate::Result<T>,
{
    let max_attempts = config.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;
        match operation() {
            Ok(result) => return Ok(result),
            Err(error) => {
                if !error.is_retryable() || attempt >= max_attempts {
                    return Err(RetryFailure {
                        error,
                        attempts: attempt,
                    });
                }

                let delay = config.delay_for_attempt(attempt - 1);
                if let Some(cb) = callback {
                    cb.on_retry(attempt, max_attempts, &error, delay);
                }
                thread::sleep(delay);
            }
        }
    }
}
