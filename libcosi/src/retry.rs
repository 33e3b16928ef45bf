//! Retry with exponential backoff and jitter.
//!
//! Used for every operation that can fail transiently: optimistic-concurrency
//! conflicts and adapter unavailability.  Jitter avoids thundering-herd
//! retries when many requests hit the same fault.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::CosiError;

/// Backoff configuration for transiently failing operations.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts; 0 means retry forever.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the computed delay.
    pub max_delay: Duration,
    /// Exponential growth factor.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Config with a bounded number of attempts.
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            ..Default::default()
        }
    }

    /// Fast config for tests: tiny delays, bounded attempts.
    pub fn fast() -> Self {
        Self {
            max_attempts: 20,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
        }
    }

    /// Exponential delay for the given zero-based attempt, capped at
    /// `max_delay`, with ±50% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.min(30) as i32);
        let capped = base.min(self.max_delay.as_secs_f64());
        let jitter: f64 = rand::rng().random_range(0.5..1.5);
        Duration::from_secs_f64(capped * jitter)
    }
}

/// Run `operation` until it succeeds or fails terminally.
///
/// Transient errors (per [`CosiError::is_transient`]) are retried with
/// backoff up to `max_attempts`; terminal errors are returned immediately.
pub async fn retry_with_backoff<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T, CosiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CosiError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => {
                attempt += 1;
                if config.max_attempts != 0 && attempt >= config.max_attempts {
                    warn!(operation = operation_name, attempts = attempt, error = %e,
                        "giving up after transient failures");
                    return Err(e);
                }
                let delay = config.delay_for(attempt - 1);
                warn!(operation = operation_name, attempt, delay_ms = delay.as_millis() as u64,
                    error = %e, "transient failure, retrying");
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}
