//! Bounded retry with exponential backoff for storage operations
//!
//! Transient failures are retried with jittered, doubling delays. Once the
//! attempt budget is spent the failure escalates to
//! [`Error::StorageFatal`], which the node treats as a reason to shut down.

use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Default base delay between attempts
const BASE_DELAY: Duration = Duration::from_millis(100);

/// Default cap on the delay between attempts
const MAX_DELAY: Duration = Duration::from_secs(5);

/// Default number of attempts before escalating
const MAX_ATTEMPTS: usize = 5;

/// Retry policy for storage operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: usize,
    base_delay: Duration,
    max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY,
            max_delay: MAX_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Create a new retry policy with custom parameters
    pub fn new(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay,
        }
    }

    /// Maximum number of attempts
    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Delay before the attempt following `attempt` (1-based), without jitter
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX).min(16);
        std::cmp::min(self.base_delay.saturating_mul(1 << exponent), self.max_delay)
    }

    /// Execute `operation` until it succeeds, fails permanently or runs out
    /// of attempts
    pub async fn execute<F, Fut, T>(&self, operation: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if !e.is_retryable() => {
                    debug!(operation, error = %e, "Non-retryable error");
                    return Err(e);
                }
                Err(e) if attempt >= self.max_attempts => {
                    error!(operation, attempts = attempt, error = %e, "Retry budget exhausted");
                    return Err(Error::storage_fatal(attempt, format!("{}: {}", operation, e)));
                }
                Err(e) => {
                    let delay = self.delay_for(attempt);
                    // Jitter to avoid retry storms
                    let jitter = delay.as_millis() as f64 * 0.1 * rand::random::<f64>();
                    let delay = delay + Duration::from_millis(jitter as u64);

                    warn!(operation, attempt, error = %e, ?delay, "Operation failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
