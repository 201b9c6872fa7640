//! Retry and timeout helpers shared by the fetch services

use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::{AppError, AppResult};

/// Upper bound on the backoff exponent so the shift never overflows
const MAX_BACKOFF_EXPONENT: u32 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// `base * 2^attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << attempt.min(MAX_BACKOFF_EXPONENT))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000))
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// policy's attempts are used up. The last error is returned.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, operation: &str, mut op: F) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AppResult<T>>,
{
    let attempts = policy.max_retries.max(1);
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) if attempt + 1 >= attempts => return Err(e),
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

/// Race `fut` against a timer; losing the race is an `AppError::Timeout`.
///
/// The inner future is dropped on timeout, its result is never observed.
pub async fn with_timeout<T, Fut>(after: Duration, operation: &str, fut: Fut) -> AppResult<T>
where
    Fut: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout {
            operation: operation.to_string(),
            after,
        }),
    }
}
