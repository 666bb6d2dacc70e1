//! Retry-on-rate-limit executor with exponential backoff.
//!
//! [`execute`] wraps a single external call. When the call reports
//! [`PipelineError::RateLimited`] it sleeps and tries again, doubling the
//! delay each time, until the retry budget runs out. Every other error is
//! returned immediately.

use std::future::Future;
use std::time::Duration;

use crate::error::PipelineError;

/// Tunable parameters for the backoff strategy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each rate-limited attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            initial_delay: Duration::from_secs(10),
            max_delay: Duration::from_secs(120),
            multiplier: 2.0,
        }
    }
}

/// Calculate the next backoff delay, clamped to [`RetryPolicy::max_delay`].
pub fn next_delay(current: Duration, policy: &RetryPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}

/// Run `operation`, retrying it while it is rate limited.
pub async fn execute<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, PipelineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let mut delay = policy.initial_delay;
    let mut retries = 0u32;

    loop {
        match operation().await {
            Err(e) if e.is_rate_limited() && retries < policy.max_retries => {
                retries += 1;
                tracing::warn!(
                    retry = retries,
                    max_retries = policy.max_retries,
                    delay_ms = delay.as_millis() as u64,
                    "Rate limited, backing off",
                );
                tokio::time::sleep(delay).await;
                delay = next_delay(delay, policy);
            }
            Err(e) if e.is_rate_limited() => {
                tracing::error!(retries, "Rate limit retry budget exhausted");
                return Err(e);
            }
            other => return other,
        }
    }
}
