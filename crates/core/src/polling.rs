//! Bounded polling of external jobs.
//!
//! [`poll_until_terminal`] calls `poll_once` until the job reaches a terminal
//! state or the attempt budget runs out, sleeping cooperatively between
//! polls. Rate-limited polls do not consume an attempt: they wait
//! [`PollConfig::rate_limit_backoff`] and retry the same attempt.

use std::future::Future;
use std::time::Duration;

use crate::error::PipelineError;
use crate::types::{JobKind, JobProgress, MediaRef};

/// Upper bound on consecutive rate-limited polls before the error surfaces.
pub const DEFAULT_MAX_RATE_LIMIT_WAITS: u32 = 20;

/// Attempt budget and pacing for a polling loop.
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Non-rate-limited polls allowed before timing out.
    pub max_attempts: u32,
    /// Delay between two counted polls.
    pub interval: Duration,
    /// Delay after a rate-limited poll.
    pub rate_limit_backoff: Duration,
    /// Consecutive rate-limited polls tolerated before giving up.
    pub max_rate_limit_waits: u32,
}

impl PollConfig {
    /// Face-swap defaults: 15 polls, 3 s apart, 10 s after a 429.
    pub fn face_swap() -> Self {
        Self {
            max_attempts: 15,
            interval: Duration::from_secs(3),
            rate_limit_backoff: Duration::from_secs(10),
            max_rate_limit_waits: DEFAULT_MAX_RATE_LIMIT_WAITS,
        }
    }

    /// Generation defaults: 60 polls, 10 s apart, 10 s after a 429.
    pub fn generation() -> Self {
        Self {
            max_attempts: 60,
            interval: Duration::from_secs(10),
            rate_limit_backoff: Duration::from_secs(10),
            max_rate_limit_waits: DEFAULT_MAX_RATE_LIMIT_WAITS,
        }
    }
}

/// Poll a job until it completes, fails, or the budget is exhausted.
///
/// `poll_once` receives the 1-based attempt number it is serving. A
/// rate-limited poll is retried with the same number.
///
/// Returns the job's results on completion. A `Failed` observation maps to
/// `SwapFailed`/`GenerationFailed` and exhaustion to
/// `SwapTimeout`/`GenerationTimeout` depending on `kind`.
pub async fn poll_until_terminal<F, Fut>(
    kind: JobKind,
    config: &PollConfig,
    mut poll_once: F,
) -> Result<Vec<MediaRef>, PipelineError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<JobProgress, PipelineError>>,
{
    let mut attempts = 0u32;
    let mut rate_limit_waits = 0u32;

    while attempts < config.max_attempts {
        match poll_once(attempts + 1).await {
            Ok(JobProgress::Completed(urls)) if urls.is_empty() => {
                return Err(failed(kind, "job completed without any result".into()));
            }
            Ok(JobProgress::Completed(urls)) => {
                tracing::debug!(%kind, attempt = attempts + 1, "Job completed");
                return Ok(urls);
            }
            Ok(JobProgress::Failed(reason)) => return Err(failed(kind, reason)),
            Ok(progress) => {
                attempts += 1;
                rate_limit_waits = 0;
                tracing::trace!(%kind, attempt = attempts, status = ?progress.status(), "Job still in progress");
                if attempts < config.max_attempts {
                    tokio::time::sleep(config.interval).await;
                }
            }
            Err(e) if e.is_rate_limited() => {
                rate_limit_waits += 1;
                if rate_limit_waits > config.max_rate_limit_waits {
                    return Err(e);
                }
                tracing::warn!(
                    %kind,
                    attempt = attempts + 1,
                    backoff_ms = config.rate_limit_backoff.as_millis() as u64,
                    "Poll rate limited, retrying the same attempt",
                );
                tokio::time::sleep(config.rate_limit_backoff).await;
            }
            Err(e) => return Err(e),
        }
    }

    tracing::warn!(%kind, attempts, "Polling budget exhausted");
    Err(timed_out(kind, attempts))
}

fn failed(kind: JobKind, reason: String) -> PipelineError {
    match kind {
        JobKind::FaceSwap => PipelineError::SwapFailed {
            frame: None,
            reason,
        },
        JobKind::Generation => PipelineError::GenerationFailed { clip: None, reason },
    }
}

fn timed_out(kind: JobKind, attempts: u32) -> PipelineError {
    match kind {
        JobKind::FaceSwap => PipelineError::SwapTimeout {
            frame: None,
            attempts,
        },
        JobKind::Generation => PipelineError::GenerationTimeout {
            clip: None,
            attempts,
        },
    }
}
