//! Process-wide concurrency limits per downstream service.
//!
//! A single [`RateLimiter`] is built at startup and shared by `Arc` with every
//! client that talks to a quota-bound API. The downstream API keys are shared
//! across runs, so the limits are global rather than per run.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::error::PipelineError;

/// Default concurrent face-swap calls.
pub const DEFAULT_FACESWAP_PERMITS: usize = 3;
/// Default concurrent generation submissions (one task per key per window).
pub const DEFAULT_GENERATION_PERMITS: usize = 1;
/// Default concurrent uploads to the public file host.
pub const DEFAULT_UPLOAD_PERMITS: usize = 2;

/// Downstream services with their own quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceKey {
    FaceSwap,
    Generation,
    Upload,
}

impl fmt::Display for ServiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceKey::FaceSwap => f.write_str("face-swap"),
            ServiceKey::Generation => f.write_str("generation"),
            ServiceKey::Upload => f.write_str("upload"),
        }
    }
}

/// Scoped permit; the slot is released when this is dropped.
#[derive(Debug)]
pub struct RateLimitPermit {
    _permit: OwnedSemaphorePermit,
}

/// Fixed-capacity permit pools keyed by [`ServiceKey`].
#[derive(Debug)]
pub struct RateLimiter {
    pools: HashMap<ServiceKey, Pool>,
}

#[derive(Debug)]
struct Pool {
    capacity: usize,
    semaphore: Arc<Semaphore>,
}

impl RateLimiter {
    /// Build a limiter with the given per-service capacities.
    ///
    /// A capacity of zero is raised to one so that the service stays usable.
    pub fn new(limits: impl IntoIterator<Item = (ServiceKey, usize)>) -> Self {
        let pools = limits
            .into_iter()
            .map(|(service, capacity)| {
                let capacity = capacity.max(1);
                (
                    service,
                    Pool {
                        capacity,
                        semaphore: Arc::new(Semaphore::new(capacity)),
                    },
                )
            })
            .collect();
        Self { pools }
    }

    /// Capacity configured for `service`, if any.
    pub fn capacity(&self, service: ServiceKey) -> Option<usize> {
        self.pools.get(&service).map(|p| p.capacity)
    }

    /// Permits currently free for `service`.
    pub fn available(&self, service: ServiceKey) -> Option<usize> {
        self.pools
            .get(&service)
            .map(|p| p.semaphore.available_permits())
    }

    /// Wait for a free slot for `service`.
    ///
    /// Suspends the calling task (never the worker thread) until a permit is
    /// released.
    pub async fn acquire(&self, service: ServiceKey) -> Result<RateLimitPermit, PipelineError> {
        let pool = self.pools.get(&service).ok_or_else(|| {
            PipelineError::Internal(format!("no rate limit configured for {service}"))
        })?;

        if pool.semaphore.available_permits() == 0 {
            tracing::debug!(%service, capacity = pool.capacity, "Waiting for rate limit permit");
        }

        let permit = Arc::clone(&pool.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PipelineError::Internal(format!("{service} permit pool closed")))?;

        Ok(RateLimitPermit { _permit: permit })
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new([
            (ServiceKey::FaceSwap, DEFAULT_FACESWAP_PERMITS),
            (ServiceKey::Generation, DEFAULT_GENERATION_PERMITS),
            (ServiceKey::Upload, DEFAULT_UPLOAD_PERMITS),
        ])
    }
}
