//! The submit/poll contract shared by asynchronous task APIs.
//!
//! Face-swap and video-generation services both accept a request, hand back
//! a task id, and report progress on demand. [`TaskProvider`] captures that
//! contract; [`TaskClient`] binds a provider to the process-wide rate
//! limiter, the rate-limit retry executor and the bounded poller.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reelswap_core::error::PipelineError;
use reelswap_core::polling::{self, PollConfig};
use reelswap_core::rate_limit::{RateLimiter, ServiceKey};
use reelswap_core::retry::{self, RetryPolicy};
use reelswap_core::types::{JobKind, JobProgress, MediaRef};

/// An external service exposing asynchronous tasks.
///
/// Implementations map their own wire statuses onto [`JobProgress`] and
/// their HTTP failures onto [`PipelineError`] (429 always becomes
/// `RateLimited`).
#[async_trait]
pub trait TaskProvider: Send + Sync {
    /// Provider-specific request payload.
    type Request: Send + Sync;

    /// Short identifier used in logs, e.g. `"piapi"`.
    fn name(&self) -> &str;

    /// Submit a new task and return its id.
    async fn submit(&self, request: &Self::Request) -> Result<String, PipelineError>;

    /// Fetch the current progress of a task.
    async fn poll(&self, task_id: &str) -> Result<JobProgress, PipelineError>;
}

/// Flow-control settings for one [`TaskClient`].
#[derive(Debug, Clone)]
pub struct TaskClientConfig {
    pub retry: RetryPolicy,
    pub poll: PollConfig,
    /// Pause held inside the submission permit before each submit.
    pub submit_delay: Duration,
}

impl TaskClientConfig {
    pub fn face_swap() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll: PollConfig::face_swap(),
            submit_delay: Duration::ZERO,
        }
    }

    pub fn generation() -> Self {
        Self {
            retry: RetryPolicy::default(),
            poll: PollConfig::generation(),
            submit_delay: Duration::from_secs(3),
        }
    }
}

/// A [`TaskProvider`] wrapped in rate limiting, retry and bounded polling.
pub struct TaskClient<R> {
    provider: Arc<dyn TaskProvider<Request = R>>,
    kind: JobKind,
    service: ServiceKey,
    limiter: Arc<RateLimiter>,
    config: TaskClientConfig,
}

impl<R> Clone for TaskClient<R> {
    fn clone(&self) -> Self {
        Self {
            provider: Arc::clone(&self.provider),
            kind: self.kind,
            service: self.service,
            limiter: Arc::clone(&self.limiter),
            config: self.config.clone(),
        }
    }
}

impl<R: Send + Sync + 'static> TaskClient<R> {
    pub fn new(
        provider: Arc<dyn TaskProvider<Request = R>>,
        kind: JobKind,
        limiter: Arc<RateLimiter>,
        config: TaskClientConfig,
    ) -> Self {
        let service = match kind {
            JobKind::FaceSwap => ServiceKey::FaceSwap,
            JobKind::Generation => ServiceKey::Generation,
        };
        Self {
            provider,
            kind,
            service,
            limiter,
            config,
        }
    }

    pub fn provider_name(&self) -> &str {
        self.provider.name()
    }

    pub fn kind(&self) -> JobKind {
        self.kind
    }

    /// Submit under the service permit, retrying on rate limits.
    ///
    /// The permit is held across the pre-submission delay and every retry,
    /// so submissions to the same service never overlap beyond its limit.
    pub async fn submit(&self, request: &R) -> Result<String, PipelineError> {
        let _permit = self.limiter.acquire(self.service).await?;

        if !self.config.submit_delay.is_zero() {
            tokio::time::sleep(self.config.submit_delay).await;
        }

        let task_id = retry::execute(&self.config.retry, || self.provider.submit(request)).await?;

        tracing::info!(
            provider = self.provider.name(),
            kind = %self.kind,
            task_id = %task_id,
            "Task submitted",
        );
        Ok(task_id)
    }

    /// One status check, retried on rate limits.
    pub async fn poll_once(&self, task_id: &str) -> Result<JobProgress, PipelineError> {
        retry::execute(&self.config.retry, || self.provider.poll(task_id)).await
    }

    /// Poll `task_id` until it is terminal or the budget runs out.
    pub async fn wait(&self, task_id: &str) -> Result<Vec<MediaRef>, PipelineError> {
        self.wait_with(task_id, |_| async {}).await
    }

    /// Like [`wait`](Self::wait), awaiting `observe` on every successful
    /// observation before acting on it.
    pub async fn wait_with<F, Fut>(
        &self,
        task_id: &str,
        observe: F,
    ) -> Result<Vec<MediaRef>, PipelineError>
    where
        F: Fn(JobProgress) -> Fut + Send + Sync,
        Fut: Future<Output = ()> + Send,
    {
        let observe = &observe;

        let result = polling::poll_until_terminal(self.kind, &self.config.poll, |attempt| {
            let fut = self.poll_once(task_id);
            async move {
                let progress = fut.await?;
                tracing::debug!(
                    provider = self.provider.name(),
                    task_id,
                    attempt,
                    status = ?progress.status(),
                    "Polled task",
                );
                observe(progress.clone()).await;
                Ok(progress)
            }
        })
        .await;

        match &result {
            Ok(urls) => {
                tracing::info!(task_id, results = urls.len(), kind = %self.kind, "Task completed")
            }
            Err(e) => tracing::warn!(task_id, kind = %self.kind, error = %e, "Task did not complete"),
        }
        result
    }

    /// Submit and wait in one call.
    pub async fn run(&self, request: &R) -> Result<Vec<MediaRef>, PipelineError> {
        let task_id = self.submit(request).await?;
        self.wait(&task_id).await
    }
}
