//! Direct Kling image-to-video API, authenticated with signed bearer tokens.

use async_trait::async_trait;
use reelswap_core::error::PipelineError;
use reelswap_core::rate_limit::ServiceKey;
use reelswap_core::types::{JobProgress, MediaRef};
use serde::Deserialize;

use super::{GenerationRequest, KlingTokenSigner, Quality};
use crate::http::{self, HttpError};
use crate::task::TaskProvider;

pub const DEFAULT_KLING_BASE_URL: &str = "https://api.klingai.com";

const IMAGE2VIDEO_PATH: &str = "/v1/videos/image2video";
const MODEL_NAME: &str = "kling-v1";

pub struct KlingProvider {
    client: reqwest::Client,
    base_url: String,
    signer: KlingTokenSigner,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TaskData {
    task_id: String,
    #[serde(default)]
    task_status: Option<String>,
    #[serde(default)]
    task_status_msg: Option<String>,
    #[serde(default)]
    task_result: Option<TaskResult>,
}

#[derive(Debug, Deserialize)]
struct TaskResult {
    #[serde(default)]
    videos: Vec<Video>,
}

#[derive(Debug, Deserialize)]
struct Video {
    url: String,
}

impl KlingProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, signer: KlingTokenSigner) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            signer,
        }
    }

    fn generation_error(err: HttpError) -> PipelineError {
        err.into_pipeline(ServiceKey::Generation, |reason| {
            PipelineError::GenerationFailed { clip: None, reason }
        })
    }

    /// Send a request built for the current token. On `401` the token is
    /// re-signed and the request is sent exactly once more.
    async fn send_authorized<F>(&self, build: F) -> Result<reqwest::Response, PipelineError>
    where
        F: Fn(&str) -> reqwest::RequestBuilder + Send + Sync,
    {
        let token = self.signer.token()?;
        let response = build(&token)
            .send()
            .await
            .map_err(|e| Self::generation_error(e.into()))?;

        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        tracing::warn!("Kling rejected bearer token, re-signing once");
        self.signer.invalidate();
        let token = self.signer.token()?;
        build(&token)
            .send()
            .await
            .map_err(|e| Self::generation_error(e.into()))
    }

    async fn task_data(response: reqwest::Response) -> Result<TaskData, PipelineError> {
        let envelope: Envelope<TaskData> = http::parse_json(response)
            .await
            .map_err(Self::generation_error)?;
        if envelope.code != 0 {
            return Err(PipelineError::GenerationFailed {
                clip: None,
                reason: format!(
                    "Kling error {}: {}",
                    envelope.code,
                    envelope.message.unwrap_or_default()
                ),
            });
        }
        envelope.data.ok_or_else(|| PipelineError::GenerationFailed {
            clip: None,
            reason: "Kling response carried no data".into(),
        })
    }
}

fn progress_from(data: TaskData) -> JobProgress {
    match data.task_status.as_deref().unwrap_or("submitted") {
        "submitted" => JobProgress::Pending,
        "processing" => JobProgress::Running,
        "succeed" => JobProgress::Completed(
            data.task_result
                .map(|r| r.videos)
                .unwrap_or_default()
                .into_iter()
                .map(|v| MediaRef::Remote(v.url))
                .collect(),
        ),
        "failed" => JobProgress::Failed(
            data.task_status_msg
                .unwrap_or_else(|| "generation task failed".to_string()),
        ),
        other => {
            tracing::warn!(status = other, "Unknown Kling task status, treating as running");
            JobProgress::Running
        }
    }
}

#[async_trait]
impl TaskProvider for KlingProvider {
    type Request = GenerationRequest;

    fn name(&self) -> &str {
        "kling"
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        if request.sample_count > 1 {
            tracing::debug!(
                sample_count = request.sample_count,
                "Kling returns one video per task, ignoring sample count"
            );
        }
        let mode = match request.quality {
            Quality::Standard => "std",
            Quality::Pro => "pro",
        };
        let body = serde_json::json!({
            "model_name": MODEL_NAME,
            "prompt": request.prompt,
            "image": request.head_image_url,
            "image_tail": request.tail_image_url,
            "duration": request.duration_secs.to_string(),
            "mode": mode,
        });
        let url = format!("{}{IMAGE2VIDEO_PATH}", self.base_url);

        let response = self
            .send_authorized(|token| self.client.post(&url).bearer_auth(token).json(&body))
            .await?;
        Ok(Self::task_data(response).await?.task_id)
    }

    async fn poll(&self, task_id: &str) -> Result<JobProgress, PipelineError> {
        let url = format!("{}{IMAGE2VIDEO_PATH}/{task_id}", self.base_url);

        let response = self
            .send_authorized(|token| self.client.get(&url).bearer_auth(token))
            .await?;
        Ok(progress_from(Self::task_data(response).await?))
    }
}
