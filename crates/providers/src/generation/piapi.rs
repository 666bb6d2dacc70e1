//! PiAPI-hosted Kling generation API (static API key).

use async_trait::async_trait;
use reelswap_core::error::PipelineError;
use reelswap_core::rate_limit::ServiceKey;
use reelswap_core::types::{JobProgress, MediaRef};
use serde::Deserialize;

use super::GenerationRequest;
use crate::http::{self, HttpError};
use crate::task::TaskProvider;

/// Production base URL of the PiAPI Kling endpoints.
pub const PIAPI_KLING_BASE_URL: &str = "https://api.piapi.ai/v1/kling";

/// Model version requested from PiAPI.
const MODEL_VERSION: &str = "2.0-master";

pub struct PiApiGeneration {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct TaskCreated {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct TaskState {
    status: String,
    #[serde(default)]
    video_url: Option<String>,
    #[serde(default)]
    video_urls: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

impl PiApiGeneration {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn generation_error(err: HttpError) -> PipelineError {
        err.into_pipeline(ServiceKey::Generation, |reason| {
            PipelineError::GenerationFailed { clip: None, reason }
        })
    }
}

fn progress_from(state: TaskState) -> JobProgress {
    match state.status.to_ascii_uppercase().as_str() {
        "QUEUED" | "PENDING" => JobProgress::Pending,
        "RUNNING" | "PROCESSING" => JobProgress::Running,
        "COMPLETED" => JobProgress::Completed(
            state
                .video_url
                .into_iter()
                .chain(state.video_urls)
                .filter(|u| !u.is_empty())
                .map(MediaRef::Remote)
                .collect(),
        ),
        "FAILED" => JobProgress::Failed(
            state
                .error
                .unwrap_or_else(|| "generation task failed".to_string()),
        ),
        other => {
            tracing::warn!(status = other, "Unknown generation status, treating as running");
            JobProgress::Running
        }
    }
}

#[async_trait]
impl TaskProvider for PiApiGeneration {
    type Request = GenerationRequest;

    fn name(&self) -> &str {
        "piapi"
    }

    async fn submit(&self, request: &GenerationRequest) -> Result<String, PipelineError> {
        let body = serde_json::json!({
            "model_version": MODEL_VERSION,
            "prompt": request.prompt,
            "duration": request.duration_secs,
            "aspect_ratio": request.aspect_ratio,
            "quality": request.quality,
            "num_samples": request.sample_count,
            "image_url": request.head_image_url,
            "tail_image_url": request.tail_image_url,
        });

        let response = self
            .client
            .post(format!("{}/task", self.base_url))
            .header("x-api-key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::generation_error(e.into()))?;

        let created: TaskCreated = http::parse_json(response)
            .await
            .map_err(Self::generation_error)?;
        Ok(created.task_id)
    }

    async fn poll(&self, task_id: &str) -> Result<JobProgress, PipelineError> {
        let response = self
            .client
            .get(format!("{}/task/{}", self.base_url, task_id))
            .header("x-api-key", &self.api_key)
            .send()
            .await
            .map_err(|e| Self::generation_error(e.into()))?;

        let state: TaskState = http::parse_json(response)
            .await
            .map_err(Self::generation_error)?;
        Ok(progress_from(state))
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use axum::extract::Path;
    use axum::http::StatusCode;
    use axum::routing::{get, post};
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::test_support::spawn_server;

    #[tokio::test]
    async fn submit_sends_defaults() {
        async fn create(Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
            let expected = json!({
                "model_version": "2.0-master",
                "prompt": "wave",
                "duration": 5,
                "aspect_ratio": "9:16",
                "quality": "standard",
                "num_samples": 2,
                "image_url": "https://img/start.png",
                "tail_image_url": "https://img/middle.png",
            });
            if body != expected {
                return (StatusCode::BAD_REQUEST, Json(json!({"error": body})));
            }
            (StatusCode::OK, Json(json!({"task_id": "kl-1", "status": "QUEUED"})))
        }
        let base = spawn_server(Router::new().route("/task", post(create))).await;
        let provider = PiApiGeneration::new(reqwest::Client::new(), base, "key");

        let request =
            GenerationRequest::new("wave", "https://img/start.png", "https://img/middle.png")
                .unwrap();
        assert_eq!(provider.submit(&request).await.unwrap(), "kl-1");
    }

    #[tokio::test]
    async fn poll_maps_statuses_and_urls() {
        async fn state(Path(id): Path<String>) -> Json<Value> {
            Json(match id.as_str() {
                "queued" => json!({"status": "QUEUED"}),
                "running" => json!({"status": "RUNNING"}),
                "done" => json!({"status": "COMPLETED", "video_url": "https://v/1.mp4"}),
                _ => json!({"status": "FAILED"}),
            })
        }
        let base = spawn_server(Router::new().route("/task/{id}", get(state))).await;
        let provider = PiApiGeneration::new(reqwest::Client::new(), base, "key");

        assert_eq!(provider.poll("queued").await.unwrap(), JobProgress::Pending);
        assert_eq!(provider.poll("running").await.unwrap(), JobProgress::Running);
        assert_eq!(
            provider.poll("done").await.unwrap(),
            JobProgress::Completed(vec![MediaRef::Remote("https://v/1.mp4".into())])
        );
        assert_matches!(provider.poll("other").await.unwrap(), JobProgress::Failed(_));
    }

    #[tokio::test]
    async fn rate_limit_on_submit_is_classified() {
        async fn busy() -> StatusCode {
            StatusCode::TOO_MANY_REQUESTS
        }
        let base = spawn_server(Router::new().route("/task", post(busy))).await;
        let provider = PiApiGeneration::new(reqwest::Client::new(), base, "key");

        let request = GenerationRequest::new("wave", "https://a/1.png", "https://a/2.png").unwrap();
        assert_matches!(
            provider.submit(&request).await,
            Err(PipelineError::RateLimited {
                service: ServiceKey::Generation
            })
        );
    }
}
