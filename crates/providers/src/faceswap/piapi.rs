//! PiAPI hosted face-swap task API.

use async_trait::async_trait;
use reelswap_core::error::PipelineError;
use reelswap_core::rate_limit::ServiceKey;
use reelswap_core::types::{JobProgress, MediaRef};
use serde::Deserialize;

use super::SwapRequest;
use crate::http::{self, HttpError};
use crate::task::TaskProvider;

/// Production base URL of the face-swap API.
pub const PIAPI_FACESWAP_BASE_URL: &str = "https://api.piapi.ai/api/face_swap/v1";

/// Client for PiAPI's `face_swap/v1` endpoints.
pub struct PiApiFaceSwap {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmitData {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct FetchData {
    status: String,
    #[serde(default)]
    result_url: Option<String>,
    #[serde(default)]
    error_messages: Option<serde_json::Value>,
}

impl PiApiFaceSwap {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    fn swap_error(err: HttpError) -> PipelineError {
        err.into_pipeline(ServiceKey::FaceSwap, |reason| PipelineError::SwapFailed {
            frame: None,
            reason,
        })
    }

    fn missing_data(message: Option<String>) -> PipelineError {
        PipelineError::SwapFailed {
            frame: None,
            reason: message.unwrap_or_else(|| "response carried no data".to_string()),
        }
    }
}

/// Map a provider status string onto [`JobProgress`].
fn progress_from(data: FetchData) -> JobProgress {
    match data.status.to_ascii_uppercase().as_str() {
        "QUEUED" | "PENDING" => JobProgress::Pending,
        "RUNNING" | "PROCESSING" => JobProgress::Running,
        "COMPLETED" | "SUCCESS" => JobProgress::Completed(
            data.result_url
                .into_iter()
                .filter(|u| !u.is_empty())
                .map(MediaRef::Remote)
                .collect(),
        ),
        "FAILED" => JobProgress::Failed(
            data.error_messages
                .map(|v| v.to_string())
                .unwrap_or_else(|| "face swap task failed".to_string()),
        ),
        other => {
            tracing::warn!(status = other, "Unknown face-swap status, treating as running");
            JobProgress::Running
        }
    }
}

#[async_trait]
impl TaskProvider for PiApiFaceSwap {
    type Request = SwapRequest;

    fn name(&self) -> &str {
        "piapi"
    }

    async fn submit(&self, request: &SwapRequest) -> Result<String, PipelineError> {
        let body = serde_json::json!({
            "target_image": http::image_data_url(&request.target),
            "swap_image": http::image_data_url(&request.face),
            "result_type": "url",
        });

        let response = self
            .client
            .post(format!("{}/async", self.base_url))
            .header("X-API-Key", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::swap_error(e.into()))?;

        let envelope: Envelope<SubmitData> =
            http::parse_json(response).await.map_err(Self::swap_error)?;
        let data = envelope
            .data
            .ok_or_else(|| Self::missing_data(envelope.message))?;
        Ok(data.task_id)
    }

    async fn poll(&self, task_id: &str) -> Result<JobProgress, PipelineError> {
        let body = serde_json::json!({
            "task_id": task_id,
            "result_type": "url",
        });

        let response = self
            .client
            .post(format!("{}/fetch", self.base_url))
            .header("X-API-Key", &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Self::swap_error(e.into()))?;

        let envelope: Envelope<FetchData> =
            http::parse_json(response).await.map_err(Self::swap_error)?;
        let data = envelope
            .data
            .ok_or_else(|| Self::missing_data(envelope.message))?;
        Ok(progress_from(data))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use assert_matches::assert_matches;
    use axum::extract::State;
    use axum::http::{HeaderMap, StatusCode};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    use super::*;
    use crate::test_support::spawn_server;

    fn request() -> SwapRequest {
        SwapRequest::new(reelswap_core::types::PNG_SIGNATURE.to_vec(), vec![0xFF, 0xD8, 0xFF]).unwrap()
    }

    #[tokio::test]
    async fn submit_sends_data_urls_and_returns_task_id() {
        async fn submit(headers: HeaderMap, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
            if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("k-1") {
                return (StatusCode::UNAUTHORIZED, Json(json!({"message": "bad key"})));
            }
            assert!(body["target_image"].as_str().unwrap().starts_with("data:image/png;base64,"));
            assert!(body["swap_image"].as_str().unwrap().starts_with("data:image/jpeg;base64,"));
            assert_eq!(body["result_type"], "url");
            (StatusCode::OK, Json(json!({"code": 200, "data": {"task_id": "fs-9"}})))
        }
        let base = spawn_server(Router::new().route("/async", post(submit))).await;

        let provider = PiApiFaceSwap::new(reqwest::Client::new(), &base, "k-1");
        assert_eq!(provider.submit(&request()).await.unwrap(), "fs-9");

        let provider = PiApiFaceSwap::new(reqwest::Client::new(), &base, "wrong");
        assert_matches!(
            provider.submit(&request()).await,
            Err(PipelineError::Unauthorized(_))
        );
    }

    #[tokio::test]
    async fn poll_maps_statuses() {
        async fn fetch(State(calls): State<Arc<AtomicUsize>>) -> Json<Value> {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Json(match n {
                0 => json!({"data": {"status": "QUEUED"}}),
                1 => json!({"data": {"status": "RUNNING"}}),
                2 => json!({"data": {"status": "COMPLETED", "result_url": "https://img/out.png"}}),
                _ => json!({"data": {"status": "FAILED", "error_messages": ["no face detected"]}}),
            })
        }
        let calls = Arc::new(AtomicUsize::new(0));
        let base = spawn_server(Router::new().route("/fetch", post(fetch)).with_state(calls)).await;
        let provider = PiApiFaceSwap::new(reqwest::Client::new(), base, "k");

        assert_eq!(provider.poll("fs-1").await.unwrap(), JobProgress::Pending);
        assert_eq!(provider.poll("fs-1").await.unwrap(), JobProgress::Running);
        assert_eq!(
            provider.poll("fs-1").await.unwrap(),
            JobProgress::Completed(vec![MediaRef::Remote("https://img/out.png".into())])
        );
        assert_matches!(
            provider.poll("fs-1").await.unwrap(),
            JobProgress::Failed(reason) if reason.contains("no face detected")
        );
    }

    #[tokio::test]
    async fn too_many_requests_is_rate_limited() {
        async fn busy() -> (StatusCode, &'static str) {
            (StatusCode::TOO_MANY_REQUESTS, "slow down")
        }
        let base = spawn_server(Router::new().route("/fetch", post(busy))).await;
        let provider = PiApiFaceSwap::new(reqwest::Client::new(), base, "k");

        assert_matches!(
            provider.poll("fs-1").await,
            Err(PipelineError::RateLimited {
                service: ServiceKey::FaceSwap
            })
        );
    }
}
