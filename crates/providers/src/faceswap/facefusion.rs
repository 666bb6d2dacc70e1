//! Self-hosted FaceFusion microservice.
//!
//! The service swaps synchronously: `POST /swap` with multipart `source`
//! (face) and `target` (frame) answers with the PNG result. To fit the task
//! contract, `submit` performs the call, stores the PNG under the output
//! directory and returns a local task id; the first `poll` reports the
//! stored file as completed and forgets the task. The caller owns the file
//! from then on.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;
use reelswap_core::error::PipelineError;
use reelswap_core::rate_limit::ServiceKey;
use reelswap_core::types::{is_png, JobProgress, MediaRef};
use reqwest::multipart::{Form, Part};

use super::SwapRequest;
use crate::http::{self, HttpError};
use crate::task::TaskProvider;

/// Default address of the FaceFusion container.
pub const DEFAULT_FACEFUSION_URL: &str = "http://faceswap:8000";

pub struct FaceFusionProvider {
    client: reqwest::Client,
    base_url: String,
    output_dir: PathBuf,
    results: Mutex<HashMap<String, PathBuf>>,
}

impl FaceFusionProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>, output_dir: PathBuf) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            output_dir,
            results: Mutex::new(HashMap::new()),
        }
    }

    fn swap_error(err: HttpError) -> PipelineError {
        err.into_pipeline(ServiceKey::FaceSwap, |reason| PipelineError::SwapFailed {
            frame: None,
            reason: format!("FaceFusion service error: {reason}"),
        })
    }
}

#[async_trait]
impl TaskProvider for FaceFusionProvider {
    type Request = SwapRequest;

    fn name(&self) -> &str {
        "facefusion"
    }

    async fn submit(&self, request: &SwapRequest) -> Result<String, PipelineError> {
        let form = Form::new()
            .part(
                "source",
                Part::bytes(request.face.clone()).file_name("source.png"),
            )
            .part(
                "target",
                Part::bytes(request.target.clone()).file_name("target.png"),
            );

        let response = self
            .client
            .post(format!("{}/swap", self.base_url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::swap_error(e.into()))?;
        let response = http::ensure_success(response)
            .await
            .map_err(Self::swap_error)?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::swap_error(e.into()))?;

        if !is_png(&bytes) {
            return Err(PipelineError::SwapFailed {
                frame: None,
                reason: format!("FaceFusion returned {} bytes that are not a PNG", bytes.len()),
            });
        }

        let task_id = format!("ff-{}", uuid::Uuid::new_v4());
        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .map_err(|e| PipelineError::Internal(format!("create FaceFusion output dir: {e}")))?;
        let path = self.output_dir.join(format!("{task_id}.png"));
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| PipelineError::Internal(format!("store FaceFusion result: {e}")))?;

        if let Ok(mut results) = self.results.lock() {
            results.insert(task_id.clone(), path);
        }
        Ok(task_id)
    }

    async fn poll(&self, task_id: &str) -> Result<JobProgress, PipelineError> {
        let path = self
            .results
            .lock()
            .ok()
            .and_then(|mut results| results.remove(task_id));

        Ok(match path {
            Some(path) => JobProgress::Completed(vec![MediaRef::Local(path)]),
            None => JobProgress::Failed(format!("unknown FaceFusion task {task_id}")),
        })
    }
}
