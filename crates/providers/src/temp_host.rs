//! Publishing local files at a public URL.
//!
//! Generation providers only accept public image URLs and the stitcher can
//! hand out a link instead of bytes, so both go through a [`PublicHost`].

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use reelswap_core::error::PipelineError;
use reelswap_core::rate_limit::{RateLimiter, ServiceKey};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

use crate::http::{self, HttpError};

/// Uploads a local file and returns a URL anyone can fetch.
#[async_trait]
pub trait PublicHost: Send + Sync {
    async fn upload(&self, path: &Path) -> Result<String, PipelineError>;
}

pub const DEFAULT_TEMP_HOST_URL: &str = "https://file.io";

/// Anonymous temporary file host speaking the file.io protocol: multipart
/// `file` upload answered by JSON with a `link` field.
pub struct FileIoHost {
    client: reqwest::Client,
    endpoint: String,
    limiter: Arc<RateLimiter>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    #[serde(default)]
    link: Option<String>,
}

impl FileIoHost {
    pub fn new(client: reqwest::Client, endpoint: impl Into<String>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            limiter,
        }
    }

    fn upload_error(err: HttpError) -> PipelineError {
        err.into_pipeline(ServiceKey::Upload, PipelineError::UploadFailed)
    }
}

#[async_trait]
impl PublicHost for FileIoHost {
    async fn upload(&self, path: &Path) -> Result<String, PipelineError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| PipelineError::UploadFailed(format!("read {}: {e}", path.display())))?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let size = bytes.len();

        let _permit = self.limiter.acquire(ServiceKey::Upload).await?;

        let form = Form::new().part("file", Part::bytes(bytes).file_name(file_name));
        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Self::upload_error(e.into()))?;

        let body: UploadResponse = http::parse_json(response)
            .await
            .map_err(Self::upload_error)?;
        let link = body.link.filter(|l| !l.is_empty()).ok_or_else(|| {
            PipelineError::UploadFailed("host response did not include a link".into())
        })?;

        tracing::info!(path = %path.display(), size, url = %link, "Uploaded file to public host");
        Ok(link)
    }
}
