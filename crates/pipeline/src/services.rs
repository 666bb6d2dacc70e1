//! The collaborators every pipeline stage draws on, wired once per process.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use reelswap_core::error::PipelineError;
use reelswap_core::rate_limit::{RateLimiter, ServiceKey};
use reelswap_core::types::{is_png, FrameAsset, JobKind, JobProgress, MediaRef};
use reelswap_providers::faceswap::{
    FaceFusionProvider, FaceSwapBackend, PiApiFaceSwap, SwapRequest, MAX_IMAGE_BYTES,
};
use reelswap_providers::generation::{
    GenerationBackend, GenerationRequest, KlingProvider, KlingTokenSigner, PiApiGeneration,
};
use reelswap_providers::resolver::{TikTokResolver, VideoResolver};
use reelswap_providers::task::{TaskClient, TaskProvider};
use reelswap_providers::temp_host::{FileIoHost, PublicHost};

use crate::config::{ConfigError, PipelineConfig};
use crate::download;
use crate::events::EventBus;
use crate::extractor::FrameExtractor;
use crate::media::{FfmpegTool, MediaTool};
use crate::stitcher::ClipStitcher;

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// Longest side of an image compressed before a swap.
const COMPRESSED_MAX_DIMENSION: u32 = 2048;

/// Shared, cheaply cloneable handles to the external world.
#[derive(Clone)]
pub struct PipelineServices {
    pub http: reqwest::Client,
    pub media: Arc<dyn MediaTool>,
    pub resolver: Arc<dyn VideoResolver>,
    pub face_swap: TaskClient<SwapRequest>,
    pub generation: TaskClient<GenerationRequest>,
    pub host: Arc<dyn PublicHost>,
    pub events: Arc<EventBus>,
    /// Parent of every run work directory.
    pub work_dir: PathBuf,
}

impl PipelineServices {
    /// Build the production collaborators selected by `config`.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .timeout(HTTP_REQUEST_TIMEOUT)
            .build()?;

        let limiter = Arc::new(RateLimiter::new([
            (ServiceKey::FaceSwap, config.faceswap_concurrency),
            (ServiceKey::Generation, config.generation_concurrency),
            (ServiceKey::Upload, config.upload_concurrency),
        ]));
        let piapi_key = config.piapi_key.clone().unwrap_or_default();

        let swap_provider: Arc<dyn TaskProvider<Request = SwapRequest>> =
            match config.faceswap_backend {
                FaceSwapBackend::PiApi => Arc::new(PiApiFaceSwap::new(
                    http.clone(),
                    &config.piapi_faceswap_url,
                    &piapi_key,
                )),
                FaceSwapBackend::FaceFusion => Arc::new(FaceFusionProvider::new(
                    http.clone(),
                    &config.facefusion_url,
                    config.work_dir.join("facefusion"),
                )),
            };

        let generation_provider: Arc<dyn TaskProvider<Request = GenerationRequest>> =
            match (config.generation_backend, &config.kling) {
                (GenerationBackend::Kling, Some(kling)) => Arc::new(KlingProvider::new(
                    http.clone(),
                    &config.kling_base_url,
                    KlingTokenSigner::new(&kling.access_key, &kling.secret_key),
                )),
                (GenerationBackend::Kling, None) => {
                    return Err(ConfigError::Missing {
                        name: "KLING_ACCESS_KEY",
                        context: " for the kling provider".into(),
                    })
                }
                (GenerationBackend::PiApi, _) => Arc::new(PiApiGeneration::new(
                    http.clone(),
                    &config.piapi_generation_url,
                    &piapi_key,
                )),
            };

        tracing::info!(
            faceswap = %config.faceswap_backend,
            generation = %config.generation_backend,
            work_dir = %config.work_dir.display(),
            "Pipeline providers configured",
        );

        Ok(Self {
            media: Arc::new(FfmpegTool),
            resolver: Arc::new(TikTokResolver::new(http.clone())),
            face_swap: TaskClient::new(
                swap_provider,
                JobKind::FaceSwap,
                Arc::clone(&limiter),
                config.face_swap_client(),
            ),
            generation: TaskClient::new(
                generation_provider,
                JobKind::Generation,
                Arc::clone(&limiter),
                config.generation_client(),
            ),
            host: Arc::new(FileIoHost::new(http.clone(), &config.temp_host_url, limiter)),
            events: Arc::new(EventBus::default()),
            work_dir: config.work_dir.clone(),
            http,
        })
    }

    pub fn extractor(&self) -> FrameExtractor {
        FrameExtractor::new(self.http.clone(), Arc::clone(&self.resolver), Arc::clone(&self.media))
    }

    pub fn stitcher(&self) -> ClipStitcher {
        ClipStitcher::new(self.http.clone(), Arc::clone(&self.media), Arc::clone(&self.host))
    }

    /// Swap `face` onto `target` and store the result as `<stem>.png` in
    /// `out_dir`.
    ///
    /// Hosted results keep their URL so generation can reuse it; results
    /// that are not PNG are re-encoded.
    pub async fn swap_frame(
        &self,
        target: Vec<u8>,
        face: Vec<u8>,
        out_dir: &Path,
        stem: &str,
    ) -> Result<FrameAsset, PipelineError> {
        let request = SwapRequest::new(target, face)?;
        let request = SwapRequest {
            target: self.shrink_if_oversized(request.target, out_dir, "target").await?,
            face: self.shrink_if_oversized(request.face, out_dir, "face").await?,
        };
        let results = self.face_swap.run(&request).await?;
        let first = results.into_iter().next().ok_or_else(|| PipelineError::SwapFailed {
            frame: None,
            reason: "provider returned no result".into(),
        })?;

        let (bytes, remote_url) = match &first {
            MediaRef::Remote(url) => (download::download_bytes(&self.http, url).await?, Some(url.clone())),
            MediaRef::Local(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| PipelineError::SwapFailed {
                    frame: None,
                    reason: format!("read result {}: {e}", path.display()),
                })?;
                // Provider scratch; the copy under `out_dir` is the result.
                if let Err(e) = tokio::fs::remove_file(path).await {
                    tracing::warn!(path = %path.display(), error = %e, "Failed to remove provider result");
                }
                (bytes, None)
            }
        };

        let path = out_dir.join(format!("{stem}.png"));
        let bytes = self.ensure_png(bytes, out_dir, stem, &path).await?;
        tokio::fs::write(&path, &bytes)
            .await
            .map_err(|e| PipelineError::Internal(format!("write {}: {e}", path.display())))?;

        let asset = FrameAsset::from_png(path, bytes).map_err(|e| PipelineError::SwapFailed {
            frame: None,
            reason: e.to_string(),
        })?;
        Ok(match remote_url {
            Some(url) => asset.with_remote_url(url),
            None => asset,
        })
    }

    /// Re-encode an image above [`MAX_IMAGE_BYTES`]; smaller ones pass
    /// through untouched.
    async fn shrink_if_oversized(
        &self,
        bytes: Vec<u8>,
        out_dir: &Path,
        label: &str,
    ) -> Result<Vec<u8>, PipelineError> {
        if bytes.len() <= MAX_IMAGE_BYTES {
            return Ok(bytes);
        }

        let original = bytes.len();
        let scratch = tempfile::Builder::new()
            .prefix("compress-")
            .tempdir_in(out_dir)
            .map_err(|e| PipelineError::Internal(format!("scratch dir for compression: {e}")))?;
        let input = scratch.path().join(format!("{label}.img"));
        let output = scratch.path().join(format!("{label}.jpg"));

        tokio::fs::write(&input, &bytes)
            .await
            .map_err(|e| PipelineError::Internal(format!("write {label} image: {e}")))?;
        self.media
            .compress_image(&input, &output, COMPRESSED_MAX_DIMENSION)
            .await
            .map_err(|e| PipelineError::SwapFailed {
                frame: None,
                reason: format!("could not compress {label} image: {e}"),
            })?;
        let compressed = tokio::fs::read(&output)
            .await
            .map_err(|e| PipelineError::Internal(format!("read compressed {label} image: {e}")))?;

        tracing::info!(label, original, compressed = compressed.len(), "Compressed oversized image");
        Ok(compressed)
    }

    async fn ensure_png(
        &self,
        bytes: Vec<u8>,
        out_dir: &Path,
        stem: &str,
        png_path: &Path,
    ) -> Result<Vec<u8>, PipelineError> {
        if is_png(&bytes) {
            return Ok(bytes);
        }

        tracing::debug!(stem, bytes = bytes.len(), "Swap result is not PNG, re-encoding");
        let raw = out_dir.join(format!("{stem}.raw"));
        tokio::fs::write(&raw, &bytes)
            .await
            .map_err(|e| PipelineError::Internal(format!("write {}: {e}", raw.display())))?;
        self.media
            .to_png(&raw, png_path)
            .await
            .map_err(|e| PipelineError::SwapFailed {
                frame: None,
                reason: format!("result is not a decodable image: {e}"),
            })?;
        let _ = tokio::fs::remove_file(&raw).await;
        tokio::fs::read(png_path)
            .await
            .map_err(|e| PipelineError::Internal(format!("read {}: {e}", png_path.display())))
    }

    /// A public URL for `asset`, uploading it unless one is already known.
    pub async fn publish_frame(&self, asset: &FrameAsset) -> Result<String, PipelineError> {
        match asset.remote_url() {
            Some(url) => Ok(url.to_string()),
            None => self.host.upload(asset.path()).await,
        }
    }

    /// One status check of a generation job.
    pub async fn generation_status(&self, job_id: &str) -> Result<JobProgress, PipelineError> {
        self.generation.poll_once(job_id).await
    }
}
