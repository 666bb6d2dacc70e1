//! Handlers for the stateless stage endpoints.
//!
//! Each call runs one stage on its own, in a scratch directory under the work
//! dir that is deleted once the handler returns. Paths in the responses are
//! informational; the content travels in the body. Nothing is remembered
//! between calls; use the `/runs` endpoints for a tracked pipeline.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reelswap_core::types::{FrameKey, JobProgress, JobStatus, MediaRef};
use reelswap_pipeline::stitcher::Delivery;
use reelswap_providers::generation::{GenerationRequest, Quality};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::RequireToken;
use crate::middleware::json::JsonBody;
use crate::response::{video_file, DataResponse};
use crate::state::AppState;

/// Parent of the per-request scratch directories.
pub const STATELESS_DIR: &str = "stateless";

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ExtractBody {
    pub url: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FramePayload {
    pub path: PathBuf,
    pub image_base64: String,
}

#[derive(Debug, Serialize)]
pub struct ExtractResponse {
    pub video_path: PathBuf,
    pub duration_secs: f64,
    pub frames: BTreeMap<FrameKey, FramePayload>,
}

#[derive(Debug, Serialize)]
pub struct FaceSwapResponse {
    pub result_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_url: Option<String>,
    pub image_base64: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub prompt: Option<String>,
    pub image_url: Option<String>,
    pub tail_image_url: Option<String>,
    pub duration: Option<u32>,
    pub aspect_ratio: Option<String>,
    pub num_samples: Option<u32>,
    pub quality: Option<Quality>,
}

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    pub job_id: String,
}

#[derive(Debug, Deserialize)]
pub struct JobStatusParams {
    pub job_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_urls: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct StitchBody {
    #[serde(default)]
    pub clips: Vec<String>,
    #[serde(default)]
    pub publish: bool,
}

#[derive(Debug, Serialize)]
pub struct PublishedVideo {
    pub url: String,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// A fresh directory for one request, removed on drop.
async fn scratch_dir(state: &AppState) -> AppResult<TempDir> {
    let parent = state.services().work_dir.join(STATELESS_DIR);
    tokio::fs::create_dir_all(&parent)
        .await
        .map_err(|e| AppError::InternalError(format!("create {}: {e}", parent.display())))?;
    tempfile::Builder::new()
        .prefix("req-")
        .tempdir_in(&parent)
        .map_err(|e| AppError::InternalError(format!("create scratch directory: {e}")))
}

/// A trimmed, non-empty field value or a `400` naming the field.
pub(crate) fn required(value: Option<String>, name: &str) -> AppResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| AppError::BadRequest(format!("{name} is required")))
}

/// Local clips must live under the work dir; remote clips pass through.
fn clip_ref(raw: &str, work_dir: &Path) -> AppResult<MediaRef> {
    let clip = MediaRef::parse(raw);
    if let MediaRef::Local(path) = &clip {
        let escapes = path.components().any(|c| matches!(c, Component::ParentDir));
        if escapes || !path.starts_with(work_dir) {
            return Err(AppError::BadRequest(format!(
                "local clip {} is outside the work directory",
                path.display()
            )));
        }
    }
    Ok(clip)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// POST /api/v1/extract
pub async fn extract(
    _: RequireToken,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<ExtractBody>,
) -> AppResult<Json<DataResponse<ExtractResponse>>> {
    let url = required(body.url, "url")?;
    let scratch = scratch_dir(&state).await?;
    let extracted = state
        .services()
        .extractor()
        .extract(&url, scratch.path())
        .await?;

    let frames = extracted
        .frames
        .iter()
        .map(|(key, asset)| {
            let payload = FramePayload {
                path: asset.path().to_path_buf(),
                image_base64: BASE64.encode(asset.content()),
            };
            (key, payload)
        })
        .collect();

    Ok(Json(DataResponse {
        data: ExtractResponse {
            video_path: extracted.video_path,
            duration_secs: extracted.duration_secs,
            frames,
        },
    }))
}

/// POST /api/v1/faceswap
///
/// Multipart fields: `sourceImage` (the face) and `targetImage` (the frame).
pub async fn faceswap(
    _: RequireToken,
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<Json<DataResponse<FaceSwapResponse>>> {
    let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let mut face = None;
    let mut target = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or_default().to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| AppError::BadRequest(e.to_string()))?;
        match name.as_str() {
            "sourceImage" => face = Some(data.to_vec()),
            "targetImage" => target = Some(data.to_vec()),
            other => tracing::debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let face = face
        .filter(|b| !b.is_empty())
        .ok_or_else(|| AppError::BadRequest("sourceImage is required".into()))?;
    let target = target
        .filter(|b| !b.is_empty())
        .ok_or_else(|| AppError::BadRequest("targetImage is required".into()))?;

    let scratch = scratch_dir(&state).await?;
    let stem = uuid::Uuid::new_v4().simple().to_string();
    let asset = state
        .services()
        .swap_frame(target, face, scratch.path(), &stem)
        .await?;

    Ok(Json(DataResponse {
        data: FaceSwapResponse {
            result_path: asset.path().to_path_buf(),
            result_url: asset.remote_url().map(str::to_string),
            image_base64: BASE64.encode(asset.content()),
        },
    }))
}

/// POST /api/v1/generate
pub async fn submit_generation(
    _: RequireToken,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<GenerateBody>,
) -> AppResult<(StatusCode, Json<DataResponse<GenerateResponse>>)> {
    let mut request = GenerationRequest::new(
        required(body.prompt, "prompt")?,
        required(body.image_url, "image_url")?,
        required(body.tail_image_url, "tail_image_url")?,
    )?;
    if let Some(duration) = body.duration {
        request = request.with_duration(duration);
    }
    if let Some(ratio) = body.aspect_ratio.filter(|r| !r.trim().is_empty()) {
        request = request.with_aspect_ratio(ratio.trim());
    }
    if let Some(count) = body.num_samples {
        request = request.with_sample_count(count);
    }
    if let Some(quality) = body.quality {
        request = request.with_quality(quality);
    }

    let job_id = state.services().generation.submit(&request).await?;
    tracing::info!(task_id = %job_id, "Generation submitted");

    Ok((
        StatusCode::ACCEPTED,
        Json(DataResponse {
            data: GenerateResponse { job_id },
        }),
    ))
}

/// GET /api/v1/generate?job_id=
pub async fn generation_status(
    _: RequireToken,
    State(state): State<AppState>,
    Query(params): Query<JobStatusParams>,
) -> AppResult<Json<DataResponse<JobStatusResponse>>> {
    let job_id = required(params.job_id, "job_id")?;
    let progress = state.services().generation_status(&job_id).await?;

    let status = progress.status();
    let (result_urls, error) = match progress {
        JobProgress::Completed(results) => {
            (Some(results.iter().map(ToString::to_string).collect()), None)
        }
        JobProgress::Failed(reason) => (None, Some(reason)),
        JobProgress::Pending | JobProgress::Running => (None, None),
    };

    Ok(Json(DataResponse {
        data: JobStatusResponse {
            job_id,
            status,
            result_urls,
            error,
        },
    }))
}

/// POST /api/v1/stitch
///
/// Returns the video itself, or `{ "url": ... }` when `publish` is set.
pub async fn stitch(
    _: RequireToken,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<StitchBody>,
) -> AppResult<Response> {
    if body.clips.is_empty() {
        return Err(AppError::BadRequest("clips must not be empty".into()));
    }
    let work_dir = &state.services().work_dir;
    let clips = body
        .clips
        .iter()
        .map(|raw| clip_ref(raw, work_dir))
        .collect::<AppResult<Vec<_>>>()?;

    let scratch = scratch_dir(&state).await?;
    let artifact = state
        .services()
        .stitcher()
        .stitch(&clips, scratch.path(), Delivery::from_publish_flag(body.publish))
        .await?;

    if let Some(url) = artifact.public_url() {
        return Ok(Json(DataResponse {
            data: PublishedVideo {
                url: url.to_string(),
            },
        })
        .into_response());
    }
    let path = artifact
        .local_path()
        .ok_or_else(|| AppError::InternalError("stitched video has no local file".into()))?;
    video_file(path, "final.mp4").await
}
