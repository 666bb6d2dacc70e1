//! Handlers for the `/runs` resource.
//!
//! Every handler answers with the run's snapshot after the action, so the
//! client always sees the recorded progress, including partial results that
//! survived a failing stage.

use axum::extract::multipart::MultipartRejection;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::Json;
use reelswap_core::types::{ClipKey, FrameKey};
use reelswap_pipeline::orchestrator::{RunId, RunSnapshot};
use reelswap_pipeline::stitcher::Delivery;
use serde::Deserialize;

use crate::error::{AppError, AppResult};
use crate::handlers::stages::required;
use crate::middleware::auth::RequireToken;
use crate::middleware::json::JsonBody;
use crate::response::{video_file, DataResponse};
use crate::state::AppState;

type SnapshotResponse = Json<DataResponse<RunSnapshot>>;

// ---------------------------------------------------------------------------
// Request types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CreateRunBody {
    pub source_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct FrameSelectionBody {
    #[serde(default)]
    pub frames: Vec<FrameKey>,
}

#[derive(Debug, Deserialize)]
pub struct SwapBody {
    /// Defaults to the stored frame selection, or all frames if none.
    pub frames: Option<Vec<FrameKey>>,
}

#[derive(Debug, Deserialize)]
pub struct RunGenerateBody {
    pub prompt: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerationParams {
    /// Block until every generation job is terminal.
    #[serde(default)]
    pub wait: bool,
}

#[derive(Debug, Deserialize)]
pub struct ClipSelectionBody {
    #[serde(default)]
    pub clips: Vec<ClipKey>,
}

#[derive(Debug, Deserialize)]
pub struct RunStitchBody {
    pub clips: Option<Vec<ClipKey>>,
    #[serde(default)]
    pub publish: bool,
}

fn snapshot(snapshot: RunSnapshot) -> SnapshotResponse {
    Json(DataResponse { data: snapshot })
}

fn run_id(raw: &str) -> AppResult<RunId> {
    Ok(raw.parse::<RunId>()?)
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

/// POST /api/v1/runs
pub async fn create_run(
    _: RequireToken,
    State(state): State<AppState>,
    JsonBody(body): JsonBody<CreateRunBody>,
) -> AppResult<(StatusCode, SnapshotResponse)> {
    let source_url = required(body.source_url, "source_url")?;
    let created = state.orchestrator.create_run(&source_url).await?;
    Ok((StatusCode::CREATED, snapshot(created)))
}

/// GET /api/v1/runs/{id}
pub async fn get_run(
    _: RequireToken,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<SnapshotResponse> {
    let id = run_id(&id)?;
    Ok(snapshot(state.orchestrator.snapshot(id).await?))
}

/// DELETE /api/v1/runs/{id}
pub async fn delete_run(
    _: RequireToken,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<StatusCode> {
    let id = run_id(&id)?;
    state.orchestrator.discard(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

// ---------------------------------------------------------------------------
// Stages
// ---------------------------------------------------------------------------

/// POST /api/v1/runs/{id}/extract
pub async fn extract_frames(
    _: RequireToken,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<SnapshotResponse> {
    let id = run_id(&id)?;
    Ok(snapshot(state.orchestrator.extract(id).await?))
}

/// PUT /api/v1/runs/{id}/face (multipart field `face`)
pub async fn set_face(
    _: RequireToken,
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> AppResult<SnapshotResponse> {
    let id = run_id(&id)?;
    let mut multipart = multipart.map_err(|e| AppError::BadRequest(e.body_text()))?;

    let mut face = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        if field.name() == Some("face") {
            let data = field
                .bytes()
                .await
                .map_err(|e| AppError::BadRequest(e.to_string()))?;
            face = Some(data.to_vec());
        }
    }

    let face = face.ok_or_else(|| AppError::BadRequest("face is required".into()))?;
    Ok(snapshot(state.orchestrator.set_face(id, face).await?))
}

/// PUT /api/v1/runs/{id}/frames/selection
pub async fn select_frames(
    _: RequireToken,
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<FrameSelectionBody>,
) -> AppResult<SnapshotResponse> {
    let id = run_id(&id)?;
    Ok(snapshot(state.orchestrator.select_frames(id, body.frames).await?))
}

/// POST /api/v1/runs/{id}/swap
pub async fn swap_faces(
    _: RequireToken,
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<SwapBody>,
) -> AppResult<SnapshotResponse> {
    let id = run_id(&id)?;
    let frames = match body.frames {
        Some(frames) => frames,
        None => {
            let selected = state.orchestrator.snapshot(id).await?.selected_frames;
            if selected.is_empty() {
                FrameKey::ALL.to_vec()
            } else {
                selected
            }
        }
    };
    Ok(snapshot(state.orchestrator.swap(id, &frames).await?))
}

/// POST /api/v1/runs/{id}/generate
pub async fn generate_clips(
    _: RequireToken,
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<RunGenerateBody>,
) -> AppResult<(StatusCode, SnapshotResponse)> {
    let id = run_id(&id)?;
    let prompt = required(body.prompt, "prompt")?;
    let submitted = state.orchestrator.generate(id, &prompt).await?;
    Ok((StatusCode::ACCEPTED, snapshot(submitted)))
}

/// GET /api/v1/runs/{id}/generation?wait=true
pub async fn generation(
    _: RequireToken,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<GenerationParams>,
) -> AppResult<SnapshotResponse> {
    let id = run_id(&id)?;
    let current = if params.wait {
        state.orchestrator.await_generation(id).await?
    } else {
        state.orchestrator.snapshot(id).await?
    };
    Ok(snapshot(current))
}

/// PUT /api/v1/runs/{id}/clips/selection
pub async fn select_clips(
    _: RequireToken,
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<ClipSelectionBody>,
) -> AppResult<SnapshotResponse> {
    let id = run_id(&id)?;
    Ok(snapshot(state.orchestrator.select_clips(id, body.clips).await?))
}

/// POST /api/v1/runs/{id}/stitch
pub async fn stitch_clips(
    _: RequireToken,
    State(state): State<AppState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<RunStitchBody>,
) -> AppResult<SnapshotResponse> {
    let id = run_id(&id)?;
    let stitched = state
        .orchestrator
        .stitch(id, body.clips.as_deref(), Delivery::from_publish_flag(body.publish))
        .await?;
    Ok(snapshot(stitched))
}

/// GET /api/v1/runs/{id}/final
pub async fn final_video(
    _: RequireToken,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let id = run_id(&id)?;
    let artifact = state.orchestrator.final_video(id).await?;
    let path = artifact
        .local_path()
        .ok_or_else(|| AppError::InternalError("final video has no local file".into()))?;
    video_file(path, "final.mp4").await
}
