//! Route definitions for tracked pipeline runs.
//!
//! Mounted at `/runs`.
//!
//! ```text
//! POST   /                         create_run
//! GET    /{id}                     get_run
//! DELETE /{id}                     delete_run
//! POST   /{id}/extract             extract_frames
//! PUT    /{id}/face                set_face (multipart)
//! PUT    /{id}/frames/selection    select_frames
//! POST   /{id}/swap                swap_faces
//! POST   /{id}/generate            generate_clips
//! GET    /{id}/generation          generation (?wait=true blocks)
//! PUT    /{id}/clips/selection     select_clips
//! POST   /{id}/stitch              stitch_clips
//! GET    /{id}/final               final_video
//! ```

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::runs;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(runs::create_run))
        .route("/{id}", get(runs::get_run).delete(runs::delete_run))
        .route("/{id}/extract", post(runs::extract_frames))
        .route("/{id}/face", put(runs::set_face))
        .route("/{id}/frames/selection", put(runs::select_frames))
        .route("/{id}/swap", post(runs::swap_faces))
        .route("/{id}/generate", post(runs::generate_clips))
        .route("/{id}/generation", get(runs::generation))
        .route("/{id}/clips/selection", put(runs::select_clips))
        .route("/{id}/stitch", post(runs::stitch_clips))
        .route("/{id}/final", get(runs::final_video))
}
