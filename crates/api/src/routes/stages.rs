//! Route definitions for the stateless stage endpoints.
//!
//! ```text
//! POST /extract                 extract
//! POST /faceswap                faceswap (multipart)
//! POST /generate                submit_generation
//! GET  /generate?job_id=        generation_status
//! POST /stitch                  stitch
//! ```

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::stages;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/extract", post(stages::extract))
        .route("/faceswap", post(stages::faceswap))
        .route(
            "/generate",
            get(stages::generation_status).post(stages::submit_generation),
        )
        .route("/stitch", post(stages::stitch))
}
