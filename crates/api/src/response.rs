//! Shared response types for API handlers.
//!
//! JSON responses use a `{ "data": ... }` envelope. Videos are returned as
//! raw `video/mp4` bodies.

use std::path::Path;

use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::error::{AppError, AppResult};

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Read `path` and return it as an `mp4` attachment named `file_name`.
pub async fn video_file(path: &Path, file_name: &str) -> AppResult<Response> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| AppError::InternalError(format!("read {}: {e}", path.display())))?;

    Ok((
        [
            (header::CONTENT_TYPE, "video/mp4".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{file_name}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
