use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use reelswap_core::error::PipelineError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`PipelineError`] for stage failures and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A failure reported by the pipeline.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Pipeline(err) => classify_pipeline_error(err),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

/// Classify a pipeline error into an HTTP status, error code, and message.
///
/// Stage failures keep their message so the caller knows which stage to
/// retry; only `Internal` is sanitized.
fn classify_pipeline_error(err: &PipelineError) -> (StatusCode, &'static str, String) {
    let status = match err {
        PipelineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        PipelineError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
        PipelineError::RunNotFound(_) => StatusCode::NOT_FOUND,
        PipelineError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        PipelineError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal pipeline error");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                err.kind(),
                "An internal error occurred".to_string(),
            );
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status.is_server_error() {
        tracing::warn!(code = err.kind(), error = %err, "Pipeline stage failed");
    }
    (status, err.kind(), err.to_string())
}
