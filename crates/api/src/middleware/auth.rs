//! Shared-token authentication extractor for Axum handlers.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use reelswap_core::error::PipelineError;

use crate::error::AppError;
use crate::state::AppState;

/// Proof that the request carried the configured API token.
///
/// Accepts `Authorization: Bearer <token>` or the bare token. Put it first in
/// a handler's argument list: it only inspects headers, so it rejects
/// unauthorized calls before any body is read or validated.
///
/// ```ignore
/// async fn my_handler(_: RequireToken, Json(body): Json<Body>) -> AppResult<Json<()>> {
///     Ok(Json(()))
/// }
/// ```
#[derive(Debug, Clone, Copy)]
pub struct RequireToken;

impl FromRequestParts<AppState> for RequireToken {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| unauthorized("Missing Authorization header"))?;

        let token = header
            .strip_prefix("Bearer ")
            .unwrap_or(header)
            .trim();

        if token.is_empty() || !constant_time_eq(token.as_bytes(), state.config.api_token.as_bytes()) {
            return Err(unauthorized("Invalid API token"));
        }
        Ok(RequireToken)
    }
}

fn unauthorized(message: &str) -> AppError {
    AppError::Pipeline(PipelineError::Unauthorized(message.into()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
