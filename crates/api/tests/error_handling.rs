//! Tests for `AppError` -> HTTP response mapping.
//!
//! These call `IntoResponse` directly; no router is involved.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use http_body_util::BodyExt;
use reelswap_api::error::AppError;
use reelswap_core::error::PipelineError;
use reelswap_core::rate_limit::ServiceKey;
use reelswap_core::types::{ClipKey, FrameKey};

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

// ---------------------------------------------------------------------------
// Test: client-side pipeline errors keep their status
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_errors_map_to_4xx() {
    let cases = [
        (PipelineError::InvalidInput("prompt must not be empty".into()), StatusCode::BAD_REQUEST, "INVALID_INPUT"),
        (PipelineError::Unauthorized("no token".into()), StatusCode::UNAUTHORIZED, "UNAUTHORIZED"),
        (PipelineError::RunNotFound("abc".into()), StatusCode::NOT_FOUND, "NOT_FOUND"),
        (
            PipelineError::RateLimited { service: ServiceKey::Generation },
            StatusCode::TOO_MANY_REQUESTS,
            "RATE_LIMITED",
        ),
    ];

    for (err, status, code) in cases {
        let message = err.to_string();
        let (actual, json) = error_to_response(AppError::Pipeline(err)).await;
        assert_eq!(actual, status);
        assert_eq!(json["code"], code);
        assert_eq!(json["error"], message);
    }
}

// ---------------------------------------------------------------------------
// Test: stage failures are 500 but keep their message
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stage_failures_keep_their_message() {
    let err = PipelineError::SwapFailed {
        frame: Some(FrameKey::Middle),
        reason: "no face detected".into(),
    };
    let (status, json) = error_to_response(AppError::Pipeline(err)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["code"], "SWAP_FAILED");
    assert_eq!(json["error"], "Face swap failed for middle: no face detected");

    let err = PipelineError::GenerationTimeout {
        clip: Some(ClipKey::Clip2),
        attempts: 60,
    };
    let (_, json) = error_to_response(AppError::Pipeline(err)).await;
    assert_eq!(json["code"], "GENERATION_TIMEOUT");
    assert!(json["error"].as_str().unwrap().contains("clip2"));
}

// ---------------------------------------------------------------------------
// Test: internal errors are sanitized
// ---------------------------------------------------------------------------

#[tokio::test]
async fn internal_errors_are_sanitized() {
    for err in [
        AppError::Pipeline(PipelineError::Internal("secret path /root/keys".into())),
        AppError::InternalError("secret path /root/keys".into()),
    ] {
        let (status, json) = error_to_response(err).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(json["code"], "INTERNAL_ERROR");
        assert_eq!(json["error"], "An internal error occurred");
        assert!(!json.to_string().contains("secret"));
    }
}

// ---------------------------------------------------------------------------
// Test: AppError::BadRequest maps to 400 with BAD_REQUEST code
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bad_request_error_returns_400() {
    let (status, json) = error_to_response(AppError::BadRequest("url is required".into())).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "BAD_REQUEST");
    assert_eq!(json["error"], "url is required");
}
