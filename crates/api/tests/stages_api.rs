//! Integration tests for the stateless stage endpoints.

mod common;

use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::http::{Method, StatusCode};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use common::{body_bytes, body_json, build_test_app, get, multipart_request, post_json, send};
use reelswap_core::types::PNG_SIGNATURE;
use reelswap_providers::generation::Quality;
use serde_json::json;

fn png(payload: &[u8]) -> Vec<u8> {
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.extend_from_slice(payload);
    bytes
}

// ---------------------------------------------------------------------------
// Extract
// ---------------------------------------------------------------------------

#[tokio::test]
async fn extract_returns_three_encoded_frames() {
    let t = build_test_app();
    let url = common::spawn_video_server().await;

    let response = post_json(&t.app, "/api/v1/extract", json!({ "url": url })).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let data = &json["data"];
    assert_eq!(data["duration_secs"], 12.0);
    let frames = data["frames"].as_object().unwrap();
    assert_eq!(frames.len(), 3);

    let start = BASE64
        .decode(data["frames"]["start"]["image_base64"].as_str().unwrap())
        .unwrap();
    assert_eq!(start, png(b"frame@0.000"));
    assert!(data["frames"]["end"]["path"].as_str().unwrap().ends_with("end.png"));
    assert_eq!(t.stateless_leftovers(), 0);
}

#[tokio::test]
async fn extract_requires_url() {
    let t = build_test_app();

    let response = post_json(&t.app, "/api/v1/extract", json!({ "url": "  " })).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "url is required");
}

// ---------------------------------------------------------------------------
// Face swap
// ---------------------------------------------------------------------------

#[tokio::test]
async fn faceswap_returns_png_result() {
    let t = build_test_app();
    let target = png(b"frame");
    let request = multipart_request(
        Method::POST,
        "/api/v1/faceswap",
        &[("sourceImage", b"face".as_slice()), ("targetImage", target.as_slice())],
    );

    let response = send(&t.app, request).await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    let image = BASE64
        .decode(json["data"]["image_base64"].as_str().unwrap())
        .unwrap();
    assert!(image.starts_with(&PNG_SIGNATURE));
    assert!(image.ends_with(b"swapped:frame"));
    assert_eq!(t.fakes.face_swap.submissions(), 1);
    assert!(!std::path::Path::new(json["data"]["result_path"].as_str().unwrap()).exists());
    assert_eq!(t.stateless_leftovers(), 0);
}

#[tokio::test]
async fn faceswap_requires_both_images() {
    let t = build_test_app();
    let request = multipart_request(Method::POST, "/api/v1/faceswap", &[("sourceImage", b"face".as_slice())]);

    let response = send(&t.app, request).await;

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert_eq!(json["error"], "targetImage is required");
    assert_eq!(t.fakes.face_swap.submissions(), 0);
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn generate_submits_and_reports_status() {
    let t = build_test_app();

    let response = post_json(
        &t.app,
        "/api/v1/generate",
        json!({
            "prompt": "wave at the camera",
            "image_url": "https://cdn.test/start.png",
            "tail_image_url": "https://cdn.test/middle.png",
            "duration": 10,
            "num_samples": 2,
            "quality": "pro",
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let job_id = body_json(response).await["data"]["job_id"]
        .as_str()
        .unwrap()
        .to_string();

    let requests = t.fakes.generation.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].duration_secs, 10);
    assert_eq!(requests[0].sample_count, 2);
    assert_eq!(requests[0].quality, Quality::Pro);

    let uri = format!("/api/v1/generate?job_id={job_id}");
    let first = body_json(get(&t.app, &uri).await).await;
    assert_eq!(first["data"]["status"], "running");
    assert!(first["data"].get("result_urls").is_none());

    let second = body_json(get(&t.app, &uri).await).await;
    assert_eq!(second["data"]["status"], "completed");
    let urls = second["data"]["result_urls"].as_array().unwrap();
    assert!(urls[0].as_str().unwrap().ends_with(&format!("{job_id}.mp4")));
}

#[tokio::test]
async fn generate_validates_fields() {
    let t = build_test_app();

    let missing = post_json(
        &t.app,
        "/api/v1/generate",
        json!({ "prompt": "p", "image_url": "https://cdn.test/a.png" }),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(missing).await["error"], "tail_image_url is required");

    let local = post_json(
        &t.app,
        "/api/v1/generate",
        json!({ "prompt": "p", "image_url": "/tmp/a.png", "tail_image_url": "https://cdn.test/b.png" }),
    )
    .await;
    assert_eq!(local.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(local).await["code"], "INVALID_INPUT");

    let no_id = get(&t.app, "/api/v1/generate").await;
    assert_eq!(no_id.status(), StatusCode::BAD_REQUEST);
    assert!(t.fakes.generation.requests().is_empty());
}

// ---------------------------------------------------------------------------
// Stitch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stitch_streams_the_final_video() {
    let t = build_test_app();
    let a = t.dir.path().join("a.mp4");
    let b = t.dir.path().join("b.mp4");
    tokio::fs::write(&a, b"<a>").await.unwrap();
    tokio::fs::write(&b, b"<b>").await.unwrap();

    let response = post_json(
        &t.app,
        "/api/v1/stitch",
        json!({ "clips": [a.display().to_string(), b.display().to_string()] }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "video/mp4");
    let disposition = response.headers()[CONTENT_DISPOSITION].to_str().unwrap().to_string();
    assert!(disposition.contains("final.mp4"));
    assert_eq!(body_bytes(response).await, b"<a><b>");
    assert_eq!(t.stateless_leftovers(), 0);
}

#[tokio::test]
async fn stitch_can_publish() {
    let t = build_test_app();
    let a = t.dir.path().join("a.mp4");
    tokio::fs::write(&a, b"<a>").await.unwrap();

    let response = post_json(
        &t.app,
        "/api/v1/stitch",
        json!({ "clips": [a.display().to_string()], "publish": true }),
    )
    .await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["data"]["url"], "https://public.test/final.mp4");
}

#[tokio::test]
async fn stitch_rejects_empty_and_foreign_clips() {
    let t = build_test_app();

    let empty = post_json(&t.app, "/api/v1/stitch", json!({ "clips": [] })).await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);

    let foreign = post_json(&t.app, "/api/v1/stitch", json!({ "clips": ["/etc/hosts"] })).await;
    assert_eq!(foreign.status(), StatusCode::BAD_REQUEST);
}
