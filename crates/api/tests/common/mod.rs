#![allow(dead_code)]

use axum::body::Body;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{request, Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

use reelswap_api::config::ServerConfig;
use reelswap_api::handlers::stages::STATELESS_DIR;
use reelswap_api::router::build_app_router;
use reelswap_api::state::AppState;
use reelswap_pipeline::testing::{fake_services, FakeServices};

pub const TEST_TOKEN: &str = "test-token";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        api_token: TEST_TOKEN.to_string(),
    }
}

/// The production router over in-memory fakes, plus the fakes and the
/// scratch directory that backs the work dir.
pub struct TestApp {
    pub app: Router,
    pub fakes: FakeServices,
    pub dir: TempDir,
}

impl TestApp {
    /// Entries left behind in the stateless scratch area.
    pub fn stateless_leftovers(&self) -> usize {
        std::fs::read_dir(self.dir.path().join(STATELESS_DIR))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

pub fn build_test_app() -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let fakes = fake_services(dir.path());
    let state = AppState::new(test_config(), fakes.services.clone());
    TestApp {
        app: build_app_router(state),
        fakes,
        dir,
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

pub fn authed(method: Method, uri: &str) -> request::Builder {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(AUTHORIZATION, format!("Bearer {TEST_TOKEN}"))
}

pub async fn send(app: &Router, request: Request<Body>) -> Response<Body> {
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, authed(Method::GET, uri).body(Body::empty()).unwrap()).await
}

pub async fn delete(app: &Router, uri: &str) -> Response<Body> {
    send(app, authed(Method::DELETE, uri).body(Body::empty()).unwrap()).await
}

pub async fn post_empty(app: &Router, uri: &str) -> Response<Body> {
    send(app, authed(Method::POST, uri).body(Body::empty()).unwrap()).await
}

pub async fn send_json(
    app: &Router,
    method: Method,
    uri: &str,
    json: serde_json::Value,
) -> Response<Body> {
    let request = authed(method, uri)
        .header(CONTENT_TYPE, "application/json")
        .body(Body::from(json.to_string()))
        .unwrap();
    send(app, request).await
}

pub async fn post_json(app: &Router, uri: &str, json: serde_json::Value) -> Response<Body> {
    send_json(app, Method::POST, uri, json).await
}

pub async fn put_json(app: &Router, uri: &str, json: serde_json::Value) -> Response<Body> {
    send_json(app, Method::PUT, uri, json).await
}

const BOUNDARY: &str = "reelswap-test-boundary";

/// A `multipart/form-data` request with one file part per field.
pub fn multipart_request(method: Method, uri: &str, fields: &[(&str, &[u8])]) -> Request<Body> {
    let mut body = Vec::new();
    for (name, data) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"{name}\"; filename=\"{name}.png\"\r\n\
                 Content-Type: application/octet-stream\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    authed(method, uri)
        .header(CONTENT_TYPE, format!("multipart/form-data; boundary={BOUNDARY}"))
        .body(Body::from(body))
        .unwrap()
}

// ---------------------------------------------------------------------------
// Responses
// ---------------------------------------------------------------------------

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

// ---------------------------------------------------------------------------
// Remote fixtures
// ---------------------------------------------------------------------------

/// Serve a small `video/mp4` body and return its URL.
pub async fn spawn_video_server() -> String {
    let router = Router::new().route(
        "/video.mp4",
        axum::routing::get(|| async { ([(CONTENT_TYPE, "video/mp4")], b"fake-mp4".to_vec()) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/video.mp4")
}
