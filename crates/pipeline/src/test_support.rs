//! Local HTTP servers standing in for external services.

use axum::http::header;
use axum::routing::get;
use axum::Router;

/// Serve `router` on an ephemeral localhost port and return its base URL.
pub(crate) async fn spawn_server(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

/// Serves a small `video/mp4` body at `/video.mp4`.
pub(crate) async fn spawn_video_server() -> String {
    let router = Router::new().route(
        "/video.mp4",
        get(|| async { ([(header::CONTENT_TYPE, "video/mp4")], b"fake-mp4".to_vec()) }),
    );
    spawn_server(router).await
}
