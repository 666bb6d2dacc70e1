pub mod health;
pub mod runs;
pub mod stages;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /extract, /faceswap, /generate, /stitch     stateless stage calls
/// /runs/...                                   tracked pipeline runs
/// ```
///
/// Everything here requires the API token.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .merge(stages::router())
        .nest("/runs", runs::router())
}
