//! HTTP route configuration.

pub mod realtime;

use std::path::Path;

use axum::{Json, Router, routing::get};
use serde_json::json;
use tower_http::services::{ServeDir, ServeFile};

use crate::state::AppState;

pub use realtime::create_realtime_router;

/// Create the public router: health check and version info.
pub fn create_public_router() -> Router<AppState> {
    Router::new().route("/health", get(health))
}

/// Create the static asset router: the client page at `/`, assets under
/// `/static`.
pub fn create_static_router(dir: &Path) -> Router<AppState> {
    Router::new()
        .route_service("/", ServeFile::new(dir.join("index.html")))
        .nest_service("/static", ServeDir::new(dir))
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
