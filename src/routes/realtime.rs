//! Realtime WebSocket route configuration.

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::realtime::realtime_handler;
use crate::state::AppState;

/// Create the realtime WebSocket router.
///
/// # Endpoint
///
/// `GET /realtime` - WebSocket upgrade for a streaming voice session
///
/// # Protocol
///
/// After the upgrade, clients send:
/// - Binary frames of raw PCM audio, or
/// - JSON text frames: `{"audio": "<base64>"}` or `{"text": "..."}`
///
/// The server pushes JSON notifications tagged by `type`:
/// `response.audio.delta`, `response.audio_transcript.delta`, `text_delta`
/// and `transcription`, each carrying the originating item `id`.
pub fn create_realtime_router() -> Router<AppState> {
    Router::new()
        .route("/realtime", get(realtime_handler))
        .layer(TraceLayer::new_for_http())
}
