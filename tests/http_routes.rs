//! Route-level tests for the HTTP surface.

use axum::body::Body;
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use voicebridge::config::{AppConfig, ServerConfig, SessionDefaults, UpstreamConfig};
use voicebridge::routes::{create_public_router, create_static_router};
use voicebridge::state::AppState;
use voicebridge::tools::ToolRegistry;

fn test_state() -> AppState {
    AppState::new(
        AppConfig {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 0,
                cors_allowed_origins: Vec::new(),
                static_dir: None,
                max_message_bytes: 1024,
            },
            upstream: UpstreamConfig {
                endpoint: "https://example.openai.azure.com".to_string(),
                api_key: "key".to_string(),
                deployment: "gpt-4o-realtime".to_string(),
                api_version: "2024-10-01-preview".to_string(),
            },
            session: SessionDefaults {
                instructions: "Be brief.".to_string(),
                temperature: 0.6,
                voice: None,
                vad_threshold: 0.2,
                vad_prefix_padding_ms: 300,
                vad_silence_duration_ms: 500,
                transcription_model: "whisper-1".to_string(),
            },
        },
        ToolRegistry::new(),
    )
}

#[tokio::test]
async fn test_health_reports_ok_and_version() {
    let app = create_public_router().with_state(test_state());

    let response = app
        .oneshot(
            Request::get("/health")
                .body(Body::empty())
                .expect("Should build request"),
        )
        .await
        .expect("Should route request");
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Should read body");
    let json: serde_json::Value = serde_json::from_slice(&body).expect("Should parse");
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
}

#[tokio::test]
async fn test_index_served_from_static_dir() {
    let dir = std::env::temp_dir().join("voicebridge-http-routes-test");
    std::fs::create_dir_all(&dir).expect("Should create static dir");
    std::fs::write(dir.join("index.html"), "<html>voicebridge client</html>")
        .expect("Should write index page");

    let app = create_static_router(&dir).with_state(test_state());

    let response = app
        .oneshot(
            Request::get("/")
                .body(Body::empty())
                .expect("Should build request"),
        )
        .await
        .expect("Should route request");
    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Should read body");
    assert!(String::from_utf8_lossy(&body).contains("voicebridge client"));
}

#[tokio::test]
async fn test_assets_served_under_static_prefix() {
    let dir = std::env::temp_dir().join("voicebridge-http-routes-test");
    std::fs::create_dir_all(&dir).expect("Should create static dir");
    std::fs::write(dir.join("app.js"), "console.log('ready');").expect("Should write asset");

    let app = create_static_router(&dir).with_state(test_state());

    let response = app
        .oneshot(
            Request::get("/static/app.js")
                .body(Body::empty())
                .expect("Should build request"),
        )
        .await
        .expect("Should route request");
    assert_eq!(response.status(), StatusCode::OK);
}
