//! Voicebridge server binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, anyhow};
use axum::http::{HeaderValue, Method, header::CONTENT_TYPE};
use clap::Parser;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use voicebridge::config::AppConfig;
use voicebridge::routes::{create_public_router, create_realtime_router, create_static_router};
use voicebridge::state::AppState;
use voicebridge::tools::ToolRegistry;

#[derive(Parser, Debug)]
#[command(name = "voicebridge")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to an env file to load instead of ./.env
    #[arg(long = "env-file", value_name = "FILE")]
    env_file: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load the env file before reading any configuration
    match cli.env_file {
        Some(ref path) => {
            dotenvy::from_path(path)
                .with_context(|| format!("Failed to load env file {}", path.display()))?;
        }
        None => {
            let _ = dotenvy::dotenv();
        }
    }

    tracing_subscriber::fmt::init();

    // Crypto provider for the upstream TLS connection, must be installed
    // before the first session connects
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow!("Failed to install default crypto provider"))?;

    let config = AppConfig::from_env()?;

    // Tools are registered here at startup; an empty registry is valid and
    // simply advertises no tools to the model.
    let tools = ToolRegistry::new();
    let state = AppState::new(config, tools);

    let cors_layer = build_cors_layer(&state.config.server.cors_allowed_origins);

    let mut app = create_public_router().merge(create_realtime_router());
    if let Some(ref static_dir) = state.config.server.static_dir {
        info!("Serving static assets from {}", static_dir.display());
        app = app.merge(create_static_router(static_dir));
    }
    let app = app.with_state(state.clone()).layer(cors_layer);

    let address = state.config.server.address();
    let socket_addr: SocketAddr = address
        .parse()
        .map_err(|e| anyhow!("Invalid server address '{}': {}", address, e))?;

    info!("Server listening on http://{socket_addr}");
    let listener = TcpListener::bind(&socket_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let methods = [Method::GET, Method::POST, Method::OPTIONS];
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(methods)
            .allow_headers([CONTENT_TYPE])
    } else if origins.is_empty() {
        // Same-origin only; browsers block cross-origin requests
        CorsLayer::new()
            .allow_methods(methods)
            .allow_headers([CONTENT_TYPE])
    } else {
        let origins: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(methods)
            .allow_headers([CONTENT_TYPE])
            .allow_credentials(true)
    }
}
