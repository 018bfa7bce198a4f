//! Server configuration.
//!
//! Configuration is loaded from environment variables (a `.env` file is
//! loaded at startup, actual environment variables override it). Everything
//! the relay needs is carried explicitly in these structs; no module reads
//! the environment after startup.

use std::env;
use std::path::PathBuf;

use thiserror::Error;
use url::Url;

use crate::core::upstream::{InputTranscription, SessionOptions, ToolDescriptor, TurnDetection};

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("missing required environment variable: {0}")]
    MissingVar(&'static str),

    /// An environment variable holds a value of the wrong shape
    #[error("invalid value for {name}: {reason}")]
    InvalidVar {
        /// Variable name
        name: &'static str,
        /// What was wrong with it
        reason: String,
    },
}

/// HTTP/WebSocket server settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Allowed CORS origins; empty means allow any
    pub cors_allowed_origins: Vec<String>,
    /// Directory of static assets to serve at `/`, if any
    pub static_dir: Option<PathBuf>,
    /// Maximum accepted client WebSocket message size, bytes
    pub max_message_bytes: usize,
}

impl ServerConfig {
    /// The bind address as "host:port".
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Upstream realtime endpoint settings.
#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    /// Endpoint base URL (https or wss)
    pub endpoint: String,
    /// API key, sent as the `api-key` header
    pub api_key: String,
    /// Model deployment name
    pub deployment: String,
    /// API version query parameter
    pub api_version: String,
}

impl UpstreamConfig {
    /// The full WebSocket URL for one realtime session.
    pub fn session_url(&self) -> String {
        let base = self.endpoint.trim_end_matches('/');
        let base = if let Some(rest) = base.strip_prefix("https://") {
            format!("wss://{rest}")
        } else if let Some(rest) = base.strip_prefix("http://") {
            format!("ws://{rest}")
        } else {
            base.to_string()
        };
        format!(
            "{base}/openai/realtime?api-version={}&deployment={}",
            self.api_version, self.deployment
        )
    }
}

/// Defaults applied to every session's one-time configuration.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    /// System instructions for the assistant
    pub instructions: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Output voice, if pinned
    pub voice: Option<String>,
    /// Server VAD activation threshold
    pub vad_threshold: f32,
    /// Audio included before detected speech, milliseconds
    pub vad_prefix_padding_ms: u32,
    /// Silence duration that ends a turn, milliseconds
    pub vad_silence_duration_ms: u32,
    /// Input transcription model
    pub transcription_model: String,
}

impl SessionDefaults {
    /// Build the session options for one session, advertising the given tools.
    pub fn to_options(&self, tools: Vec<ToolDescriptor>) -> SessionOptions {
        SessionOptions {
            instructions: Some(self.instructions.clone()),
            temperature: Some(self.temperature),
            voice: self.voice.clone(),
            turn_detection: Some(TurnDetection::ServerVad {
                threshold: Some(self.vad_threshold),
                prefix_padding_ms: Some(self.vad_prefix_padding_ms),
                silence_duration_ms: Some(self.vad_silence_duration_ms),
            }),
            input_audio_transcription: Some(InputTranscription {
                model: self.transcription_model.clone(),
            }),
            modalities: None,
            tools,
        }
    }
}

/// Complete application configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
    pub session: SessionDefaults,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let server = ServerConfig {
            host: var_or("HOST", "0.0.0.0"),
            port: parsed_var_or("PORT", 8080)?,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS")
                .ok()
                .map(|v| {
                    v.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            static_dir: env::var("STATIC_DIR").ok().map(PathBuf::from),
            max_message_bytes: parsed_var_or("MAX_MESSAGE_BYTES", 1024 * 1024)?,
        };

        let upstream = UpstreamConfig {
            endpoint: required_var("UPSTREAM_ENDPOINT")?,
            api_key: required_var("UPSTREAM_API_KEY")?,
            deployment: required_var("UPSTREAM_DEPLOYMENT")?,
            api_version: var_or("UPSTREAM_API_VERSION", "2024-10-01-preview"),
        };

        let session = SessionDefaults {
            instructions: var_or("SESSION_INSTRUCTIONS", "You are a helpful assistant."),
            temperature: parsed_var_or("SESSION_TEMPERATURE", 0.6)?,
            voice: env::var("SESSION_VOICE").ok().filter(|v| !v.is_empty()),
            vad_threshold: parsed_var_or("VAD_THRESHOLD", 0.2)?,
            vad_prefix_padding_ms: parsed_var_or("VAD_PREFIX_PADDING_MS", 300)?,
            vad_silence_duration_ms: parsed_var_or("VAD_SILENCE_DURATION_MS", 500)?,
            transcription_model: var_or("TRANSCRIPTION_MODEL", "whisper-1"),
        };

        let config = Self {
            server,
            upstream,
            session,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let endpoint = Url::parse(&self.upstream.endpoint).map_err(|e| ConfigError::InvalidVar {
            name: "UPSTREAM_ENDPOINT",
            reason: e.to_string(),
        })?;
        if !matches!(endpoint.scheme(), "https" | "http" | "wss" | "ws") {
            return Err(ConfigError::InvalidVar {
                name: "UPSTREAM_ENDPOINT",
                reason: "must be an http(s) or ws(s) URL".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.session.vad_threshold) {
            return Err(ConfigError::InvalidVar {
                name: "VAD_THRESHOLD",
                reason: "must be between 0.0 and 1.0".to_string(),
            });
        }
        if !(0.0..=2.0).contains(&self.session.temperature) {
            return Err(ConfigError::InvalidVar {
                name: "SESSION_TEMPERATURE",
                reason: "must be between 0.0 and 2.0".to_string(),
            });
        }
        Ok(())
    }
}

fn var_or(name: &'static str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn required_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .ok()
        .filter(|v| !v.is_empty())
        .ok_or(ConfigError::MissingVar(name))
}

fn parsed_var_or<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidVar {
            name,
            reason: e.to_string(),
        }),
        Err(_) => Ok(default),
    }
}
