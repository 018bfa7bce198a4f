//! Voicebridge: a realtime voice relay gateway.
//!
//! Bridges one client WebSocket to one upstream conversational-AI session:
//! client audio and text flow in, synthesized audio, transcripts and text
//! deltas flow back out, and model-initiated function calls are dispatched
//! against a local tool registry.

pub mod config;
pub mod core;
pub mod handlers;
pub mod relay;
pub mod routes;
pub mod state;
pub mod tools;

// Re-export commonly used items for convenience
pub use config::AppConfig;
pub use state::AppState;
