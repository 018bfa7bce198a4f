//! Upstream conversational-AI session contract.
//!
//! The relay core consumes this contract and never speaks the upstream wire
//! protocol itself: it issues commands through [`UpstreamSession`] and drains
//! the ordered event stream the session exposes. [`wire`] is the production
//! WebSocket implementation; tests substitute a channel-backed mock.

mod items;
mod session;
pub mod wire;

use thiserror::Error;

pub use items::{
    AudioChunks, AudioContent, AudioProducer, ContentPart, FunctionCallItem, FunctionCallProducer,
    InputAudioDone, InputAudioItem, InputAudioProducer, MessageItem, MessageProducer,
    ResponseHandle, ResponseItem, ResponseProducer, ResponseStatus, TextContent, TextProducer,
    TranscriptChunks, UpstreamEvent,
};
pub use session::{
    InputTranscription, OutgoingItem, SessionOptions, ToolDescriptor, TurnDetection,
    UpstreamSession,
};
pub use wire::WireSession;

/// Errors raised by upstream session operations.
#[derive(Debug, Error)]
pub enum UpstreamError {
    /// Connecting to the upstream endpoint failed
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The upstream rejected the session configuration
    #[error("configuration rejected: {0}")]
    ConfigurationRejected(String),

    /// The session connection is gone
    #[error("session closed")]
    SessionClosed,

    /// The single-pass event stream was requested twice
    #[error("event stream already taken")]
    EventsAlreadyTaken,

    /// The producer side dropped an item before finalizing it
    #[error("item abandoned before completion")]
    ItemAbandoned,

    /// Upstream reported a protocol-level error
    #[error("upstream error: {0}")]
    Protocol(String),

    /// Wire message (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for upstream session operations.
pub type UpstreamResult<T> = Result<T, UpstreamError>;
