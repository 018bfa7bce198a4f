//! Audio frame codec for the client channel.
//!
//! Audio travels to and from the browser either as native binary WebSocket
//! frames (used as-is) or inside JSON messages as base64 text. This module
//! owns the text-safe encoding so the relay loops never touch base64 engines
//! directly.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

/// Errors raised while decoding client audio payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload was not valid base64
    #[error("invalid base64 audio payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),
}

/// Encode raw audio bytes into the text-safe wire representation.
pub fn encode_audio(audio: &[u8]) -> String {
    STANDARD.encode(audio)
}

/// Decode a text-safe audio payload back into raw bytes.
///
/// Failures are non-fatal by contract: callers drop the chunk and keep the
/// session alive.
pub fn decode_audio(payload: &str) -> Result<Vec<u8>, CodecError> {
    Ok(STANDARD.decode(payload)?)
}
