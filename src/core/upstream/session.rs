//! Session trait and configuration types for the upstream collaborator.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::items::UpstreamEvent;
use super::UpstreamResult;

/// Configuration for turn detection on the input audio stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum TurnDetection {
    /// Server-side voice activity detection
    #[serde(rename = "server_vad")]
    ServerVad {
        /// Activation threshold (0.0 to 1.0)
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        /// Audio included before detected speech, milliseconds
        #[serde(skip_serializing_if = "Option::is_none")]
        prefix_padding_ms: Option<u32>,
        /// Silence duration that ends a turn, milliseconds
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
    /// No automatic turn detection
    #[serde(rename = "none")]
    None,
}

impl Default for TurnDetection {
    fn default() -> Self {
        TurnDetection::ServerVad {
            threshold: Some(0.5),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
        }
    }
}

/// Configuration for input audio transcription.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InputTranscription {
    /// Transcription model identifier (e.g. "whisper-1")
    pub model: String,
}

/// Descriptor of a tool the model may call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolDescriptor {
    /// Tool name, matched against the registry on dispatch
    pub name: String,
    /// Human-readable description shown to the model
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// JSON schema of the arguments payload
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parameters: Option<serde_json::Value>,
}

/// Session parameters issued by the configurator, exactly once per session.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionOptions {
    /// System instructions for the assistant
    #[serde(default)]
    pub instructions: Option<String>,

    /// Sampling temperature
    #[serde(default)]
    pub temperature: Option<f32>,

    /// Voice for audio output
    #[serde(default)]
    pub voice: Option<String>,

    /// Turn detection policy
    #[serde(default)]
    pub turn_detection: Option<TurnDetection>,

    /// Input audio transcription options
    #[serde(default)]
    pub input_audio_transcription: Option<InputTranscription>,

    /// Response modalities (text, audio)
    #[serde(default)]
    pub modalities: Option<Vec<String>>,

    /// Tools available to the model
    #[serde(default)]
    pub tools: Vec<ToolDescriptor>,
}

/// An item submitted into the conversation by this relay.
#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingItem {
    /// Free-form user text
    UserText {
        /// Message text
        text: String,
    },
    /// Output of a completed function call
    FunctionCallOutput {
        /// Call identifier of the originating function-call item
        call_id: String,
        /// Tool output, serialized
        output: String,
    },
}

/// One upstream conversational-AI session.
///
/// Shared read/write between the inbound relay and the outbound dispatcher
/// for the session's lifetime. The event stream is single-pass: it is handed
/// out once via [`take_events`](UpstreamSession::take_events) and a second
/// request fails loudly.
#[async_trait]
pub trait UpstreamSession: Send + Sync + 'static {
    /// Issue the one-time session configuration. Must be called before any
    /// audio or text traffic is forwarded.
    async fn configure(&self, options: &SessionOptions) -> UpstreamResult<()>;

    /// Append raw audio bytes to the input audio buffer.
    async fn send_audio(&self, audio: &[u8]) -> UpstreamResult<()>;

    /// Create a conversation item, optionally linked after a previous item.
    async fn send_item(
        &self,
        item: OutgoingItem,
        previous_item_id: Option<&str>,
    ) -> UpstreamResult<()>;

    /// Request the model to generate a response.
    async fn create_response(&self) -> UpstreamResult<()>;

    /// Take the ordered event stream. Single-pass: the second call returns
    /// [`UpstreamError::EventsAlreadyTaken`](super::UpstreamError::EventsAlreadyTaken).
    fn take_events(&self) -> UpstreamResult<mpsc::UnboundedReceiver<UpstreamEvent>>;

    /// Close the session, ending the event stream.
    async fn close(&self) -> UpstreamResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_detection_serialization() {
        let td = TurnDetection::ServerVad {
            threshold: Some(0.2),
            prefix_padding_ms: Some(300),
            silence_duration_ms: Some(500),
        };
        let json = serde_json::to_string(&td).expect("Should serialize");
        assert!(json.contains(r#""type":"server_vad""#));
        assert!(json.contains(r#""threshold":0.2"#));

        let none = serde_json::to_string(&TurnDetection::None).expect("Should serialize");
        assert!(none.contains(r#""type":"none""#));
    }

    #[test]
    fn test_tool_descriptor_omits_empty_fields() {
        let tool = ToolDescriptor {
            name: "search".to_string(),
            description: None,
            parameters: None,
        };
        let json = serde_json::to_string(&tool).expect("Should serialize");
        assert_eq!(json, r#"{"name":"search"}"#);
    }
}
