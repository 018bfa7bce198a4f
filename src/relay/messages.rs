//! Message types on the client WebSocket channel.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::trace;

/// A frame received from the client socket, after transport-level handling.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    /// Native binary frame carrying raw audio
    Binary(Bytes),
    /// Text frame carrying a JSON message
    Text(String),
}

/// JSON messages the client may send on the text channel.
///
/// The client protocol is untagged: each message is a single-field object and
/// the field name selects the variant.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum ClientMessage {
    /// Base64-encoded audio chunk
    Audio {
        /// Base64 payload
        audio: String,
    },
    /// Free-form user text, submitted as a conversation item
    Text {
        /// Message text
        text: String,
    },
}

/// Notifications pushed to the client, tagged by type.
///
/// Audio and transcript deltas reuse the upstream event names so existing
/// clients keep working; every notification carries the originating item id
/// so interleaved items from concurrent responses can be reassembled.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ClientNotification {
    /// Chunk of synthesized output audio, base64-encoded
    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        /// Base64 audio payload
        delta: String,
        /// Originating output item id
        id: String,
    },

    /// Chunk of the transcript of synthesized output audio
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        /// Transcript text chunk
        delta: String,
        /// Originating output item id
        id: String,
    },

    /// Chunk of a text content part
    #[serde(rename = "text_delta")]
    TextDelta {
        /// Text chunk
        delta: String,
        /// Originating output item id
        id: String,
    },

    /// Completed transcription of a user speech turn
    #[serde(rename = "transcription")]
    Transcription {
        /// Full transcript of the turn
        text: String,
        /// Input item id of the turn
        id: String,
    },
}

/// Cloneable sender for client notifications.
///
/// Sends after the client channel is torn down are no-ops: dispatcher tasks
/// outliving the socket drain their items without erroring.
#[derive(Clone)]
pub struct NotificationSink {
    tx: mpsc::Sender<ClientNotification>,
}

impl NotificationSink {
    pub fn new(tx: mpsc::Sender<ClientNotification>) -> Self {
        Self { tx }
    }

    /// Deliver a notification, silently discarding it if the client is gone.
    pub async fn send(&self, notification: ClientNotification) {
        if self.tx.send(notification).await.is_err() {
            trace!("Client channel closed, notification dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_message_audio_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"audio":"AAAA"}"#).expect("Should parse");
        assert_eq!(
            msg,
            ClientMessage::Audio {
                audio: "AAAA".to_string()
            }
        );
    }

    #[test]
    fn test_client_message_text_parses() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"text":"hello"}"#).expect("Should parse");
        assert_eq!(
            msg,
            ClientMessage::Text {
                text: "hello".to_string()
            }
        );
    }

    #[test]
    fn test_client_message_rejects_unknown_shape() {
        assert!(serde_json::from_str::<ClientMessage>(r#"{"video":"x"}"#).is_err());
        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn test_notification_serialization() {
        let json = serde_json::to_string(&ClientNotification::AudioDelta {
            delta: "AAAA".to_string(),
            id: "item_1".to_string(),
        })
        .expect("Should serialize");
        assert_eq!(
            json,
            r#"{"type":"response.audio.delta","delta":"AAAA","id":"item_1"}"#
        );

        let json = serde_json::to_string(&ClientNotification::Transcription {
            text: "hi there".to_string(),
            id: "in_1".to_string(),
        })
        .expect("Should serialize");
        assert_eq!(json, r#"{"type":"transcription","text":"hi there","id":"in_1"}"#);
    }

    #[tokio::test]
    async fn test_sink_is_noop_after_teardown() {
        let (tx, rx) = mpsc::channel(4);
        let sink = NotificationSink::new(tx);
        drop(rx);
        sink.send(ClientNotification::TextDelta {
            delta: "x".to_string(),
            id: "item_1".to_string(),
        })
        .await;
    }
}
