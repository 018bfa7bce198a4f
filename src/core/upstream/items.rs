//! Event, item and content-part model for the upstream session.
//!
//! Every attribute-checked union of the upstream protocol is an explicit enum
//! here, so an unhandled kind cannot pass through silently. Items and content
//! parts carry their chunked payloads as finite, single-pass channels: the
//! consumer half lives on the item handed to the relay, the paired producer
//! half is driven by the wire demux (or by a test). Draining happens exactly
//! once; the channels are not restartable.
//!
//! Item and part channels are unbounded on purpose: the demux loop that feeds
//! them must never block on a slow per-item consumer, or it would stall the
//! ordered event stream for every other item.

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use super::{UpstreamError, UpstreamResult};

/// One event from the upstream session's ordered stream.
#[derive(Debug)]
pub enum UpstreamEvent {
    /// A user utterance turn was detected on the input audio buffer
    InputAudio(InputAudioItem),
    /// The upstream started generating a reply
    Response(ResponseHandle),
}

// =============================================================================
// Input audio items
// =============================================================================

/// Finalized attributes of an input audio turn.
#[derive(Debug, Clone, PartialEq)]
pub struct InputAudioDone {
    /// Transcript of the utterance (empty if transcription is disabled)
    pub transcript: String,
    /// Offset of speech start in the input buffer, milliseconds
    pub audio_start_ms: Option<u64>,
    /// Offset of speech end in the input buffer, milliseconds
    pub audio_end_ms: Option<u64>,
}

/// One user utterance turn. Readable only after its completion signal
/// resolves, which happens when the upstream finishes transcribing it.
#[derive(Debug)]
pub struct InputAudioItem {
    /// Item identifier assigned by the upstream
    pub id: String,
    done: oneshot::Receiver<InputAudioDone>,
}

impl InputAudioItem {
    /// Create an item together with its producer half.
    pub fn channel(id: impl Into<String>) -> (Self, InputAudioProducer) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                id: id.into(),
                done: rx,
            },
            InputAudioProducer { done: tx },
        )
    }

    /// Wait for the turn's completion signal.
    pub async fn await_done(self) -> UpstreamResult<InputAudioDone> {
        self.done.await.map_err(|_| UpstreamError::ItemAbandoned)
    }
}

/// Producer half of an [`InputAudioItem`].
#[derive(Debug)]
pub struct InputAudioProducer {
    done: oneshot::Sender<InputAudioDone>,
}

impl InputAudioProducer {
    /// Resolve the item's completion signal.
    pub fn resolve(self, done: InputAudioDone) {
        let _ = self.done.send(done);
    }
}

// =============================================================================
// Responses
// =============================================================================

/// Terminal (or current) status of an upstream response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseStatus {
    InProgress,
    Completed,
    Cancelled,
    Incomplete,
    Failed,
    /// A status string this build does not know about
    Other(String),
}

impl ResponseStatus {
    /// Parse the wire status string.
    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => ResponseStatus::InProgress,
            "completed" => ResponseStatus::Completed,
            "cancelled" => ResponseStatus::Cancelled,
            "incomplete" => ResponseStatus::Incomplete,
            "failed" => ResponseStatus::Failed,
            other => ResponseStatus::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResponseStatus::InProgress => write!(f, "in_progress"),
            ResponseStatus::Completed => write!(f, "completed"),
            ResponseStatus::Cancelled => write!(f, "cancelled"),
            ResponseStatus::Incomplete => write!(f, "incomplete"),
            ResponseStatus::Failed => write!(f, "failed"),
            ResponseStatus::Other(s) => write!(f, "{s}"),
        }
    }
}

/// One upstream-generated reply: an ordered sequence of items followed by a
/// terminal status.
#[derive(Debug)]
pub struct ResponseHandle {
    /// Response identifier assigned by the upstream
    pub id: String,
    items: mpsc::UnboundedReceiver<ResponseItem>,
    status: oneshot::Receiver<ResponseStatus>,
}

impl ResponseHandle {
    /// Create a response together with its producer half.
    pub fn channel(id: impl Into<String>) -> (Self, ResponseProducer) {
        let (items_tx, items_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = oneshot::channel();
        (
            Self {
                id: id.into(),
                items: items_rx,
                status: status_rx,
            },
            ResponseProducer {
                items: items_tx,
                status: status_tx,
            },
        )
    }

    /// Next item of the response, in arrival order. `None` once the sequence
    /// is exhausted.
    pub async fn next_item(&mut self) -> Option<ResponseItem> {
        self.items.recv().await
    }

    /// Terminal status, available after the item sequence is exhausted.
    pub async fn status(self) -> ResponseStatus {
        self.status
            .await
            .unwrap_or_else(|_| ResponseStatus::Other("abandoned".to_string()))
    }
}

/// Producer half of a [`ResponseHandle`].
#[derive(Debug)]
pub struct ResponseProducer {
    items: mpsc::UnboundedSender<ResponseItem>,
    status: oneshot::Sender<ResponseStatus>,
}

impl ResponseProducer {
    /// Append an item to the response. Returns false if the consumer is gone.
    pub fn push_item(&self, item: ResponseItem) -> bool {
        self.items.send(item).is_ok()
    }

    /// Close the item sequence and publish the terminal status.
    pub fn finish(self, status: ResponseStatus) {
        drop(self.items);
        let _ = self.status.send(status);
    }
}

/// One addressable unit within a response.
#[derive(Debug)]
pub enum ResponseItem {
    Message(MessageItem),
    FunctionCall(FunctionCallItem),
}

// =============================================================================
// Message items and content parts
// =============================================================================

/// An assistant message: an ordered sequence of content parts.
#[derive(Debug)]
pub struct MessageItem {
    /// Item identifier
    pub id: String,
    /// Identifier of the owning response
    pub response_id: String,
    parts: mpsc::UnboundedReceiver<ContentPart>,
}

impl MessageItem {
    /// Create a message item together with its producer half.
    pub fn channel(
        id: impl Into<String>,
        response_id: impl Into<String>,
    ) -> (Self, MessageProducer) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: id.into(),
                response_id: response_id.into(),
                parts: rx,
            },
            MessageProducer { parts: tx },
        )
    }

    /// Next content part, in declaration order. `None` once the item is done.
    pub async fn next_part(&mut self) -> Option<ContentPart> {
        self.parts.recv().await
    }
}

/// Producer half of a [`MessageItem`].
#[derive(Debug)]
pub struct MessageProducer {
    parts: mpsc::UnboundedSender<ContentPart>,
}

impl MessageProducer {
    /// Append a content part. Returns false if the consumer is gone.
    pub fn push_part(&self, part: ContentPart) -> bool {
        self.parts.send(part).is_ok()
    }

    /// Close the part sequence.
    pub fn finish(self) {}
}

/// A typed fragment of a message item's payload.
#[derive(Debug)]
pub enum ContentPart {
    Audio(AudioContent),
    Text(TextContent),
}

/// Audio content part: raw audio chunks plus a parallel transcript-delta
/// sequence, independently drainable.
#[derive(Debug)]
pub struct AudioContent {
    audio: mpsc::UnboundedReceiver<Bytes>,
    transcript: mpsc::UnboundedReceiver<String>,
}

impl AudioContent {
    /// Create an audio part together with its producer half.
    pub fn channel() -> (Self, AudioProducer) {
        let (audio_tx, audio_rx) = mpsc::unbounded_channel();
        let (transcript_tx, transcript_rx) = mpsc::unbounded_channel();
        (
            Self {
                audio: audio_rx,
                transcript: transcript_rx,
            },
            AudioProducer {
                audio: audio_tx,
                transcript: transcript_tx,
            },
        )
    }

    /// Split into the two independent single-pass chunk sequences.
    pub fn into_chunks(self) -> (AudioChunks, TranscriptChunks) {
        (AudioChunks(self.audio), TranscriptChunks(self.transcript))
    }
}

/// Finite single-pass sequence of raw audio chunks.
#[derive(Debug)]
pub struct AudioChunks(mpsc::UnboundedReceiver<Bytes>);

impl AudioChunks {
    /// Next chunk in production order. `None` once the sequence is exhausted.
    pub async fn next(&mut self) -> Option<Bytes> {
        self.0.recv().await
    }
}

/// Finite single-pass sequence of transcript deltas.
#[derive(Debug)]
pub struct TranscriptChunks(mpsc::UnboundedReceiver<String>);

impl TranscriptChunks {
    /// Next delta in production order. `None` once the sequence is exhausted.
    pub async fn next(&mut self) -> Option<String> {
        self.0.recv().await
    }
}

/// Producer half of an [`AudioContent`].
#[derive(Debug)]
pub struct AudioProducer {
    audio: mpsc::UnboundedSender<Bytes>,
    transcript: mpsc::UnboundedSender<String>,
}

impl AudioProducer {
    /// Append an audio chunk.
    pub fn push_audio(&self, chunk: Bytes) -> bool {
        self.audio.send(chunk).is_ok()
    }

    /// Append a transcript delta.
    pub fn push_transcript(&self, delta: impl Into<String>) -> bool {
        self.transcript.send(delta.into()).is_ok()
    }

    /// Close both sequences.
    pub fn finish(self) {}
}

/// Text content part: a single chunked delta sequence.
#[derive(Debug)]
pub struct TextContent {
    chunks: mpsc::UnboundedReceiver<String>,
}

impl TextContent {
    /// Create a text part together with its producer half.
    pub fn channel() -> (Self, TextProducer) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { chunks: rx }, TextProducer { chunks: tx })
    }

    /// Next delta in production order. `None` once the sequence is exhausted.
    pub async fn next_chunk(&mut self) -> Option<String> {
        self.chunks.recv().await
    }
}

/// Producer half of a [`TextContent`].
#[derive(Debug)]
pub struct TextProducer {
    chunks: mpsc::UnboundedSender<String>,
}

impl TextProducer {
    /// Append a text delta.
    pub fn push(&self, delta: impl Into<String>) -> bool {
        self.chunks.send(delta.into()).is_ok()
    }

    /// Close the sequence.
    pub fn finish(self) {}
}

// =============================================================================
// Function call items
// =============================================================================

/// A model-issued function call. The arguments payload finalizes
/// asynchronously; the item is logically incomplete until then.
#[derive(Debug)]
pub struct FunctionCallItem {
    /// Item identifier
    pub id: String,
    /// Call identifier to reference when submitting the output
    pub call_id: String,
    /// Target tool name
    pub name: String,
    arguments: oneshot::Receiver<String>,
}

impl FunctionCallItem {
    /// Create a function-call item together with its producer half.
    pub fn channel(
        id: impl Into<String>,
        call_id: impl Into<String>,
        name: impl Into<String>,
    ) -> (Self, FunctionCallProducer) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                id: id.into(),
                call_id: call_id.into(),
                name: name.into(),
                arguments: rx,
            },
            FunctionCallProducer { arguments: tx },
        )
    }

    /// Wait for the arguments payload to finalize.
    pub async fn await_arguments(self) -> UpstreamResult<String> {
        self.arguments
            .await
            .map_err(|_| UpstreamError::ItemAbandoned)
    }
}

/// Producer half of a [`FunctionCallItem`].
#[derive(Debug)]
pub struct FunctionCallProducer {
    arguments: oneshot::Sender<String>,
}

impl FunctionCallProducer {
    /// Finalize the arguments payload.
    pub fn resolve(self, arguments: impl Into<String>) {
        let _ = self.arguments.send(arguments.into());
    }
}
