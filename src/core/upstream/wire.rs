//! WebSocket implementation of the upstream session contract.
//!
//! One connection per session: a write task drains a command channel into the
//! socket, a read task parses server events and demultiplexes them into the
//! item model of [`super::items`]. The relay never sees wire events, only the
//! typed stream handed out by [`WireSession::take_events`].

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;
use std::sync::{Arc, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, warn};

use crate::config::UpstreamConfig;
use crate::core::codec;

use super::items::{
    AudioContent, AudioProducer, ContentPart, FunctionCallItem, FunctionCallProducer,
    InputAudioDone, InputAudioItem, InputAudioProducer, MessageItem, MessageProducer,
    ResponseHandle, ResponseItem, ResponseProducer, ResponseStatus, TextContent, TextProducer,
    UpstreamEvent,
};
use super::session::{OutgoingItem, SessionOptions, TurnDetection, UpstreamSession};
use super::{UpstreamError, UpstreamResult};

/// Capacity of the outbound command channel.
const WRITE_CHANNEL_CAPACITY: usize = 256;

/// How long to wait for the upstream to acknowledge session configuration.
const CONFIGURE_TIMEOUT: Duration = Duration::from_secs(10);

type ConfigureAck = Arc<Mutex<Option<oneshot::Sender<Result<(), String>>>>>;

// =============================================================================
// Wire events (server -> relay)
// =============================================================================

/// Server events this session reacts to. Anything else falls into `Unknown`
/// and is skipped at debug level.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum WireEvent {
    #[serde(rename = "error")]
    Error { error: WireError },

    #[serde(rename = "session.created")]
    SessionCreated,

    #[serde(rename = "session.updated")]
    SessionUpdated,

    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        audio_start_ms: u64,
        item_id: String,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped { audio_end_ms: u64, item_id: String },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted { item_id: String, transcript: String },

    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    TranscriptionFailed { item_id: String },

    #[serde(rename = "response.created")]
    ResponseCreated { response: WireResponse },

    #[serde(rename = "response.output_item.added")]
    OutputItemAdded {
        response_id: String,
        item: WireItem,
    },

    #[serde(rename = "response.content_part.added")]
    ContentPartAdded {
        item_id: String,
        content_index: u32,
        part: WirePart,
    },

    #[serde(rename = "response.audio.delta")]
    AudioDelta {
        item_id: String,
        content_index: u32,
        delta: String,
    },

    #[serde(rename = "response.audio.done")]
    AudioDone,

    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        item_id: String,
        content_index: u32,
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone,

    #[serde(rename = "response.text.delta")]
    TextDelta {
        item_id: String,
        content_index: u32,
        delta: String,
    },

    #[serde(rename = "response.text.done")]
    TextDone,

    #[serde(rename = "response.content_part.done")]
    ContentPartDone { item_id: String, content_index: u32 },

    #[serde(rename = "response.function_call_arguments.done")]
    FunctionCallArgumentsDone { item_id: String, arguments: String },

    #[serde(rename = "response.output_item.done")]
    OutputItemDone { item: WireItem },

    #[serde(rename = "response.done")]
    ResponseDone { response: WireResponse },

    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
struct WireError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    id: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    call_id: Option<String>,
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WirePart {
    #[serde(rename = "type")]
    kind: String,
}

// =============================================================================
// Session
// =============================================================================

/// WebSocket-backed upstream session.
pub struct WireSession {
    write_tx: mpsc::Sender<Message>,
    events: StdMutex<Option<mpsc::UnboundedReceiver<UpstreamEvent>>>,
    configure_ack: ConfigureAck,
    _read_handle: JoinHandle<()>,
    _write_handle: JoinHandle<()>,
}

impl WireSession {
    /// Connect to the upstream endpoint and start the socket tasks.
    pub async fn connect(config: &UpstreamConfig) -> UpstreamResult<Self> {
        let url = config.session_url();
        debug!("Connecting to upstream: {url}");

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| UpstreamError::ConnectionFailed(format!("invalid request: {e}")))?;
        request.headers_mut().insert(
            "api-key",
            config
                .api_key
                .parse()
                .map_err(|_| UpstreamError::ConnectionFailed("invalid api key".to_string()))?,
        );

        let (stream, _response) = connect_async(request)
            .await
            .map_err(|e| UpstreamError::ConnectionFailed(e.to_string()))?;
        let (write, read) = stream.split();

        let (write_tx, write_rx) = mpsc::channel(WRITE_CHANNEL_CAPACITY);
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let configure_ack: ConfigureAck = Arc::new(Mutex::new(None));

        let write_handle = tokio::spawn(write_loop(write, write_rx));
        let read_handle = tokio::spawn(read_loop(
            read,
            Demux::new(events_tx, configure_ack.clone()),
        ));

        Ok(Self {
            write_tx,
            events: StdMutex::new(Some(events_rx)),
            configure_ack,
            _read_handle: read_handle,
            _write_handle: write_handle,
        })
    }

    async fn send_event(&self, event: serde_json::Value) -> UpstreamResult<()> {
        let msg = Message::Text(event.to_string().into());
        self.write_tx
            .send(msg)
            .await
            .map_err(|_| UpstreamError::SessionClosed)
    }
}

#[async_trait]
impl UpstreamSession for WireSession {
    async fn configure(&self, options: &SessionOptions) -> UpstreamResult<()> {
        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let mut pending = self.configure_ack.lock().await;
            *pending = Some(ack_tx);
        }

        let event = json!({
            "event_id": event_id(),
            "type": "session.update",
            "session": session_payload(options),
        });
        self.send_event(event).await?;

        match tokio::time::timeout(CONFIGURE_TIMEOUT, ack_rx).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(message))) => Err(UpstreamError::ConfigurationRejected(message)),
            Ok(Err(_)) => Err(UpstreamError::SessionClosed),
            Err(_) => Err(UpstreamError::ConfigurationRejected(
                "no acknowledgement from upstream".to_string(),
            )),
        }
    }

    async fn send_audio(&self, audio: &[u8]) -> UpstreamResult<()> {
        let event = json!({
            "event_id": event_id(),
            "type": "input_audio_buffer.append",
            "audio": codec::encode_audio(audio),
        });
        self.send_event(event).await
    }

    async fn send_item(
        &self,
        item: OutgoingItem,
        previous_item_id: Option<&str>,
    ) -> UpstreamResult<()> {
        let item_payload = match item {
            OutgoingItem::UserText { text } => json!({
                "type": "message",
                "role": "user",
                "content": [{ "type": "input_text", "text": text }],
            }),
            OutgoingItem::FunctionCallOutput { call_id, output } => json!({
                "type": "function_call_output",
                "call_id": call_id,
                "output": output,
            }),
        };

        let mut event = json!({
            "event_id": event_id(),
            "type": "conversation.item.create",
            "item": item_payload,
        });
        if let Some(previous) = previous_item_id {
            event["previous_item_id"] = json!(previous);
        }
        self.send_event(event).await
    }

    async fn create_response(&self) -> UpstreamResult<()> {
        let event = json!({
            "event_id": event_id(),
            "type": "response.create",
        });
        self.send_event(event).await
    }

    fn take_events(&self) -> UpstreamResult<mpsc::UnboundedReceiver<UpstreamEvent>> {
        let mut guard = self.events.lock().unwrap_or_else(PoisonError::into_inner);
        guard.take().ok_or(UpstreamError::EventsAlreadyTaken)
    }

    async fn close(&self) -> UpstreamResult<()> {
        let _ = self.write_tx.send(Message::Close(None)).await;
        Ok(())
    }
}

fn event_id() -> String {
    format!("evt_{}", &uuid::Uuid::new_v4().simple().to_string()[..12])
}

/// Build the `session.update` payload from session options.
fn session_payload(options: &SessionOptions) -> serde_json::Value {
    let mut session = serde_json::Map::new();
    session.insert(
        "modalities".to_string(),
        json!(options
            .modalities
            .clone()
            .unwrap_or_else(|| vec!["text".to_string(), "audio".to_string()])),
    );
    session.insert("input_audio_format".to_string(), json!("pcm16"));
    session.insert("output_audio_format".to_string(), json!("pcm16"));

    if let Some(ref instructions) = options.instructions {
        session.insert("instructions".to_string(), json!(instructions));
    }
    if let Some(temperature) = options.temperature {
        session.insert("temperature".to_string(), json!(temperature));
    }
    if let Some(ref voice) = options.voice {
        session.insert("voice".to_string(), json!(voice));
    }
    if let Some(ref transcription) = options.input_audio_transcription {
        session.insert(
            "input_audio_transcription".to_string(),
            json!({ "model": transcription.model }),
        );
    }
    match options.turn_detection {
        Some(TurnDetection::None) => {
            session.insert("turn_detection".to_string(), serde_json::Value::Null);
        }
        Some(ref vad) => {
            session.insert("turn_detection".to_string(), json!(vad));
        }
        None => {}
    }
    if !options.tools.is_empty() {
        let tools: Vec<_> = options
            .tools
            .iter()
            .map(|tool| {
                let mut entry = serde_json::Map::new();
                entry.insert("type".to_string(), json!("function"));
                entry.insert("name".to_string(), json!(tool.name));
                if let Some(ref description) = tool.description {
                    entry.insert("description".to_string(), json!(description));
                }
                if let Some(ref parameters) = tool.parameters {
                    entry.insert("parameters".to_string(), parameters.clone());
                }
                serde_json::Value::Object(entry)
            })
            .collect();
        session.insert("tools".to_string(), json!(tools));
    }

    serde_json::Value::Object(session)
}

// =============================================================================
// Socket tasks
// =============================================================================

async fn write_loop(
    mut write: futures::stream::SplitSink<
        WebSocketStream<MaybeTlsStream<TcpStream>>,
        Message,
    >,
    mut rx: mpsc::Receiver<Message>,
) {
    while let Some(msg) = rx.recv().await {
        if let Message::Close(_) = msg {
            let _ = write.close().await;
            break;
        }
        if let Err(e) = write.send(msg).await {
            error!("Upstream write error: {e}");
            break;
        }
    }
}

async fn read_loop(
    mut read: futures::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    mut demux: Demux,
) {
    while let Some(result) = read.next().await {
        match result {
            Ok(Message::Text(text)) => match serde_json::from_str::<WireEvent>(&text) {
                Ok(event) => demux.handle(event).await,
                Err(e) => warn!("Unparseable upstream event: {e}"),
            },
            Ok(Message::Close(_)) => {
                debug!("Upstream closed the connection");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                error!("Upstream read error: {e}");
                break;
            }
        }
    }
    // Dropping the demux drops every producer, closing the event stream and
    // resolving in-flight items as abandoned.
}

// =============================================================================
// Demultiplexer
// =============================================================================

/// Tracks the start/end offsets of an input turn until transcription lands.
struct PendingInput {
    producer: InputAudioProducer,
    audio_start_ms: Option<u64>,
    audio_end_ms: Option<u64>,
}

/// Routes wire events into the per-item channels of the typed model.
struct Demux {
    events: mpsc::UnboundedSender<UpstreamEvent>,
    configure_ack: ConfigureAck,
    inputs: HashMap<String, PendingInput>,
    responses: HashMap<String, ResponseProducer>,
    // Item ids seen per response, for teardown when the response finishes
    response_items: HashMap<String, Vec<String>>,
    messages: HashMap<String, MessageProducer>,
    audio_parts: HashMap<(String, u32), AudioProducer>,
    text_parts: HashMap<(String, u32), TextProducer>,
    function_calls: HashMap<String, FunctionCallProducer>,
}

impl Demux {
    fn new(events: mpsc::UnboundedSender<UpstreamEvent>, configure_ack: ConfigureAck) -> Self {
        Self {
            events,
            configure_ack,
            inputs: HashMap::new(),
            responses: HashMap::new(),
            response_items: HashMap::new(),
            messages: HashMap::new(),
            audio_parts: HashMap::new(),
            text_parts: HashMap::new(),
            function_calls: HashMap::new(),
        }
    }

    async fn handle(&mut self, event: WireEvent) {
        match event {
            WireEvent::SessionCreated => debug!("Upstream session created"),
            WireEvent::SessionUpdated => {
                if let Some(ack) = self.configure_ack.lock().await.take() {
                    let _ = ack.send(Ok(()));
                }
            }
            WireEvent::Error { error } => {
                if let Some(ack) = self.configure_ack.lock().await.take() {
                    let _ = ack.send(Err(error.message));
                } else {
                    error!(code = ?error.code, "Upstream error: {}", error.message);
                }
            }

            WireEvent::SpeechStarted {
                audio_start_ms,
                item_id,
            } => {
                let (item, producer) = InputAudioItem::channel(item_id.clone());
                self.inputs.insert(
                    item_id,
                    PendingInput {
                        producer,
                        audio_start_ms: Some(audio_start_ms),
                        audio_end_ms: None,
                    },
                );
                let _ = self.events.send(UpstreamEvent::InputAudio(item));
            }
            WireEvent::SpeechStopped {
                audio_end_ms,
                item_id,
            } => {
                if let Some(pending) = self.inputs.get_mut(&item_id) {
                    pending.audio_end_ms = Some(audio_end_ms);
                }
            }
            WireEvent::TranscriptionCompleted {
                item_id,
                transcript,
            } => {
                if let Some(pending) = self.inputs.remove(&item_id) {
                    pending.producer.resolve(InputAudioDone {
                        transcript,
                        audio_start_ms: pending.audio_start_ms,
                        audio_end_ms: pending.audio_end_ms,
                    });
                } else {
                    warn!("Transcription for unknown input item {item_id}");
                }
            }
            WireEvent::TranscriptionFailed { item_id } => {
                warn!("Input transcription failed for item {item_id}");
                if let Some(pending) = self.inputs.remove(&item_id) {
                    pending.producer.resolve(InputAudioDone {
                        transcript: String::new(),
                        audio_start_ms: pending.audio_start_ms,
                        audio_end_ms: pending.audio_end_ms,
                    });
                }
            }

            WireEvent::ResponseCreated { response } => {
                let (handle, producer) = ResponseHandle::channel(response.id.clone());
                self.responses.insert(response.id, producer);
                let _ = self.events.send(UpstreamEvent::Response(handle));
            }
            WireEvent::OutputItemAdded { response_id, item } => {
                self.add_output_item(&response_id, item);
            }
            WireEvent::ContentPartAdded {
                item_id,
                content_index,
                part,
            } => {
                self.add_content_part(item_id, content_index, &part);
            }

            WireEvent::AudioDelta {
                item_id,
                content_index,
                delta,
            } => {
                let Some(producer) = self.audio_parts.get(&(item_id.clone(), content_index))
                else {
                    warn!("Audio delta for unknown part {item_id}[{content_index}]");
                    return;
                };
                match codec::decode_audio(&delta) {
                    Ok(bytes) => {
                        producer.push_audio(Bytes::from(bytes));
                    }
                    Err(e) => warn!("Dropping undecodable audio delta: {e}"),
                }
            }
            WireEvent::AudioTranscriptDelta {
                item_id,
                content_index,
                delta,
            } => {
                if let Some(producer) = self.audio_parts.get(&(item_id, content_index)) {
                    producer.push_transcript(delta);
                }
            }
            WireEvent::TextDelta {
                item_id,
                content_index,
                delta,
            } => {
                if let Some(producer) = self.text_parts.get(&(item_id, content_index)) {
                    producer.push(delta);
                }
            }
            // The per-sequence done markers carry no payload we act on; the
            // part's channels close on content_part.done.
            WireEvent::AudioDone | WireEvent::AudioTranscriptDone | WireEvent::TextDone => {}

            WireEvent::ContentPartDone {
                item_id,
                content_index,
            } => {
                let key = (item_id, content_index);
                if let Some(producer) = self.audio_parts.remove(&key) {
                    producer.finish();
                }
                if let Some(producer) = self.text_parts.remove(&key) {
                    producer.finish();
                }
            }
            WireEvent::FunctionCallArgumentsDone { item_id, arguments } => {
                if let Some(producer) = self.function_calls.remove(&item_id) {
                    producer.resolve(arguments);
                }
            }
            WireEvent::OutputItemDone { item } => {
                if let Some(producer) = self.messages.remove(&item.id) {
                    producer.finish();
                }
                // Arguments may finalize here when no arguments.done was sent.
                if let Some(producer) = self.function_calls.remove(&item.id) {
                    producer.resolve(item.arguments.unwrap_or_default());
                }
            }
            WireEvent::ResponseDone { response } => {
                let status = response
                    .status
                    .as_deref()
                    .map(ResponseStatus::parse)
                    .unwrap_or(ResponseStatus::Completed);
                if let Some(producer) = self.responses.remove(&response.id) {
                    producer.finish(status);
                }
                // Drop any item state the upstream never closed with its own
                // done event, so part and argument streams still finish
                if let Some(item_ids) = self.response_items.remove(&response.id) {
                    for item_id in item_ids {
                        self.messages.remove(&item_id);
                        self.function_calls.remove(&item_id);
                        self.audio_parts.retain(|(id, _), _| *id != item_id);
                        self.text_parts.retain(|(id, _), _| *id != item_id);
                    }
                }
            }

            WireEvent::Unknown => debug!("Skipping unhandled upstream event"),
        }
    }

    fn add_output_item(&mut self, response_id: &str, item: WireItem) {
        let Some(response) = self.responses.get(response_id) else {
            warn!("Output item for unknown response {response_id}");
            return;
        };
        match item.kind.as_str() {
            "message" => {
                let (message, producer) = MessageItem::channel(item.id.clone(), response_id);
                self.response_items
                    .entry(response_id.to_string())
                    .or_default()
                    .push(item.id.clone());
                self.messages.insert(item.id, producer);
                response.push_item(ResponseItem::Message(message));
            }
            "function_call" => {
                let (call, producer) = FunctionCallItem::channel(
                    item.id.clone(),
                    item.call_id.unwrap_or_default(),
                    item.name.unwrap_or_default(),
                );
                self.response_items
                    .entry(response_id.to_string())
                    .or_default()
                    .push(item.id.clone());
                self.function_calls.insert(item.id, producer);
                response.push_item(ResponseItem::FunctionCall(call));
            }
            other => debug!("Skipping output item of kind {other}"),
        }
    }

    fn add_content_part(&mut self, item_id: String, content_index: u32, part: &WirePart) {
        let Some(message) = self.messages.get(&item_id) else {
            warn!("Content part for unknown item {item_id}");
            return;
        };
        match part.kind.as_str() {
            "audio" => {
                let (content, producer) = AudioContent::channel();
                self.audio_parts.insert((item_id, content_index), producer);
                message.push_part(ContentPart::Audio(content));
            }
            "text" => {
                let (content, producer) = TextContent::channel();
                self.text_parts.insert((item_id, content_index), producer);
                message.push_part(ContentPart::Text(content));
            }
            other => debug!("Skipping content part of kind {other}"),
        }
    }
}
