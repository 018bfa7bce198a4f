//! End-to-end relay session tests against a channel-backed mock upstream.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio::time::timeout;

use voicebridge::core::codec;
use voicebridge::core::upstream::{
    AudioContent, ContentPart, FunctionCallItem, InputAudioDone, InputAudioItem, MessageItem,
    OutgoingItem, ResponseHandle, ResponseItem, ResponseStatus, SessionOptions, TextContent,
    UpstreamError, UpstreamEvent, UpstreamResult, UpstreamSession,
};
use voicebridge::relay::{self, ClientFrame, ClientNotification, RelayError};
use voicebridge::tools::{Tool, ToolError, ToolRegistry};

// =============================================================================
// Mock upstream session
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Configure,
    Audio(Vec<u8>),
    Item {
        item: OutgoingItem,
        previous: Option<String>,
    },
    CreateResponse,
    Close,
}

struct MockSession {
    commands: Mutex<Vec<Command>>,
    events: Mutex<Option<mpsc::UnboundedReceiver<UpstreamEvent>>>,
    reject_configure: bool,
}

impl MockSession {
    fn new() -> (Arc<Self>, mpsc::UnboundedSender<UpstreamEvent>) {
        Self::with_rejection(false)
    }

    fn rejecting() -> (Arc<Self>, mpsc::UnboundedSender<UpstreamEvent>) {
        Self::with_rejection(true)
    }

    fn with_rejection(reject: bool) -> (Arc<Self>, mpsc::UnboundedSender<UpstreamEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Self {
                commands: Mutex::new(Vec::new()),
                events: Mutex::new(Some(events_rx)),
                reject_configure: reject,
            }),
            events_tx,
        )
    }

    fn commands(&self) -> Vec<Command> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn record(&self, command: Command) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
    }
}

#[async_trait]
impl UpstreamSession for MockSession {
    async fn configure(&self, _options: &SessionOptions) -> UpstreamResult<()> {
        self.record(Command::Configure);
        if self.reject_configure {
            return Err(UpstreamError::ConfigurationRejected(
                "bad options".to_string(),
            ));
        }
        Ok(())
    }

    async fn send_audio(&self, audio: &[u8]) -> UpstreamResult<()> {
        self.record(Command::Audio(audio.to_vec()));
        Ok(())
    }

    async fn send_item(
        &self,
        item: OutgoingItem,
        previous_item_id: Option<&str>,
    ) -> UpstreamResult<()> {
        self.record(Command::Item {
            item,
            previous: previous_item_id.map(str::to_string),
        });
        Ok(())
    }

    async fn create_response(&self) -> UpstreamResult<()> {
        self.record(Command::CreateResponse);
        Ok(())
    }

    fn take_events(&self) -> UpstreamResult<mpsc::UnboundedReceiver<UpstreamEvent>> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(UpstreamError::EventsAlreadyTaken)
    }

    async fn close(&self) -> UpstreamResult<()> {
        self.record(Command::Close);
        Ok(())
    }
}

// =============================================================================
// Tools
// =============================================================================

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "lookup"
    }

    async fn invoke(&self, arguments: Value) -> Result<Value, ToolError> {
        Ok(json!({ "echo": arguments }))
    }
}

struct FailingTool;

#[async_trait]
impl Tool for FailingTool {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn invoke(&self, _arguments: Value) -> Result<Value, ToolError> {
        Err(ToolError::ExecutionFailed("backend unavailable".to_string()))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    mock: Arc<MockSession>,
    events_tx: mpsc::UnboundedSender<UpstreamEvent>,
    frame_tx: mpsc::Sender<ClientFrame>,
    notify_rx: mpsc::Receiver<ClientNotification>,
    session: tokio::task::JoinHandle<Result<(), RelayError>>,
}

fn start(registry: ToolRegistry) -> Harness {
    start_with(MockSession::new(), registry)
}

fn start_with(
    (mock, events_tx): (Arc<MockSession>, mpsc::UnboundedSender<UpstreamEvent>),
    registry: ToolRegistry,
) -> Harness {
    let (frame_tx, frame_rx) = mpsc::channel(16);
    let (notify_tx, notify_rx) = mpsc::channel(64);
    let tools = Arc::new(registry);
    let session_mock = mock.clone();
    let session = tokio::spawn(async move {
        let options = SessionOptions::default();
        relay::run_session(session_mock, frame_rx, notify_tx, &options, tools).await
    });
    Harness {
        mock,
        events_tx,
        frame_tx,
        notify_rx,
        session,
    }
}

impl Harness {
    /// End the session from the client side and wait for it to wind down.
    async fn finish(self) -> Result<(), RelayError> {
        drop(self.frame_tx);
        drop(self.events_tx);
        timeout(Duration::from_secs(2), self.session)
            .await
            .expect("Session should end")
            .expect("Session task should not panic")
    }

    async fn wait_for(&self, pred: impl Fn(&[Command]) -> bool) {
        timeout(Duration::from_secs(2), async {
            loop {
                if pred(&self.mock.commands()) {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("Should observe expected commands");
    }

    async fn next_notification(&mut self) -> ClientNotification {
        timeout(Duration::from_secs(2), self.notify_rx.recv())
            .await
            .expect("Should receive a notification")
            .expect("Notification channel should be open")
    }
}

// =============================================================================
// Inbound relay
// =============================================================================

#[tokio::test]
async fn test_binary_audio_forwarded_in_order() {
    let harness = start(ToolRegistry::new());

    for chunk in [b"one".as_slice(), b"two", b"three"] {
        harness
            .frame_tx
            .send(ClientFrame::Binary(Bytes::copy_from_slice(chunk)))
            .await
            .expect("Should accept frame");
    }
    harness
        .wait_for(|cmds| cmds.iter().filter(|c| matches!(c, Command::Audio(_))).count() == 3)
        .await;

    let mock = harness.mock.clone();
    harness.finish().await.expect("Session should end cleanly");

    let audio: Vec<_> = mock
        .commands()
        .into_iter()
        .filter_map(|c| match c {
            Command::Audio(bytes) => Some(bytes),
            _ => None,
        })
        .collect();
    assert_eq!(audio, vec![b"one".to_vec(), b"two".to_vec(), b"three".to_vec()]);
}

#[tokio::test]
async fn test_json_audio_is_decoded_before_forwarding() {
    let harness = start(ToolRegistry::new());

    let payload = json!({ "audio": codec::encode_audio(b"pcm data") }).to_string();
    harness
        .frame_tx
        .send(ClientFrame::Text(payload))
        .await
        .expect("Should accept frame");
    harness
        .wait_for(|cmds| cmds.contains(&Command::Audio(b"pcm data".to_vec())))
        .await;

    harness.finish().await.expect("Session should end cleanly");
}

#[tokio::test]
async fn test_text_message_creates_item_and_response() {
    let harness = start(ToolRegistry::new());

    harness
        .frame_tx
        .send(ClientFrame::Text(r#"{"text":"hello"}"#.to_string()))
        .await
        .expect("Should accept frame");
    harness
        .wait_for(|cmds| cmds.contains(&Command::CreateResponse))
        .await;

    let mock = harness.mock.clone();
    harness.finish().await.expect("Session should end cleanly");

    let commands = mock.commands();
    let item_pos = commands
        .iter()
        .position(|c| {
            matches!(
                c,
                Command::Item {
                    item: OutgoingItem::UserText { text },
                    previous: None,
                } if text == "hello"
            )
        })
        .expect("Should create the user text item");
    let response_pos = commands
        .iter()
        .position(|c| *c == Command::CreateResponse)
        .expect("Should request a response");
    assert!(item_pos < response_pos);
}

#[tokio::test]
async fn test_malformed_frames_are_dropped_without_ending_session() {
    let harness = start(ToolRegistry::new());

    harness
        .frame_tx
        .send(ClientFrame::Text("not json at all".to_string()))
        .await
        .expect("Should accept frame");
    harness
        .frame_tx
        .send(ClientFrame::Text(r#"{"audio":"!!!not-base64!!!"}"#.to_string()))
        .await
        .expect("Should accept frame");
    harness
        .frame_tx
        .send(ClientFrame::Binary(Bytes::from_static(b"still alive")))
        .await
        .expect("Should accept frame");

    harness
        .wait_for(|cmds| cmds.contains(&Command::Audio(b"still alive".to_vec())))
        .await;

    let mock = harness.mock.clone();
    harness.finish().await.expect("Session should end cleanly");

    // Only the valid frame made it through
    let audio_count = mock
        .commands()
        .iter()
        .filter(|c| matches!(c, Command::Audio(_)))
        .count();
    assert_eq!(audio_count, 1);
}

// =============================================================================
// Configuration
// =============================================================================

#[tokio::test]
async fn test_configuration_rejection_is_fatal() {
    let harness = start_with(MockSession::rejecting(), ToolRegistry::new());

    let result = timeout(Duration::from_secs(2), harness.session)
        .await
        .expect("Session should end")
        .expect("Session task should not panic");
    assert!(matches!(result, Err(RelayError::Configure(_))));

    // Nothing was relayed before the failure surfaced
    assert_eq!(harness.mock.commands(), vec![Command::Configure]);
}

#[tokio::test]
async fn test_event_stream_is_single_pass() {
    let (mock, _events_tx) = MockSession::new();

    assert!(mock.take_events().is_ok());
    assert!(matches!(
        mock.take_events(),
        Err(UpstreamError::EventsAlreadyTaken)
    ));

    // A session whose stream is already claimed fails loudly at startup
    let (_frame_tx, frame_rx) = mpsc::channel(1);
    let (notify_tx, _notify_rx) = mpsc::channel(1);
    let result = relay::run_session(
        mock,
        frame_rx,
        notify_tx,
        &SessionOptions::default(),
        Arc::new(ToolRegistry::new()),
    )
    .await;
    assert!(matches!(
        result,
        Err(RelayError::Events(UpstreamError::EventsAlreadyTaken))
    ));
}

// =============================================================================
// Outbound dispatch
// =============================================================================

#[tokio::test]
async fn test_audio_part_streams_deltas_with_item_id() {
    let mut harness = start(ToolRegistry::new());

    let (response, response_producer) = ResponseHandle::channel("resp_1");
    let (message, message_producer) = MessageItem::channel("item_1", "resp_1");
    let (audio, audio_producer) = AudioContent::channel();

    harness
        .events_tx
        .send(UpstreamEvent::Response(response))
        .expect("Should accept event");
    response_producer.push_item(ResponseItem::Message(message));
    message_producer.push_part(ContentPart::Audio(audio));
    message_producer.finish();
    response_producer.finish(ResponseStatus::Completed);

    audio_producer.push_audio(Bytes::from_static(b"chunk-a"));
    audio_producer.push_audio(Bytes::from_static(b"chunk-b"));
    audio_producer.push_transcript("hello");
    audio_producer.finish();

    let mut audio_deltas = Vec::new();
    let mut transcript_deltas = Vec::new();
    for _ in 0..3 {
        match harness.next_notification().await {
            ClientNotification::AudioDelta { delta, id } => {
                assert_eq!(id, "item_1");
                audio_deltas.push(delta);
            }
            ClientNotification::AudioTranscriptDelta { delta, id } => {
                assert_eq!(id, "item_1");
                transcript_deltas.push(delta);
            }
            other => panic!("Unexpected notification: {other:?}"),
        }
    }
    assert_eq!(
        audio_deltas,
        vec![codec::encode_audio(b"chunk-a"), codec::encode_audio(b"chunk-b")]
    );
    assert_eq!(transcript_deltas, vec!["hello".to_string()]);

    harness.finish().await.expect("Session should end cleanly");
}

#[tokio::test]
async fn test_text_parts_stream_in_part_order() {
    let mut harness = start(ToolRegistry::new());

    let (response, response_producer) = ResponseHandle::channel("resp_1");
    let (message, message_producer) = MessageItem::channel("item_1", "resp_1");
    let (first, first_producer) = TextContent::channel();
    let (second, second_producer) = TextContent::channel();

    harness
        .events_tx
        .send(UpstreamEvent::Response(response))
        .expect("Should accept event");
    response_producer.push_item(ResponseItem::Message(message));
    message_producer.push_part(ContentPart::Text(first));
    message_producer.push_part(ContentPart::Text(second));
    message_producer.finish();
    response_producer.finish(ResponseStatus::Completed);

    // Both parts are fed up front; the relay must still emit part one first
    second_producer.push("part two");
    second_producer.finish();
    first_producer.push("part ");
    first_producer.push("one, ");
    first_producer.finish();

    let mut deltas = Vec::new();
    for _ in 0..3 {
        match harness.next_notification().await {
            ClientNotification::TextDelta { delta, id } => {
                assert_eq!(id, "item_1");
                deltas.push(delta);
            }
            other => panic!("Unexpected notification: {other:?}"),
        }
    }
    assert_eq!(deltas, vec!["part ", "one, ", "part two"]);

    harness.finish().await.expect("Session should end cleanly");
}

#[tokio::test]
async fn test_items_of_one_response_interleave() {
    let mut harness = start(ToolRegistry::new());

    let (response, response_producer) = ResponseHandle::channel("resp_1");
    let (slow_item, slow_producer) = MessageItem::channel("item_1", "resp_1");
    let (fast_item, fast_producer) = MessageItem::channel("item_2", "resp_1");
    let (slow_text, slow_text_producer) = TextContent::channel();
    let (fast_text, fast_text_producer) = TextContent::channel();

    harness
        .events_tx
        .send(UpstreamEvent::Response(response))
        .expect("Should accept event");
    response_producer.push_item(ResponseItem::Message(slow_item));
    response_producer.push_item(ResponseItem::Message(fast_item));
    response_producer.finish(ResponseStatus::Completed);
    slow_producer.push_part(ContentPart::Text(slow_text));
    slow_producer.finish();
    fast_producer.push_part(ContentPart::Text(fast_text));
    fast_producer.finish();

    // The first item's chunks lag; the second item must not wait for it
    fast_text_producer.push("fast");
    fast_text_producer.finish();

    match harness.next_notification().await {
        ClientNotification::TextDelta { delta, id } => {
            assert_eq!(id, "item_2");
            assert_eq!(delta, "fast");
        }
        other => panic!("Unexpected notification: {other:?}"),
    }

    slow_text_producer.push("slow");
    slow_text_producer.finish();
    match harness.next_notification().await {
        ClientNotification::TextDelta { delta, id } => {
            assert_eq!(id, "item_1");
            assert_eq!(delta, "slow");
        }
        other => panic!("Unexpected notification: {other:?}"),
    }

    harness.finish().await.expect("Session should end cleanly");
}

#[tokio::test]
async fn test_user_turn_transcription_is_notified() {
    let mut harness = start(ToolRegistry::new());

    let (item, producer) = InputAudioItem::channel("in_1");
    harness
        .events_tx
        .send(UpstreamEvent::InputAudio(item))
        .expect("Should accept event");
    producer.resolve(InputAudioDone {
        transcript: "what's the weather".to_string(),
        audio_start_ms: Some(100),
        audio_end_ms: Some(2100),
    });

    match harness.next_notification().await {
        ClientNotification::Transcription { text, id } => {
            assert_eq!(text, "what's the weather");
            assert_eq!(id, "in_1");
        }
        other => panic!("Unexpected notification: {other:?}"),
    }

    harness.finish().await.expect("Session should end cleanly");
}

// =============================================================================
// Function call dispatch
// =============================================================================

#[tokio::test]
async fn test_function_call_invokes_tool_and_feeds_output_back() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(EchoTool));
    let harness = start(registry);

    let (response, response_producer) = ResponseHandle::channel("resp_1");
    let (call, call_producer) = FunctionCallItem::channel("item_1", "call_1", "lookup");
    harness
        .events_tx
        .send(UpstreamEvent::Response(response))
        .expect("Should accept event");
    response_producer.push_item(ResponseItem::FunctionCall(call));
    response_producer.finish(ResponseStatus::Completed);
    call_producer.resolve(r#"{"q":"weather"}"#);

    harness
        .wait_for(|cmds| {
            cmds.iter().any(|c| {
                matches!(
                    c,
                    Command::Item {
                        item: OutgoingItem::FunctionCallOutput { call_id, output },
                        previous: Some(previous),
                    } if call_id == "call_1"
                        && previous == "item_1"
                        && output.contains("weather")
                )
            }) && cmds.contains(&Command::CreateResponse)
        })
        .await;

    harness.finish().await.expect("Session should end cleanly");
}

#[tokio::test]
async fn test_failing_tool_reports_error_output_item() {
    let mut registry = ToolRegistry::new();
    registry.register(Arc::new(FailingTool));
    let harness = start(registry);

    let (response, response_producer) = ResponseHandle::channel("resp_1");
    let (call, call_producer) = FunctionCallItem::channel("item_1", "call_1", "flaky");
    harness
        .events_tx
        .send(UpstreamEvent::Response(response))
        .expect("Should accept event");
    response_producer.push_item(ResponseItem::FunctionCall(call));
    response_producer.finish(ResponseStatus::Completed);
    call_producer.resolve("{}");

    harness
        .wait_for(|cmds| {
            cmds.iter().any(|c| {
                matches!(
                    c,
                    Command::Item {
                        item: OutgoingItem::FunctionCallOutput { output, .. },
                        ..
                    } if output.contains("error") && output.contains("backend unavailable")
                )
            }) && cmds.contains(&Command::CreateResponse)
        })
        .await;

    // The failure stayed inside the call; the session is still live
    harness
        .frame_tx
        .send(ClientFrame::Binary(Bytes::from_static(b"still alive")))
        .await
        .expect("Session should still accept frames");
    harness
        .wait_for(|cmds| cmds.contains(&Command::Audio(b"still alive".to_vec())))
        .await;

    harness.finish().await.expect("Session should end cleanly");
}

#[tokio::test]
async fn test_unregistered_tool_is_skipped() {
    let harness = start(ToolRegistry::new());

    let (response, response_producer) = ResponseHandle::channel("resp_1");
    let (call, call_producer) = FunctionCallItem::channel("item_1", "call_1", "nonexistent");
    harness
        .events_tx
        .send(UpstreamEvent::Response(response))
        .expect("Should accept event");
    response_producer.push_item(ResponseItem::FunctionCall(call));
    response_producer.finish(ResponseStatus::Completed);
    call_producer.resolve("{}");

    // The call produces no output item; the session stays live
    harness
        .frame_tx
        .send(ClientFrame::Binary(Bytes::from_static(b"ping")))
        .await
        .expect("Session should still accept frames");
    harness
        .wait_for(|cmds| cmds.contains(&Command::Audio(b"ping".to_vec())))
        .await;

    let mock = harness.mock.clone();
    harness.finish().await.expect("Session should end cleanly");
    assert!(!mock.commands().iter().any(|c| matches!(
        c,
        Command::Item {
            item: OutgoingItem::FunctionCallOutput { .. },
            ..
        }
    )));
}

// =============================================================================
// Teardown
// =============================================================================

#[tokio::test]
async fn test_client_disconnect_closes_upstream_session() {
    let harness = start(ToolRegistry::new());
    let mock = harness.mock.clone();

    harness.finish().await.expect("Session should end cleanly");
    assert!(mock.commands().contains(&Command::Close));
}

#[tokio::test]
async fn test_upstream_stream_end_closes_session() {
    let harness = start(ToolRegistry::new());
    let mock = harness.mock.clone();

    // Upstream goes away while the client is still connected
    drop(harness.events_tx);
    timeout(Duration::from_secs(2), harness.session)
        .await
        .expect("Session should end")
        .expect("Session task should not panic")
        .expect("Session should end cleanly");
    assert!(mock.commands().contains(&Command::Close));
}

#[tokio::test]
async fn test_notifications_after_client_teardown_are_noops() {
    let mut harness = start(ToolRegistry::new());

    // Client goes away before the response is drained
    harness.notify_rx.close();

    let (response, response_producer) = ResponseHandle::channel("resp_1");
    let (message, message_producer) = MessageItem::channel("item_1", "resp_1");
    let (text, text_producer) = TextContent::channel();
    harness
        .events_tx
        .send(UpstreamEvent::Response(response))
        .expect("Should accept event");
    response_producer.push_item(ResponseItem::Message(message));
    message_producer.push_part(ContentPart::Text(text));
    message_producer.finish();
    response_producer.finish(ResponseStatus::Cancelled);
    text_producer.push("too late");
    text_producer.finish();

    // The dispatcher drains the item without erroring
    harness.finish().await.expect("Session should end cleanly");
}
