//! Outbound dispatcher: upstream events into client notifications.
//!
//! Every upstream event is handled on its own task so a slow item never
//! stalls its siblings. Ordering is only guaranteed where the item model
//! guarantees it: chunks within a part, parts within a message item. Items
//! across responses interleave freely on the client channel.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::core::codec;
use crate::core::upstream::{
    ContentPart, FunctionCallItem, InputAudioItem, MessageItem, OutgoingItem, ResponseHandle,
    ResponseItem, UpstreamEvent, UpstreamSession,
};
use crate::tools::ToolRegistry;

use super::messages::{ClientNotification, NotificationSink};

/// Drain the upstream event stream, spawning a task per event.
///
/// Returns when the stream ends. Spawned item tasks are detached and finish
/// on their own; notifications they send after client teardown are no-ops.
pub async fn dispatch_events<S: UpstreamSession>(
    mut events: mpsc::UnboundedReceiver<UpstreamEvent>,
    session: Arc<S>,
    sink: NotificationSink,
    tools: Arc<ToolRegistry>,
) {
    while let Some(event) = events.recv().await {
        match event {
            UpstreamEvent::InputAudio(item) => {
                tokio::spawn(handle_input_item(item, sink.clone()));
            }
            UpstreamEvent::Response(response) => {
                tokio::spawn(handle_response(
                    response,
                    session.clone(),
                    sink.clone(),
                    tools.clone(),
                ));
            }
        }
    }
    debug!("Upstream event stream ended");
}

/// Wait for a user speech turn to finish transcribing and notify the client.
async fn handle_input_item(item: InputAudioItem, sink: NotificationSink) {
    let id = item.id.clone();
    match item.await_done().await {
        Ok(done) => {
            info!(
                item_id = %id,
                start_ms = ?done.audio_start_ms,
                end_ms = ?done.audio_end_ms,
                "User turn transcribed: {}",
                done.transcript
            );
            sink.send(ClientNotification::Transcription {
                text: done.transcript,
                id,
            })
            .await;
        }
        Err(e) => debug!(item_id = %id, "Input item ended without transcript: {e}"),
    }
}

/// Drain one response: each output item gets its own task, then the terminal
/// status is logged once all items have been claimed.
async fn handle_response<S: UpstreamSession>(
    mut response: ResponseHandle,
    session: Arc<S>,
    sink: NotificationSink,
    tools: Arc<ToolRegistry>,
) {
    let response_id = response.id.clone();
    while let Some(item) = response.next_item().await {
        match item {
            ResponseItem::Message(message) => {
                tokio::spawn(handle_message_item(message, sink.clone()));
            }
            ResponseItem::FunctionCall(call) => {
                tokio::spawn(handle_function_call(call, session.clone(), tools.clone()));
            }
        }
    }
    let status = response.status().await;
    info!(response_id = %response_id, "Response finished: {status}");
}

/// Stream one message item's content parts to the client, in part order.
async fn handle_message_item(mut message: MessageItem, sink: NotificationSink) {
    let item_id = message.id.clone();
    while let Some(part) = message.next_part().await {
        match part {
            ContentPart::Audio(audio) => {
                let (mut chunks, mut transcript) = audio.into_chunks();
                let audio_sink = sink.clone();
                let audio_id = item_id.clone();
                let transcript_sink = sink.clone();
                let transcript_id = item_id.clone();
                // Audio and its transcript arrive as independent sequences;
                // drain both concurrently so neither backs the other up.
                tokio::join!(
                    async move {
                        let mut total = 0usize;
                        while let Some(chunk) = chunks.next().await {
                            total += chunk.len();
                            audio_sink
                                .send(ClientNotification::AudioDelta {
                                    delta: codec::encode_audio(&chunk),
                                    id: audio_id.clone(),
                                })
                                .await;
                        }
                        debug!(item_id = %audio_id, "Audio part complete: {total} bytes");
                    },
                    async move {
                        let mut full = String::new();
                        while let Some(chunk) = transcript.next().await {
                            full.push_str(&chunk);
                            transcript_sink
                                .send(ClientNotification::AudioTranscriptDelta {
                                    delta: chunk,
                                    id: transcript_id.clone(),
                                })
                                .await;
                        }
                        debug!(item_id = %transcript_id, "Transcript complete: {full}");
                    },
                );
            }
            ContentPart::Text(mut text) => {
                let mut full = String::new();
                while let Some(chunk) = text.next_chunk().await {
                    full.push_str(&chunk);
                    sink.send(ClientNotification::TextDelta {
                        delta: chunk,
                        id: item_id.clone(),
                    })
                    .await;
                }
                debug!(item_id = %item_id, "Text part complete: {full}");
            }
        }
    }
}

/// Resolve a function-call item: look the tool up, run it, and feed its
/// output back into the conversation. Tool failures become an error output
/// item so the model can recover; they never end the session.
async fn handle_function_call<S: UpstreamSession>(
    item: FunctionCallItem,
    session: Arc<S>,
    tools: Arc<ToolRegistry>,
) {
    let item_id = item.id.clone();
    let call_id = item.call_id.clone();
    let name = item.name.clone();

    let arguments = match item.await_arguments().await {
        Ok(arguments) => arguments,
        Err(e) => {
            debug!(item_id = %item_id, "Function call ended without arguments: {e}");
            return;
        }
    };

    let Some(tool) = tools.get(&name) else {
        warn!(item_id = %item_id, "Model called unregistered tool: {name}");
        return;
    };

    info!(item_id = %item_id, call_id = %call_id, "Invoking tool: {name}");
    let output = match serde_json::from_str(&arguments) {
        Ok(parsed) => match tool.invoke(parsed).await {
            Ok(result) => result.to_string(),
            Err(e) => {
                warn!(item_id = %item_id, "Tool {name} failed: {e}");
                serde_json::json!({ "error": e.to_string() }).to_string()
            }
        },
        Err(e) => {
            warn!(item_id = %item_id, "Tool {name} received unparseable arguments: {e}");
            serde_json::json!({ "error": format!("invalid arguments: {e}") }).to_string()
        }
    };

    let result = async {
        session
            .send_item(
                OutgoingItem::FunctionCallOutput { call_id, output },
                Some(&item_id),
            )
            .await?;
        session.create_response().await
    }
    .await;
    if let Err(e) = result {
        warn!(item_id = %item_id, "Could not submit tool output: {e}");
    }
}
