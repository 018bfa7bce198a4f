//! Realtime WebSocket handler.
//!
//! One client connection maps to one upstream session. The socket is split
//! into a reader task (frames into the relay) and a sender task (relay
//! notifications out as JSON text frames); the relay core in between never
//! touches the socket.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::upstream::WireSession;
use crate::relay::{self, ClientFrame, ClientNotification};
use crate::state::AppState;

/// Capacity of the inbound frame channel.
const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Capacity of the outbound notification channel.
const NOTIFY_CHANNEL_CAPACITY: usize = 1024;

/// Upgrade `GET /realtime` to a WebSocket and run a relay session on it.
pub async fn realtime_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.max_message_size(state.config.server.max_message_bytes)
        .on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    info!("Client connected");

    let session = match WireSession::connect(&state.config.upstream).await {
        Ok(session) => Arc::new(session),
        Err(e) => {
            error!("Upstream connection failed: {e}");
            let _ = socket.send(Message::Close(None)).await;
            return;
        }
    };

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (frame_tx, frame_rx) = mpsc::channel::<ClientFrame>(FRAME_CHANNEL_CAPACITY);
    let (notify_tx, mut notify_rx) = mpsc::channel::<ClientNotification>(NOTIFY_CHANNEL_CAPACITY);

    let sender = tokio::spawn(async move {
        while let Some(notification) = notify_rx.recv().await {
            let json = match serde_json::to_string(&notification) {
                Ok(json) => json,
                Err(e) => {
                    error!("Could not serialize notification: {e}");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json.into())).await.is_err() {
                debug!("Client send failed, stopping sender");
                break;
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_rx.next().await {
            let frame = match msg {
                Message::Text(text) => ClientFrame::Text(text.to_string()),
                Message::Binary(audio) => ClientFrame::Binary(Bytes::from(audio)),
                Message::Close(_) => break,
                _ => continue,
            };
            if frame_tx.send(frame).await.is_err() {
                break;
            }
        }
    });

    let options = state.session_options();
    if let Err(e) =
        relay::run_session(session, frame_rx, notify_tx, &options, state.tools.clone()).await
    {
        warn!("Session ended with error: {e}");
    }

    reader.abort();
    sender.abort();
    info!("Client disconnected");
}
