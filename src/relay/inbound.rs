//! Inbound relay: client frames into the upstream session.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::codec;
use crate::core::upstream::{OutgoingItem, UpstreamSession};

use super::messages::{ClientFrame, ClientMessage};

/// Forward client frames into the upstream session until the client
/// disconnects or the upstream stops accepting traffic.
///
/// Malformed frames are dropped with a warning and the loop keeps running;
/// only transport failures end it.
pub async fn relay_inbound<S: UpstreamSession>(
    session: Arc<S>,
    mut frames: mpsc::Receiver<ClientFrame>,
) {
    while let Some(frame) = frames.recv().await {
        let result = match frame {
            ClientFrame::Binary(audio) => session.send_audio(&audio).await,
            ClientFrame::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                Ok(ClientMessage::Audio { audio }) => match codec::decode_audio(&audio) {
                    Ok(bytes) => session.send_audio(&bytes).await,
                    Err(e) => {
                        warn!("Dropping undecodable client audio: {e}");
                        continue;
                    }
                },
                Ok(ClientMessage::Text { text }) => {
                    match session
                        .send_item(OutgoingItem::UserText { text }, None)
                        .await
                    {
                        Ok(()) => session.create_response().await,
                        Err(e) => Err(e),
                    }
                }
                Err(e) => {
                    warn!("Dropping unparseable client message: {e}");
                    continue;
                }
            },
        };

        if let Err(e) = result {
            warn!("Upstream rejected client traffic, ending inbound relay: {e}");
            break;
        }
    }
    debug!("Inbound relay finished");
}
