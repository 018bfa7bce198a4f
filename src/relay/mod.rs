//! Session relay: one client channel bridged to one upstream session.
//!
//! [`run_session`] owns the session lifecycle: configure once, then run the
//! inbound loop and the outbound dispatcher side by side until either the
//! client disconnects or the upstream event stream ends, then close the
//! session so the other side winds down too.

pub mod inbound;
pub mod messages;
pub mod outbound;

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::core::upstream::{SessionOptions, UpstreamError, UpstreamSession};
use crate::tools::ToolRegistry;

pub use messages::{ClientFrame, ClientMessage, ClientNotification, NotificationSink};

/// Fatal session errors. Anything recoverable is handled inside the loops.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The upstream rejected the one-time session configuration
    #[error("session configuration failed: {0}")]
    Configure(#[source] UpstreamError),

    /// The upstream event stream could not be claimed
    #[error("event stream unavailable: {0}")]
    Events(#[source] UpstreamError),
}

/// Run one relay session to completion.
///
/// Configuration failures are fatal and reported to the caller before any
/// traffic is relayed. After that the session ends cleanly: client disconnect
/// or upstream stream end closes the session, and in-flight dispatcher tasks
/// drain on their own.
pub async fn run_session<S: UpstreamSession>(
    session: Arc<S>,
    frames: mpsc::Receiver<ClientFrame>,
    notifications: mpsc::Sender<ClientNotification>,
    options: &SessionOptions,
    tools: Arc<ToolRegistry>,
) -> Result<(), RelayError> {
    session
        .configure(options)
        .await
        .map_err(RelayError::Configure)?;
    info!("Upstream session configured");

    let events = session.take_events().map_err(RelayError::Events)?;
    let sink = NotificationSink::new(notifications);

    let mut dispatcher = tokio::spawn(outbound::dispatch_events(
        events,
        session.clone(),
        sink,
        tools,
    ));

    tokio::select! {
        () = inbound::relay_inbound(session.clone(), frames) => {
            info!("Client channel closed, ending session");
        }
        result = &mut dispatcher => {
            info!("Upstream event stream ended, ending session");
            if let Err(e) = result {
                warn!("Dispatcher task failed: {e}");
            }
        }
    }

    if let Err(e) = session.close().await {
        warn!("Upstream close failed: {e}");
    }
    if !dispatcher.is_finished() {
        if let Err(e) = dispatcher.await {
            warn!("Dispatcher task failed: {e}");
        }
    }
    Ok(())
}
