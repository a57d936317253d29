//! Push-stream wiring between the ComfyUI connection manager and the
//! reconciler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use vidflow_comfyui::events::ComfyUIEvent;
use vidflow_comfyui::manager::ComfyUIManager;

use crate::reconciler::Reconciler;
use crate::registry::ServerRegistry;

/// Forward push events to the reconciler until cancelled or the channel
/// closes.
pub async fn run_push_consumer(
    reconciler: Arc<Reconciler>,
    mut events: broadcast::Receiver<ComfyUIEvent>,
    cancel: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            _ = cancel.cancelled() => break,
            received = events.recv() => received,
        };

        match received {
            Ok(ComfyUIEvent::Push { server_url, event }) => {
                tracing::trace!(server_url = %server_url, execution_id = event.execution_id(), "Push event");
                reconciler.handle_push(event).await;
            }
            Ok(ComfyUIEvent::InstanceConnected { server_url }) => {
                tracing::info!(server_url = %server_url, "Push stream connected");
            }
            Ok(ComfyUIEvent::InstanceDisconnected { server_url }) => {
                tracing::warn!(server_url = %server_url, "Push stream disconnected, relying on polling");
            }
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Push consumer lagged, polling will reconcile missed events");
            }
            Err(RecvError::Closed) => break,
        }
    }
    tracing::info!("Push consumer stopped");
}

/// Keep one push connection per registered server, re-syncing every
/// `interval`. Shuts the manager down on cancellation.
pub async fn run_push_supervisor(
    manager: Arc<ComfyUIManager>,
    registry: Arc<ServerRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let urls = registry.urls().await;
                manager.sync(&urls).await;
            }
        }
    }
    manager.shutdown().await;
}
