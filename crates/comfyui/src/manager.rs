//! Multi-server ComfyUI push-stream manager.
//!
//! [`ComfyUIManager`] keeps one WebSocket per registered server. Each
//! connection runs in its own task (connect -> process -> reconnect) and
//! every translated event is broadcast through a [`broadcast`] channel;
//! call [`ComfyUIManager::subscribe`] to receive them.
//!
//! The set of servers is driven from outside through
//! [`ComfyUIManager::sync`], so the registry stays the single source of
//! truth for which servers exist.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::client::ComfyUIClient;
use crate::events::ComfyUIEvent;
use crate::processor::process_messages;
use crate::reconnect::{reconnect_loop, ReconnectConfig};

/// Broadcast channel capacity for push events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long shutdown waits for each connection task.
const TASK_STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Manages push-stream connections to multiple ComfyUI servers.
pub struct ComfyUIManager {
    /// Connection tasks indexed by server base URL.
    connections: RwLock<HashMap<String, ManagedConnection>>,
    client_id: String,
    reconnect: ReconnectConfig,
    event_tx: broadcast::Sender<ComfyUIEvent>,
    /// Master cancellation token, cancelled during shutdown.
    cancel: CancellationToken,
}

struct ManagedConnection {
    task_handle: tokio::task::JoinHandle<()>,
    /// Per-server token (child of the master token).
    cancel: CancellationToken,
}

impl ComfyUIManager {
    /// Create a manager that identifies itself to every server as
    /// `client_id`.
    pub fn new(client_id: impl Into<String>) -> Arc<Self> {
        Self::with_reconnect(client_id, ReconnectConfig::default())
    }

    pub fn with_reconnect(client_id: impl Into<String>, reconnect: ReconnectConfig) -> Arc<Self> {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Arc::new(Self {
            connections: RwLock::new(HashMap::new()),
            client_id: client_id.into(),
            reconnect,
            event_tx,
            cancel: CancellationToken::new(),
        })
    }

    /// Subscribe to push events from all servers.
    pub fn subscribe(&self) -> broadcast::Receiver<ComfyUIEvent> {
        self.event_tx.subscribe()
    }

    /// Base URLs with a connection task running.
    pub async fn tracked_urls(&self) -> Vec<String> {
        let mut urls: Vec<String> = self.connections.read().await.keys().cloned().collect();
        urls.sort();
        urls
    }

    /// Make the set of connections match `urls`: start tasks for new URLs,
    /// stop tasks for URLs no longer present.
    pub async fn sync(&self, urls: &[String]) {
        if self.cancel.is_cancelled() {
            return;
        }

        let mut conns = self.connections.write().await;

        let stale: Vec<String> = conns
            .keys()
            .filter(|url| !urls.contains(url))
            .cloned()
            .collect();
        for url in stale {
            if let Some(managed) = conns.remove(&url) {
                tracing::info!(server_url = %url, "Stopping push connection");
                managed.cancel.cancel();
            }
        }

        for url in urls {
            if conns.contains_key(url) {
                continue;
            }
            let managed = self.spawn_connection(url.clone());
            conns.insert(url.clone(), managed);
        }
    }

    /// Gracefully shut down all connection tasks.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down ComfyUI manager");
        self.cancel.cancel();

        let mut conns = self.connections.write().await;
        for (url, managed) in conns.drain() {
            managed.cancel.cancel();
            if tokio::time::timeout(TASK_STOP_TIMEOUT, managed.task_handle).await.is_err() {
                tracing::warn!(server_url = %url, "Push connection task did not stop in time");
            }
        }

        tracing::info!("ComfyUI manager shut down complete");
    }

    // ---- private helpers ----

    fn spawn_connection(&self, url: String) -> ManagedConnection {
        let client = ComfyUIClient::new(url.clone(), self.client_id.clone());
        let cancel = self.cancel.child_token();
        let task_cancel = cancel.clone();
        let event_tx = self.event_tx.clone();
        let reconnect = self.reconnect.clone();

        let task_handle = tokio::spawn(async move {
            tracing::debug!(server_url = %url, "Starting push connection task");
            run_connection_loop(&client, &reconnect, &event_tx, &task_cancel).await;
            tracing::debug!(server_url = %url, "Push connection task exited");
        });

        ManagedConnection {
            task_handle,
            cancel,
        }
    }
}

/// Core connection loop: connect -> process messages -> reconnect.
///
/// Runs until the cancellation token is triggered.
async fn run_connection_loop(
    client: &ComfyUIClient,
    reconnect: &ReconnectConfig,
    event_tx: &broadcast::Sender<ComfyUIEvent>,
    cancel: &CancellationToken,
) {
    let server_url = client.api_url().to_string();

    let mut conn = match client.connect().await {
        Ok(conn) => conn,
        Err(e) => {
            tracing::warn!(server_url = %server_url, error = %e, "Push connection failed, retrying");
            match reconnect_loop(client, reconnect, cancel).await {
                Some(conn) => conn,
                None => return,
            }
        }
    };

    loop {
        let _ = event_tx.send(ComfyUIEvent::InstanceConnected {
            server_url: server_url.clone(),
        });

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = process_messages(&mut conn.ws_stream, &server_url, event_tx) => {}
        }

        let _ = event_tx.send(ComfyUIEvent::InstanceDisconnected {
            server_url: server_url.clone(),
        });

        if cancel.is_cancelled() {
            return;
        }

        tracing::info!(server_url = %server_url, "Push connection lost, reconnecting");
        conn = match reconnect_loop(client, reconnect, cancel).await {
            Some(conn) => conn,
            None => return,
        };
    }
}
