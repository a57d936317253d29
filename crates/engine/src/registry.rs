//! Server registry and liveness probing.
//!
//! Holds every registered endpoint together with the
//! [`RemoteEndpoint`] handle used to talk to it. The probe loop fans out
//! one capability request per endpoint each interval and records the
//! outcome as the endpoint's liveness; only CONNECTED endpoints may be
//! claimed by the dispatcher.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use vidflow_core::error::CoreError;
use vidflow_core::remote::{RemoteConnector, RemoteEndpoint, RemoteError};
use vidflow_core::server::{normalize_url, LivenessStatus, ServerEndpoint, ServerId};

use crate::bounded;

struct Registered {
    info: ServerEndpoint,
    remote: Arc<dyn RemoteEndpoint>,
}

#[derive(Default)]
struct RegistryState {
    endpoints: BTreeMap<ServerId, Registered>,
    active: Option<ServerId>,
    next_id: ServerId,
}

impl RegistryState {
    fn url_taken(&self, url: &str, except: Option<ServerId>) -> bool {
        self.endpoints
            .iter()
            .any(|(id, e)| Some(*id) != except && e.info.url == url)
    }

    fn get(&self, id: ServerId) -> Result<&Registered, CoreError> {
        self.endpoints
            .get(&id)
            .ok_or(CoreError::NotFound { entity: "server", id })
    }
}

/// Registry of remote endpoints with their last observed liveness.
pub struct ServerRegistry {
    state: RwLock<RegistryState>,
    connector: Arc<dyn RemoteConnector>,
    probe_timeout: Duration,
}

impl ServerRegistry {
    pub fn new(connector: Arc<dyn RemoteConnector>, probe_timeout: Duration) -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
            connector,
            probe_timeout,
        }
    }

    /// Register an endpoint. The first endpoint becomes the active
    /// selection.
    pub async fn add(&self, display_name: &str, url: &str) -> Result<ServerEndpoint, CoreError> {
        let url = normalize_url(url)?;
        let display_name = display_name_or_url(display_name, &url);

        let mut state = self.state.write().await;
        if state.url_taken(&url, None) {
            return Err(CoreError::Conflict(format!("server {url} is already registered")));
        }

        state.next_id += 1;
        let id = state.next_id;
        let info = ServerEndpoint::new(id, display_name, url.clone());
        let remote = self.connector.connect(&url);
        state.endpoints.insert(
            id,
            Registered {
                info: info.clone(),
                remote,
            },
        );
        if state.active.is_none() {
            state.active = Some(id);
        }

        tracing::info!(server_id = id, server_url = %url, "Server registered");
        Ok(info)
    }

    /// Remove an endpoint. When it was the active selection, the
    /// lowest-id remaining endpoint takes over.
    pub async fn remove(&self, id: ServerId) -> Result<ServerEndpoint, CoreError> {
        let mut state = self.state.write().await;
        let removed = state
            .endpoints
            .remove(&id)
            .ok_or(CoreError::NotFound { entity: "server", id })?;
        if state.active == Some(id) {
            state.active = state.endpoints.keys().next().copied();
        }

        tracing::info!(server_id = id, server_url = %removed.info.url, "Server removed");
        Ok(removed.info)
    }

    /// Edit name and/or URL. A URL change resets liveness to CHECKING.
    pub async fn update(
        &self,
        id: ServerId,
        display_name: Option<&str>,
        url: Option<&str>,
    ) -> Result<ServerEndpoint, CoreError> {
        let url = url.map(normalize_url).transpose()?;

        let mut state = self.state.write().await;
        state.get(id)?;
        if let Some(url) = &url {
            if state.url_taken(url, Some(id)) {
                return Err(CoreError::Conflict(format!("server {url} is already registered")));
            }
        }

        let new_remote = url.as_deref().map(|u| self.connector.connect(u));
        let entry = state
            .endpoints
            .get_mut(&id)
            .ok_or(CoreError::NotFound { entity: "server", id })?;

        if let Some(name) = display_name {
            entry.info.display_name = display_name_or_url(name, &entry.info.url);
        }
        if let (Some(url), Some(remote)) = (url, new_remote) {
            if url != entry.info.url {
                tracing::info!(server_id = id, from = %entry.info.url, to = %url, "Server URL changed");
                entry.info.url = url;
                entry.info.liveness = LivenessStatus::Checking;
                entry.info.last_checked_at = None;
                entry.remote = remote;
            }
        }
        Ok(entry.info.clone())
    }

    /// Make `id` the default target for new jobs.
    pub async fn select(&self, id: ServerId) -> Result<ServerEndpoint, CoreError> {
        let mut state = self.state.write().await;
        let info = state.get(id)?.info.clone();
        state.active = Some(id);
        Ok(info)
    }

    pub async fn active(&self) -> Option<ServerEndpoint> {
        let state = self.state.read().await;
        let id = state.active?;
        state.endpoints.get(&id).map(|e| e.info.clone())
    }

    pub async fn get(&self, id: ServerId) -> Option<ServerEndpoint> {
        self.state.read().await.endpoints.get(&id).map(|e| e.info.clone())
    }

    pub async fn list(&self) -> Vec<ServerEndpoint> {
        self.state
            .read()
            .await
            .endpoints
            .values()
            .map(|e| e.info.clone())
            .collect()
    }

    pub async fn urls(&self) -> Vec<String> {
        self.state
            .read()
            .await
            .endpoints
            .values()
            .map(|e| e.info.url.clone())
            .collect()
    }

    pub async fn find_by_url(&self, url: &str) -> Option<ServerEndpoint> {
        self.state
            .read()
            .await
            .endpoints
            .values()
            .find(|e| e.info.url == url)
            .map(|e| e.info.clone())
    }

    pub async fn is_connected(&self, url: &str) -> bool {
        self.find_by_url(url).await.is_some_and(|e| e.is_connected())
    }

    /// URLs of endpoints the last probe found reachable.
    pub async fn connected_urls(&self) -> HashSet<String> {
        self.state
            .read()
            .await
            .endpoints
            .values()
            .filter(|e| e.info.is_connected())
            .map(|e| e.info.url.clone())
            .collect()
    }

    /// Remote handle for `url`; servers no longer registered get a fresh
    /// handle so in-flight jobs can still be polled or interrupted.
    pub async fn remote(&self, url: &str) -> Arc<dyn RemoteEndpoint> {
        let registered = self
            .state
            .read()
            .await
            .endpoints
            .values()
            .find(|e| e.info.url == url)
            .map(|e| Arc::clone(&e.remote));
        registered.unwrap_or_else(|| self.connector.connect(url))
    }

    /// Probe every endpoint in parallel. Each result is recorded as soon
    /// as its own probe finishes, so a hung endpoint never holds back the
    /// others.
    pub async fn probe_all(&self) {
        let targets: Vec<(ServerId, String, Arc<dyn RemoteEndpoint>)> = self
            .state
            .read()
            .await
            .endpoints
            .iter()
            .map(|(id, e)| (*id, e.info.url.clone(), Arc::clone(&e.remote)))
            .collect();

        let probes = targets.into_iter().map(|(id, url, remote)| async move {
            let result = bounded(self.probe_timeout, remote.probe()).await;
            self.record_probe(id, &url, result).await;
        });
        join_all(probes).await;
    }

    async fn record_probe(&self, id: ServerId, url: &str, result: Result<(), RemoteError>) {
        let mut state = self.state.write().await;
        // Skip endpoints removed or re-pointed while the probe ran.
        let Some(entry) = state.endpoints.get_mut(&id).filter(|e| e.info.url == url) else {
            return;
        };
        let liveness = match &result {
            Ok(()) => LivenessStatus::Connected,
            Err(_) => LivenessStatus::Disconnected,
        };
        if entry.info.liveness != liveness {
            match &result {
                Ok(()) => tracing::info!(server_id = id, server_url = %url, "Server reachable"),
                Err(e) => tracing::warn!(server_id = id, server_url = %url, error = %e, "Server unreachable"),
            }
        }
        entry.info.liveness = liveness;
        entry.info.last_checked_at = Some(chrono::Utc::now());
    }

    /// Probe every `interval` until cancelled.
    pub async fn run_probe_loop(&self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::info!(interval_ms = interval.as_millis() as u64, "Liveness probe started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Liveness probe shutting down");
                    break;
                }
                _ = ticker.tick() => self.probe_all().await,
            }
        }
    }
}

fn display_name_or_url(name: &str, url: &str) -> String {
    let name = name.trim();
    if name.is_empty() {
        url.to_string()
    } else {
        name.to_string()
    }
}
