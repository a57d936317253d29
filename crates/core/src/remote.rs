//! Contract between the orchestration engine and a remote compute server.
//!
//! The engine only talks to servers through [`RemoteEndpoint`] (request /
//! response calls) and [`PushEvent`] (the normalized push stream), so the
//! ComfyUI transport and in-process test doubles are interchangeable.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::extraction::ResultLocator;

/// Errors surfaced by a remote call.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// Network, DNS, TLS or connection failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The server answered with a non-success status.
    #[error("server rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    /// No answer within the configured bound.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The server answered but the body did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// One entry of the server's execution history.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRecord {
    /// Outputs record keyed by graph-node id.
    pub outputs: serde_json::Value,
    /// Error reported by the server for this execution, if it failed.
    pub error: Option<String>,
}

/// Request / response operations the engine needs from a server.
///
/// Implementations must not retry internally; the engine owns timeouts and
/// decides what a failure means for the job.
#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    /// Normalized base URL of the server.
    fn base_url(&self) -> &str;

    /// Lightweight capability request used as a liveness probe.
    async fn probe(&self) -> Result<(), RemoteError>;

    /// Upload an input image; returns the name the server stored it under.
    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<String, RemoteError>;

    /// Enqueue an execution graph; returns the server-assigned execution id.
    async fn submit(&self, graph: &serde_json::Value) -> Result<String, RemoteError>;

    /// Interrupt whatever the server is executing right now.
    async fn interrupt(&self) -> Result<(), RemoteError>;

    /// Remove a not-yet-started execution from the server queue.
    async fn cancel_queued(&self, execution_id: &str) -> Result<(), RemoteError>;

    /// Look up the history entry for an execution. `None` while the server
    /// has not recorded it yet.
    async fn lookup_result(&self, execution_id: &str) -> Result<Option<HistoryRecord>, RemoteError>;

    /// Download a result artifact.
    async fn fetch_artifact(&self, locator: &ResultLocator) -> Result<Vec<u8>, RemoteError>;
}

/// Builds the [`RemoteEndpoint`] for a server URL.
pub trait RemoteConnector: Send + Sync {
    fn connect(&self, url: &str) -> Arc<dyn RemoteEndpoint>;
}

/// Normalized push-stream message, correlated by execution id.
#[derive(Debug, Clone, PartialEq)]
pub enum PushEvent {
    /// Remote execution began.
    Started { execution_id: String },
    /// Step-level progress (`value` of `max`).
    Progress {
        execution_id: String,
        value: i64,
        max: i64,
    },
    /// Execution finished and produced this outputs record.
    Succeeded {
        execution_id: String,
        outputs: serde_json::Value,
    },
    /// Execution failed on the server.
    Failed { execution_id: String, reason: String },
    /// Execution ended but the stream carried no outputs; the history must
    /// be consulted to learn the outcome.
    Finished { execution_id: String },
}

impl PushEvent {
    pub fn execution_id(&self) -> &str {
        match self {
            PushEvent::Started { execution_id }
            | PushEvent::Progress { execution_id, .. }
            | PushEvent::Succeeded { execution_id, .. }
            | PushEvent::Failed { execution_id, .. }
            | PushEvent::Finished { execution_id } => execution_id,
        }
    }
}
