//! WebSocket client for connecting to a ComfyUI instance.
//!
//! [`ComfyUIClient`] holds the connection configuration for a single
//! ComfyUI server. Call [`ComfyUIClient::connect`] to establish a live
//! [`ComfyUIConnection`] over WebSocket.

use tokio_tungstenite::{connect_async, MaybeTlsStream};

/// Raw WebSocket stream type used throughout the crate.
pub type ComfyUIStream = tokio_tungstenite::WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

/// Configuration handle for a ComfyUI server.
pub struct ComfyUIClient {
    api_url: String,
    ws_url: String,
    client_id: String,
}

/// A live WebSocket connection to a ComfyUI server.
pub struct ComfyUIConnection {
    /// Base HTTP URL of the server this stream belongs to.
    pub api_url: String,
    /// The raw WebSocket stream for reading/writing frames.
    pub ws_stream: ComfyUIStream,
}

impl ComfyUIClient {
    /// Create a client for the server at `api_url` (e.g. `http://host:8188`).
    ///
    /// `client_id` must match the id used when submitting workflows, since
    /// ComfyUI only routes execution messages to the submitting client.
    pub fn new(api_url: impl Into<String>, client_id: impl Into<String>) -> Self {
        let api_url = api_url.into();
        Self {
            ws_url: ws_url_for(&api_url),
            api_url,
            client_id: client_id.into(),
        }
    }

    /// WebSocket base URL (e.g. `ws://host:8188`).
    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    /// HTTP API base URL (e.g. `http://host:8188`).
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    /// Connect to the ComfyUI WebSocket endpoint.
    pub async fn connect(&self) -> Result<ComfyUIConnection, ComfyUIClientError> {
        let url = format!("{}/ws?clientId={}", self.ws_url, self.client_id);

        let (ws_stream, _response) = connect_async(&url).await.map_err(|e| {
            ComfyUIClientError::Connection(format!(
                "Failed to connect to ComfyUI at {}: {e}",
                self.ws_url
            ))
        })?;

        tracing::info!(
            api_url = %self.api_url,
            client_id = %self.client_id,
            "Connected to ComfyUI WebSocket",
        );

        Ok(ComfyUIConnection {
            api_url: self.api_url.clone(),
            ws_stream,
        })
    }
}

/// Fresh client id for this process (UUID v4).
pub fn new_client_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Errors that can occur when working with the WebSocket client.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIClientError {
    /// Failed to establish the WebSocket connection.
    #[error("Connection error: {0}")]
    Connection(String),
}

/// Map an HTTP base URL onto the matching WebSocket scheme.
fn ws_url_for(api_url: &str) -> String {
    if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_url.to_string()
    }
}
