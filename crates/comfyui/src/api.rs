//! REST API client for the ComfyUI HTTP endpoints.
//!
//! Wraps the ComfyUI HTTP API (capability probe, image upload, workflow
//! submission, queue removal, interruption, history lookup and artifact
//! download) using [`reqwest`], and adapts it to the engine's
//! [`RemoteEndpoint`] contract.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use vidflow_core::extraction::ResultLocator;
use vidflow_core::remote::{HistoryRecord, RemoteConnector, RemoteEndpoint, RemoteError};

/// HTTP client for a single ComfyUI instance.
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
    /// Client id attached to submissions so this process's WebSocket
    /// connection receives the execution messages.
    client_id: String,
}

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt.
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
}

/// Response returned by `/upload/image`.
#[derive(Debug, Deserialize)]
pub struct UploadResponse {
    /// Name the image was stored under.
    pub name: String,
    #[serde(default)]
    pub subfolder: String,
    #[serde(rename = "type", default)]
    pub storage_type: String,
}

impl UploadResponse {
    /// Reference accepted by `LoadImage` nodes (`subfolder/name`).
    pub fn stored_name(&self) -> String {
        if self.subfolder.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.subfolder, self.name)
        }
    }
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, decode).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// A URL could not be built from the locator.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl From<ComfyUIApiError> for RemoteError {
    fn from(err: ComfyUIApiError) -> Self {
        match err {
            ComfyUIApiError::Request(e) if e.is_timeout() => {
                RemoteError::Timeout(Duration::default())
            }
            ComfyUIApiError::Request(e) if e.is_decode() => RemoteError::Malformed(e.to_string()),
            ComfyUIApiError::Request(e) => RemoteError::Transport(e.to_string()),
            ComfyUIApiError::ApiError { status, body } => RemoteError::Rejected { status, body },
            ComfyUIApiError::InvalidUrl(msg) => RemoteError::Malformed(msg),
        }
    }
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url`   - Base HTTP URL, e.g. `http://host:8188`.
    /// * `client_id` - Id shared with the WebSocket connection.
    pub fn new(api_url: String, client_id: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url, client_id)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across multiple instances).
    pub fn with_client(client: reqwest::Client, api_url: String, client_id: String) -> Self {
        Self {
            client,
            api_url,
            client_id,
        }
    }

    /// Fetch `GET /system_stats`, the cheapest endpoint every ComfyUI build
    /// serves.
    pub async fn system_stats(&self) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/system_stats", self.api_url))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Upload an input image via `POST /upload/image`.
    ///
    /// Existing files with the same name are overwritten so re-running a
    /// job never accumulates copies on the server.
    pub async fn upload_image(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
    ) -> Result<UploadResponse, ComfyUIApiError> {
        let part = reqwest::multipart::Part::bytes(bytes).file_name(file_name.to_string());
        let form = reqwest::multipart::Form::new()
            .part("image", part)
            .text("overwrite", "true")
            .text("type", "input");

        let response = self
            .client
            .post(format!("{}/upload/image", self.api_url))
            .multipart(form)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Submit a workflow for execution.
    ///
    /// Sends a `POST /prompt` request with the given workflow JSON and
    /// client ID.  Returns the server-assigned `prompt_id` and queue
    /// position.
    pub async fn submit_workflow(
        &self,
        workflow: &serde_json::Value,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": self.client_id,
        });

        let response = self
            .client
            .post(format!("{}/prompt", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Remove a queued execution.
    ///
    /// Sends a `POST /queue` request asking ComfyUI to delete the
    /// specified prompt from the queue.
    pub async fn cancel_execution(&self, prompt_id: &str) -> Result<(), ComfyUIApiError> {
        let body = serde_json::json!({
            "delete": [prompt_id],
        });

        let response = self
            .client
            .post(format!("{}/queue", self.api_url))
            .json(&body)
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Interrupt the currently running execution immediately.
    ///
    /// Sends a `POST /interrupt` request.  This does not target a
    /// specific prompt -- it interrupts whatever is executing right now.
    pub async fn interrupt(&self) -> Result<(), ComfyUIApiError> {
        let response = self
            .client
            .post(format!("{}/interrupt", self.api_url))
            .send()
            .await?;

        Self::check_status(response).await
    }

    /// Retrieve execution history for a specific prompt.
    ///
    /// Sends a `GET /history/{prompt_id}` request.  The returned JSON
    /// is keyed by prompt id and is empty until the prompt finished.
    pub async fn get_history(&self, prompt_id: &str) -> Result<serde_json::Value, ComfyUIApiError> {
        let response = self
            .client
            .get(format!("{}/history/{}", self.api_url, prompt_id))
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Download an artifact through `GET /view`.
    pub async fn fetch_view(&self, locator: &ResultLocator) -> Result<Vec<u8>, ComfyUIApiError> {
        let url = view_url(locator)?;
        let response = self.client.get(url).send().await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

#[async_trait]
impl RemoteEndpoint for ComfyUIApi {
    fn base_url(&self) -> &str {
        &self.api_url
    }

    async fn probe(&self) -> Result<(), RemoteError> {
        self.system_stats().await?;
        Ok(())
    }

    async fn upload(&self, bytes: Vec<u8>, name: &str) -> Result<String, RemoteError> {
        let response = self.upload_image(bytes, name).await?;
        Ok(response.stored_name())
    }

    async fn submit(&self, graph: &serde_json::Value) -> Result<String, RemoteError> {
        let response = self.submit_workflow(graph).await?;
        tracing::debug!(
            api_url = %self.api_url,
            prompt_id = %response.prompt_id,
            queue_position = response.number,
            "Workflow queued on ComfyUI",
        );
        Ok(response.prompt_id)
    }

    async fn interrupt(&self) -> Result<(), RemoteError> {
        Ok(ComfyUIApi::interrupt(self).await?)
    }

    async fn cancel_queued(&self, execution_id: &str) -> Result<(), RemoteError> {
        Ok(self.cancel_execution(execution_id).await?)
    }

    async fn lookup_result(&self, execution_id: &str) -> Result<Option<HistoryRecord>, RemoteError> {
        let history = self.get_history(execution_id).await?;
        Ok(parse_history(execution_id, &history))
    }

    async fn fetch_artifact(&self, locator: &ResultLocator) -> Result<Vec<u8>, RemoteError> {
        Ok(self.fetch_view(locator).await?)
    }
}

/// Builds [`ComfyUIApi`] handles sharing one pooled [`reqwest::Client`].
pub struct ComfyUIConnector {
    client: reqwest::Client,
    client_id: String,
}

impl ComfyUIConnector {
    /// Create a connector whose requests are bounded by `timeout`.
    pub fn new(timeout: Duration, client_id: String) -> Result<Self, ComfyUIApiError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client, client_id })
    }

    /// Concrete API handle for `url`.
    pub fn api(&self, url: &str) -> ComfyUIApi {
        ComfyUIApi::with_client(self.client.clone(), url.to_string(), self.client_id.clone())
    }
}

impl RemoteConnector for ComfyUIConnector {
    fn connect(&self, url: &str) -> Arc<dyn RemoteEndpoint> {
        Arc::new(self.api(url))
    }
}

/// Build the `/view` download URL for an artifact.
pub fn view_url(locator: &ResultLocator) -> Result<reqwest::Url, ComfyUIApiError> {
    reqwest::Url::parse_with_params(
        &format!("{}/view", locator.server_url),
        &[
            ("filename", locator.filename.as_str()),
            ("subfolder", locator.subfolder.as_str()),
            ("type", locator.storage_type.as_str()),
        ],
    )
    .map_err(|e| ComfyUIApiError::InvalidUrl(format!("{}: {e}", locator.server_url)))
}

/// Interpret a `/history/{id}` response.
///
/// Returns `None` when the prompt is not in the history yet. Failed
/// executions carry the exception message from the status log.
pub fn parse_history(prompt_id: &str, history: &serde_json::Value) -> Option<HistoryRecord> {
    let entry = history.get(prompt_id)?;
    let outputs = entry
        .get("outputs")
        .cloned()
        .unwrap_or_else(|| serde_json::json!({}));

    let status = entry.get("status");
    let failed = status
        .and_then(|s| s.get("status_str"))
        .and_then(|s| s.as_str())
        == Some("error");

    let error = failed.then(|| {
        status
            .and_then(|s| s.get("messages"))
            .and_then(|m| m.as_array())
            .and_then(|messages| {
                messages.iter().find_map(|message| {
                    let kind = message.get(0)?.as_str()?;
                    if kind != "execution_error" {
                        return None;
                    }
                    message
                        .get(1)?
                        .get("exception_message")?
                        .as_str()
                        .map(str::to_string)
                })
            })
            .unwrap_or_else(|| "execution failed on server".to_string())
    });

    Some(HistoryRecord { outputs, error })
}
