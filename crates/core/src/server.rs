//! Remote compute endpoints and their liveness.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

pub type ServerId = DbId;

/// Reachability of an endpoint as last observed by the liveness probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivenessStatus {
    /// Registered (or re-pointed) but not probed yet.
    Checking,
    Connected,
    Disconnected,
}

/// A remote ComfyUI server jobs can be dispatched to.
#[derive(Debug, Clone, Serialize)]
pub struct ServerEndpoint {
    pub id: ServerId,
    pub display_name: String,
    /// Normalized HTTP base URL, see [`normalize_url`].
    pub url: String,
    pub liveness: LivenessStatus,
    pub last_checked_at: Option<Timestamp>,
}

impl ServerEndpoint {
    pub fn new(id: ServerId, display_name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            url: url.into(),
            liveness: LivenessStatus::Checking,
            last_checked_at: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.liveness == LivenessStatus::Connected
    }
}

/// Normalize a user-supplied server URL.
///
/// Trims whitespace and trailing slashes and requires an `http://` or
/// `https://` scheme with a non-empty host, so that URLs stored on jobs
/// compare equal to the registry entry they target.
pub fn normalize_url(raw: &str) -> Result<String, CoreError> {
    let trimmed = raw.trim().trim_end_matches('/');
    let rest = trimmed
        .strip_prefix("http://")
        .or_else(|| trimmed.strip_prefix("https://"))
        .ok_or_else(|| CoreError::Validation(format!("server URL must start with http:// or https://: {raw}")))?;

    if rest.is_empty() || rest.starts_with('/') {
        return Err(CoreError::Validation(format!("server URL has no host: {raw}")));
    }

    Ok(trimmed.to_string())
}
