//! Engine configuration loaded from environment variables.

use std::path::PathBuf;
use std::time::Duration;

use vidflow_core::extraction::DEFAULT_SAVE_NODE_ID;

/// A server registered at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerSeed {
    pub name: String,
    pub url: String,
}

/// Engine timing and wiring parameters.
///
/// | Env var                | Default                  |
/// |------------------------|--------------------------|
/// | `COMFYUI_SERVERS`      | `http://127.0.0.1:8188`  |
/// | `WORKFLOW_TEMPLATE`    | unset (built-in)         |
/// | `SAVE_NODE_ID`         | `108`                    |
/// | `PROBE_INTERVAL_SECS`  | `2`                      |
/// | `POLL_INTERVAL_SECS`   | `10`                     |
/// | `DISPATCH_INTERVAL_MS` | `500`                    |
/// | `REMOTE_TIMEOUT_SECS`  | `30`                     |
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub servers: Vec<ServerSeed>,
    pub workflow_template: Option<PathBuf>,
    /// Graph node whose output is the job result.
    pub save_node_id: String,
    pub probe_interval: Duration,
    pub poll_interval: Duration,
    pub dispatch_interval: Duration,
    /// Upper bound for every individual remote call.
    pub remote_timeout: Duration,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            servers: vec![ServerSeed {
                name: "local".to_string(),
                url: "http://127.0.0.1:8188".to_string(),
            }],
            workflow_template: None,
            save_node_id: DEFAULT_SAVE_NODE_ID.to_string(),
            probe_interval: Duration::from_secs(2),
            poll_interval: Duration::from_secs(10),
            dispatch_interval: Duration::from_millis(500),
            remote_timeout: Duration::from_secs(30),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to
    /// [`EngineConfig::default`] for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let servers = match std::env::var("COMFYUI_SERVERS") {
            Ok(raw) => parse_server_list(&raw),
            Err(_) => defaults.servers,
        };

        let workflow_template = std::env::var("WORKFLOW_TEMPLATE")
            .ok()
            .filter(|p| !p.trim().is_empty())
            .map(PathBuf::from);

        let save_node_id = std::env::var("SAVE_NODE_ID").unwrap_or(defaults.save_node_id);

        Ok(Self {
            servers,
            workflow_template,
            save_node_id,
            probe_interval: secs_var("PROBE_INTERVAL_SECS", defaults.probe_interval)?,
            poll_interval: secs_var("POLL_INTERVAL_SECS", defaults.poll_interval)?,
            dispatch_interval: millis_var("DISPATCH_INTERVAL_MS", defaults.dispatch_interval)?,
            remote_timeout: secs_var("REMOTE_TIMEOUT_SECS", defaults.remote_timeout)?,
        })
    }
}

/// Parse `COMFYUI_SERVERS`: comma-separated entries, each either `url` or
/// `name=url`. Unnamed entries are called `server-N` (1-based).
pub fn parse_server_list(raw: &str) -> Vec<ServerSeed> {
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .enumerate()
        .map(|(idx, entry)| match entry.split_once('=') {
            Some((name, url)) if !name.contains("://") => ServerSeed {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
            },
            _ => ServerSeed {
                name: format!("server-{}", idx + 1),
                url: entry.to_string(),
            },
        })
        .collect()
}

fn secs_var(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    parse_var(var).map(|v| v.map_or(default, Duration::from_secs))
}

fn millis_var(var: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    parse_var(var).map(|v| v.map_or(default, Duration::from_millis))
}

fn parse_var(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|v| *v > 0)
            .map(Some)
            .ok_or(ConfigError::Invalid { var, value }),
        Err(_) => Ok(None),
    }
}
