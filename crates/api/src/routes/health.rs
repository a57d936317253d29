use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok` when at least one server is reachable, `degraded` otherwise.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Registered ComfyUI servers.
    pub servers: usize,
    /// Servers the last liveness probe reached.
    pub connected_servers: usize,
    pub batch_running: bool,
}

/// GET /health -- service liveness and server reachability.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let registry = state.engine.registry();
    let servers = registry.list().await.len();
    let connected_servers = registry.connected_urls().await.len();

    let status = if connected_servers > 0 { "ok" } else { "degraded" };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        servers,
        connected_servers,
        batch_running: state.engine.context().batch_running(),
    })
}

/// Mount health check routes (root level, not under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
