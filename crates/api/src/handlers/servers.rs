//! Handlers for the `/servers` resource.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};
use vidflow_core::error::CoreError;
use vidflow_core::server::{ServerEndpoint, ServerId};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for `POST /servers`.
#[derive(Debug, Deserialize)]
pub struct CreateServer {
    /// Display name; the URL is used when omitted or blank.
    #[serde(default)]
    pub name: String,
    pub url: String,
}

/// Request body for `PUT /servers/{id}`. Omitted fields are left unchanged.
#[derive(Debug, Deserialize)]
pub struct UpdateServer {
    pub name: Option<String>,
    pub url: Option<String>,
}

/// Registered servers plus the current selection.
#[derive(Debug, Serialize)]
pub struct ServerListing {
    pub active_id: Option<ServerId>,
    pub servers: Vec<ServerEndpoint>,
}

/// GET /api/v1/servers
pub async fn list_servers(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let registry = state.engine.registry();
    let listing = ServerListing {
        active_id: registry.active().await.map(|s| s.id),
        servers: registry.list().await,
    };
    Ok(Json(DataResponse { data: listing }))
}

/// POST /api/v1/servers
///
/// Register a server. It starts in `checking` until the next liveness
/// probe. Returns 409 when the URL is already registered.
pub async fn add_server(
    State(state): State<AppState>,
    Json(input): Json<CreateServer>,
) -> AppResult<impl IntoResponse> {
    let server = state.engine.registry().add(&input.name, &input.url).await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: server })))
}

/// PUT /api/v1/servers/{id}
///
/// Changing the URL resets liveness to `checking`. Jobs already created
/// keep the URL they were created with.
pub async fn update_server(
    State(state): State<AppState>,
    Path(id): Path<ServerId>,
    Json(input): Json<UpdateServer>,
) -> AppResult<impl IntoResponse> {
    let server = state
        .engine
        .registry()
        .update(id, input.name.as_deref(), input.url.as_deref())
        .await?;
    Ok(Json(DataResponse { data: server }))
}

/// DELETE /api/v1/servers/{id}
pub async fn remove_server(
    State(state): State<AppState>,
    Path(id): Path<ServerId>,
) -> AppResult<StatusCode> {
    state.engine.registry().remove(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/servers/{id}/select
///
/// Make this server the default target for new uploads.
pub async fn select_server(
    State(state): State<AppState>,
    Path(id): Path<ServerId>,
) -> AppResult<impl IntoResponse> {
    let server = state.engine.registry().select(id).await?;
    tracing::info!(server_id = id, server_url = %server.url, "Active server selected");
    Ok(Json(DataResponse { data: server }))
}

/// URL of the selected server, for jobs created without an explicit target.
pub(crate) async fn active_url(state: &AppState) -> Result<String, CoreError> {
    state
        .engine
        .registry()
        .active()
        .await
        .map(|s| s.url)
        .ok_or_else(|| CoreError::Validation("no server registered; add a server first".into()))
}
