//! Handlers for the global generation defaults.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use validator::Validate;
use vidflow_core::error::CoreError;
use vidflow_core::job::GenerationDefaults;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/defaults
pub async fn get_defaults(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let defaults = state.defaults.read().await.clone();
    Ok(Json(DataResponse { data: defaults }))
}

/// PUT /api/v1/defaults
///
/// Replace the defaults. Existing jobs keep the snapshot they were created
/// with.
pub async fn replace_defaults(
    State(state): State<AppState>,
    Json(input): Json<GenerationDefaults>,
) -> AppResult<impl IntoResponse> {
    input.validate().map_err(CoreError::from)?;
    *state.defaults.write().await = input.clone();
    tracing::info!(fps = input.fps, duration_secs = input.duration_secs, "Generation defaults updated");
    Ok(Json(DataResponse { data: input }))
}
