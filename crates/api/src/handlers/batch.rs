//! Handlers for batch control.

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/batch
pub async fn batch_status(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let status = state.engine.batch_status().await;
    Ok(Json(DataResponse { data: status }))
}

/// POST /api/v1/batch/start
///
/// Set the batch flag and queue every idle job.
pub async fn start_batch(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let start = state.engine.start_batch().await;
    Ok(Json(DataResponse { data: start }))
}

/// POST /api/v1/batch/stop
///
/// Pending jobs return to idle; running jobs are failed as cancelled and
/// each affected server is interrupted once.
pub async fn stop_batch(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let report = state.engine.stop_batch().await;
    Ok(Json(DataResponse { data: report }))
}
