use axum::routing::{get, post};
use axum::Router;

use crate::handlers::batch;
use crate::state::AppState;

/// Routes mounted at `/batch`.
///
/// ```text
/// GET    /                -> batch_status
/// POST   /start           -> start_batch
/// POST   /stop            -> stop_batch
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(batch::batch_status))
        .route("/start", post(batch::start_batch))
        .route("/stop", post(batch::stop_batch))
}
