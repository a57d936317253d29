//! Route definitions for the `/jobs` resource.

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;

use crate::handlers::jobs;
use crate::state::AppState;

/// Largest accepted source image upload.
const MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

/// Routes mounted at `/jobs`.
///
/// ```text
/// GET    /                -> list_jobs
/// POST   /                -> create_job (multipart)
/// GET    /{id}            -> get_job
/// DELETE /{id}            -> remove_job
/// POST   /{id}/enqueue    -> enqueue_job
/// POST   /{id}/cancel     -> cancel_job
/// POST   /{id}/duplicate  -> duplicate_job
/// POST   /{id}/retry      -> retry_job
/// GET    /{id}/result     -> download_result
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(jobs::list_jobs)
                .post(jobs::create_job)
                .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/{id}", get(jobs::get_job).delete(jobs::remove_job))
        .route("/{id}/enqueue", post(jobs::enqueue_job))
        .route("/{id}/cancel", post(jobs::cancel_job))
        .route("/{id}/duplicate", post(jobs::duplicate_job))
        .route("/{id}/retry", post(jobs::retry_job))
        .route("/{id}/result", get(jobs::download_result))
}
