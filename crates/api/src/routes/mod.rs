pub mod batch;
pub mod defaults;
pub mod health;
pub mod jobs;
pub mod servers;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /servers                          list, register
/// /servers/{id}                     edit, remove
/// /servers/{id}/select              make active (POST)
///
/// /defaults                         get, replace
///
/// /jobs                             list, upload (multipart POST)
/// /jobs/{id}                        get, remove
/// /jobs/{id}/enqueue                idle -> pending (POST)
/// /jobs/{id}/cancel                 stop one job (POST)
/// /jobs/{id}/duplicate              copy as a new idle job (POST)
/// /jobs/{id}/retry                  new pending job from a failed one (POST)
/// /jobs/{id}/result                 download the result artifact
///
/// /batch                            flag + status counts
/// /batch/start                      start batch (POST)
/// /batch/stop                       stop batch (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/servers", servers::router())
        .nest("/defaults", defaults::router())
        .nest("/jobs", jobs::router())
        .nest("/batch", batch::router())
}
