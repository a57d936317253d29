//! Route definitions for the `/servers` resource.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::servers;
use crate::state::AppState;

/// Routes mounted at `/servers`.
///
/// ```text
/// GET    /                -> list_servers
/// POST   /                -> add_server
/// PUT    /{id}            -> update_server
/// DELETE /{id}            -> remove_server
/// POST   /{id}/select     -> select_server
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(servers::list_servers).post(servers::add_server))
        .route(
            "/{id}",
            put(servers::update_server).delete(servers::remove_server),
        )
        .route("/{id}/select", post(servers::select_server))
}
