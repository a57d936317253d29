use axum::routing::get;
use axum::Router;

use crate::handlers::defaults;
use crate::state::AppState;

/// Routes mounted at `/defaults`.
///
/// ```text
/// GET    /                -> get_defaults
/// PUT    /                -> replace_defaults
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route(
        "/",
        get(defaults::get_defaults).put(defaults::replace_defaults),
    )
}
