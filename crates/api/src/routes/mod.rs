pub mod generation;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api` route tree.
///
/// ```text
/// POST /generateBatch              stream a batch as server-sent events
/// POST /generateVideo              submit a compose job (202 + handle)
/// GET  /videoStatus/{handle}       poll a compose job
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().merge(generation::router())
}
