use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` while the process serves requests.
    pub status: &'static str,
    pub version: &'static str,
    /// `false` when `LUMA_API_KEY` is missing; generation requests will
    /// then fail with a configuration error.
    pub configured: bool,
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let configured = state.batches.is_configured();
    if !configured {
        tracing::debug!("Health check while unconfigured");
    }

    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        configured,
    })
}

/// `GET /health`, mounted at the root rather than under `/api`.
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
