//! Route definitions for batch and compose generation.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{batch, compose};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/generateBatch", post(batch::generate_batch))
        .route("/generateVideo", post(compose::generate_video))
        .route("/videoStatus/{handle}", get(compose::video_status))
}
