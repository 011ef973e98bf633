//! Handlers for compose jobs.
//!
//! - `POST /api/generateVideo`          submit, returns `202 {jobHandle}`
//! - `GET  /api/videoStatus/{handle}`   poll the job's status

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use promptreel_core::compose::{ComposeAccepted, ComposeRequest, ComposeStatus};

use crate::error::AppResult;
use crate::handlers::json_body;
use crate::state::AppState;

/// POST /api/generateVideo
///
/// Body: `{"sources": [AssetRef...], "instructions"?: "..."}` with sources
/// ordered by originating index. The compose job is submitted before the
/// response is sent; polling continues in the background.
pub async fn generate_video(
    State(state): State<AppState>,
    payload: Result<Json<ComposeRequest>, JsonRejection>,
) -> AppResult<(StatusCode, Json<ComposeAccepted>)> {
    let request = json_body(payload)?;
    let accepted = state.compose.submit(request).await?;
    Ok((StatusCode::ACCEPTED, Json(accepted)))
}

/// GET /api/videoStatus/{handle}
pub async fn video_status(
    State(state): State<AppState>,
    Path(handle): Path<String>,
) -> AppResult<Json<ComposeStatus>> {
    let status = state.compose.status(&handle).await?;
    Ok(Json(status))
}
