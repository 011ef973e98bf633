//! Handler for `POST /api/generateBatch`.
//!
//! Pre-flight failures (missing credential, invalid request, batch already
//! running) are returned as JSON errors before any event. Once accepted,
//! the response is a `text/event-stream` with one `data: {json}` frame per
//! [`BatchEvent`](promptreel_core::event::BatchEvent), ending with
//! `complete` or `error`.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Json;
use futures::{Stream, StreamExt};
use promptreel_core::batch::BatchRequest;

use crate::error::AppResult;
use crate::handlers::json_body;
use crate::state::AppState;

/// POST /api/generateBatch
///
/// Body: `{"prompts": [...], "indices"?: [...]}`. With `indices` the batch
/// is a retry and each result reports `indices[i]` for `prompts[i]`.
pub async fn generate_batch(
    State(state): State<AppState>,
    payload: Result<Json<BatchRequest>, JsonRejection>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, axum::Error>>>> {
    let request = json_body(payload)?;
    let prompts = request.prompts.len();
    let fresh = request.is_fresh();

    let events = state.batches.start(request)?;
    tracing::info!(prompts, fresh, "Batch accepted");

    let frames = events.map(|event| Event::default().json_data(event));
    Ok(Sse::new(frames).keep_alive(KeepAlive::default()))
}
