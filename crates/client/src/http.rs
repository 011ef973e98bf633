//! HTTP client for the promptreel server.
//!
//! Mirrors the server's three generation endpoints. Batch responses are
//! decoded incrementally from the `text/event-stream` body, so events are
//! yielded as soon as their frame is complete.

use std::pin::Pin;
use std::time::Duration;

use futures::{Stream, StreamExt};
use promptreel_core::batch::BatchRequest;
use promptreel_core::compose::{ComposeAccepted, ComposeRequest, ComposeStatus};
use promptreel_core::error::CoreError;
use promptreel_core::event::BatchEvent;
use promptreel_events::{DecodeError, SseDecoder};
use serde::Deserialize;

/// Default delay between compose status polls.
pub const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(5);

/// Default number of compose status polls before giving up.
pub const DEFAULT_STATUS_ATTEMPTS: u32 = 60;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The server answered with an error body.
    #[error("Server error ({status}): {message}")]
    Api {
        status: u16,
        message: String,
        code: Option<String>,
        details: Option<String>,
    },

    #[error("Invalid event stream: {0}")]
    Decode(#[from] DecodeError),

    /// The event stream ended before `complete` or `error`.
    #[error("Event stream ended before the batch finished")]
    StreamEnded,

    #[error("Compose job {0} did not finish in time")]
    ComposeTimedOut(String),

    /// The request was refused locally before anything was sent.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Decoded events of one batch, in server order.
pub type BatchEvents = Pin<Box<dyn Stream<Item = Result<BatchEvent, ClientError>> + Send>>;

/// JSON error body returned by every endpoint.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    details: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    /// Create a client for the server at `base_url` (e.g.
    /// `http://localhost:3000`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Start a batch and return its event stream.
    ///
    /// Pre-flight rejections (bad request, batch already running, missing
    /// credential) come back as [`ClientError::Api`] before any event.
    pub async fn submit_batch(&self, request: &BatchRequest) -> Result<BatchEvents, ClientError> {
        let response = self
            .client
            .post(format!("{}/api/generateBatch", self.base_url))
            .json(request)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(decode_events(response))
    }

    pub async fn submit_compose(
        &self,
        request: &ComposeRequest,
    ) -> Result<ComposeAccepted, ClientError> {
        let response = self
            .client
            .post(format!("{}/api/generateVideo", self.base_url))
            .json(request)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json().await?)
    }

    pub async fn compose_status(&self, job_handle: &str) -> Result<ComposeStatus, ClientError> {
        let response = self
            .client
            .get(format!("{}/api/videoStatus/{}", self.base_url, job_handle))
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json().await?)
    }

    /// Poll a compose job until it is terminal, at most `max_attempts`
    /// times with `interval` between polls.
    pub async fn wait_for_compose(
        &self,
        job_handle: &str,
        interval: Duration,
        max_attempts: u32,
    ) -> Result<ComposeStatus, ClientError> {
        for attempt in 1..=max_attempts {
            let status = self.compose_status(job_handle).await?;
            tracing::debug!(handle = job_handle, attempt, status = ?status, "Compose status");
            if status.is_terminal() {
                return Ok(status);
            }
            if attempt < max_attempts {
                tokio::time::sleep(interval).await;
            }
        }
        Err(ClientError::ComposeTimedOut(job_handle.to_string()))
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code, otherwise decode the
    /// server's JSON error body into [`ClientError::Api`].
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(parse_error_body(status.as_u16(), &text))
    }
}

fn parse_error_body(status: u16, text: &str) -> ClientError {
    match serde_json::from_str::<ErrorBody>(text) {
        Ok(body) => ClientError::Api {
            status,
            message: body.error,
            code: body.code,
            details: body.details,
        },
        Err(_) => ClientError::Api {
            status,
            message: text.to_string(),
            code: None,
            details: None,
        },
    }
}

/// Turn a `text/event-stream` body into decoded events.
fn decode_events(response: reqwest::Response) -> BatchEvents {
    let mut decoder = SseDecoder::new();
    let events = response
        .bytes_stream()
        .map(move |chunk| match chunk {
            Ok(bytes) => decoder
                .push(&bytes)
                .into_iter()
                .map(|event| event.map_err(ClientError::from))
                .collect::<Vec<_>>(),
            Err(e) => vec![Err(ClientError::from(e))],
        })
        .flat_map(futures::stream::iter);
    Box::pin(events)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
