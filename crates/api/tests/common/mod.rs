#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use promptreel_core::event::BatchEvent;
use promptreel_events::SseDecoder;
use promptreel_luma::testing::ScriptedJobClient;
use tempfile::TempDir;
use tower::ServiceExt;

use promptreel_api::config::ServerConfig;
use promptreel_api::router::build_app_router;
use promptreel_api::state::AppState;

/// Polls allowed per job in tests.
pub const TEST_MAX_ATTEMPTS: u32 = 3;

/// Build a test `ServerConfig` with safe defaults and a fast poll policy.
///
/// Uses `http://localhost:5173` as CORS origin (matching the dev default)
/// and a 30-second request timeout.
pub fn test_config(output_dir: &Path) -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        output_dir: output_dir.to_path_buf(),
        luma_api_key: Some("test-key".to_string()),
        luma_api_url: "http://127.0.0.1:9".to_string(),
        poll_interval_ms: 1,
        poll_max_attempts: TEST_MAX_ATTEMPTS,
    }
}

/// A router wired to a scripted job client and a temporary output folder.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub client: Arc<ScriptedJobClient>,
    pub output: TempDir,
}

/// Build the full application router with all middleware layers, using the
/// given scripted job client.
///
/// Uses [`build_app_router`] so integration tests exercise the same
/// middleware stack (CORS, request ID, timeout, tracing, panic recovery)
/// that production uses.
pub fn build_test_app(client: ScriptedJobClient) -> TestApp {
    let output = tempfile::tempdir().unwrap();
    let config = test_config(output.path());
    let client = Arc::new(client);

    let state = AppState::new(config.clone(), client.clone());
    let router = build_app_router(state.clone(), &config);

    TestApp {
        router,
        state,
        client,
        output,
    }
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    let request = Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn post_json(app: Router, uri: &str, body: serde_json::Value) -> Response<Body> {
    let request = Request::builder()
        .method(Method::POST)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    app.oneshot(request).await.unwrap()
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// Read an SSE response to the end and decode every event.
pub async fn sse_events(response: Response<Body>) -> Vec<BatchEvent> {
    let mut decoder = SseDecoder::new();
    decoder
        .push(&body_bytes(response).await)
        .into_iter()
        .map(|event| event.unwrap())
        .collect()
}
