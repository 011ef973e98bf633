//! Health endpoint and cross-cutting HTTP behaviour (request ids, CORS,
//! unknown routes).

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use common::{body_json, build_test_app, get};
use promptreel_luma::testing::ScriptedJobClient;
use tower::ServiceExt;

// ---------------------------------------------------------------------------
// Test: /health reports whether generation is possible
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_reports_configured_service() {
    let app = build_test_app(ScriptedJobClient::new());
    let response = get(app.router.clone(), "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    assert_eq!(json["configured"], true);
}

#[tokio::test]
async fn health_stays_ok_without_credential() {
    let app = build_test_app(ScriptedJobClient::unconfigured());
    let json = body_json(get(app.router.clone(), "/health").await).await;

    assert_eq!(json["status"], "ok");
    assert_eq!(json["configured"], false);
}

// ---------------------------------------------------------------------------
// Test: unknown paths
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unknown_route_and_missing_artifact_are_404() {
    let app = build_test_app(ScriptedJobClient::new());

    let response = get(app.router.clone(), "/api/generateAudio").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = get(app.router.clone(), "/generated/images_missing/image_01.png").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: request ids
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_id_is_generated_when_absent() {
    let app = build_test_app(ScriptedJobClient::new());
    let response = get(app.router.clone(), "/health").await;

    let request_id = response.headers()["x-request-id"].to_str().unwrap();
    assert_eq!(request_id.len(), 36, "expected a UUID, got {request_id}");
}

#[tokio::test]
async fn caller_request_id_is_echoed() {
    let app = build_test_app(ScriptedJobClient::new());
    let request = Request::builder()
        .uri("/health")
        .header("x-request-id", "trace-me-42")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.headers()["x-request-id"], "trace-me-42");
}

// ---------------------------------------------------------------------------
// Test: CORS preflight for the batch endpoint
// ---------------------------------------------------------------------------

#[tokio::test]
async fn batch_endpoint_allows_cross_origin_posts() {
    let app = build_test_app(ScriptedJobClient::new());
    let request = Request::builder()
        .method(Method::OPTIONS)
        .uri("/api/generateBatch")
        .header("Origin", "http://localhost:5173")
        .header("Access-Control-Request-Method", "POST")
        .header("Access-Control-Request-Headers", "content-type")
        .body(Body::empty())
        .unwrap();

    let response = app.router.clone().oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["access-control-allow-origin"], "http://localhost:5173");
    let methods = headers["access-control-allow-methods"].to_str().unwrap();
    assert!(methods.contains("POST"), "got {methods}");
    assert!(app.client.submissions().is_empty());
}
