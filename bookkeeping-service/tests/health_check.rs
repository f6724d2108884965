mod common;

use bookkeeping_service::services::metrics::init_metrics;
use common::TestApp;

#[tokio::test]
async fn health_check_works() {
    let app = TestApp::spawn().await;

    let response = app.get("/health").await;
    assert!(response.status().is_success());

    let body: serde_json::Value = response.json().await.expect("Failed to parse JSON");
    assert_eq!(body["status"], "ok");
    assert_eq!(body["service"], "bookkeeping-service");
}

#[tokio::test]
async fn readiness_reflects_store_availability() {
    let app = TestApp::spawn().await;
    assert!(app.get("/ready").await.status().is_success());

    app.store.fail_always("health_check");
    assert_eq!(app.get("/ready").await.status().as_u16(), 503);
}

#[tokio::test]
async fn metrics_endpoint_returns_prometheus_format() {
    init_metrics();
    let app = TestApp::spawn().await;

    let response = app.get("/metrics").await;
    assert!(response.status().is_success());

    let content_type = response
        .headers()
        .get("content-type")
        .expect("Missing content-type header")
        .to_str()
        .expect("Invalid content-type")
        .to_string();
    assert!(content_type.starts_with("text/plain"));

    let body = response.text().await.expect("Failed to get response body");
    assert!(
        body.is_empty() || body.contains('#') || body.contains('_'),
        "Unexpected metrics format: {}",
        body
    );
}

#[tokio::test]
async fn request_id_is_echoed() {
    let app = TestApp::spawn().await;

    let response = app
        .client
        .get(format!("{}/health", app.address))
        .header("x-request-id", "req-7")
        .send()
        .await
        .expect("Failed to execute request");

    assert_eq!(response.headers()["x-request-id"], "req-7");
}
