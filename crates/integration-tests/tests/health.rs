//! Health checks and request correlation.

#![allow(clippy::unwrap_used)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use storefront_integration_tests::TestContext;

#[tokio::test]
async fn test_liveness_and_readiness() {
    let ctx = TestContext::new();

    let (status, body) = ctx.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");

    let (status, _) = ctx.get("/health/ready").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_request_id_is_echoed() {
    use tower::ServiceExt;

    let db = storefront_store::db::Db::memory(storefront_store::models::SCHEMA);
    let state = storefront_store::AppState::new(storefront_store::StoreConfig::memory(), db);
    let app = storefront_store::app(state);

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/health")
                .header("x-request-id", "req-123")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.headers()["x-request-id"], "req-123");

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(response.headers().contains_key("x-request-id"));
}
