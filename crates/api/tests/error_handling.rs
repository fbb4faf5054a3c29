//! Tests for `AppError` → HTTP response mapping.
//!
//! These call `IntoResponse` directly on `AppError` values; no router needed.

use axum::response::IntoResponse;
use http_body_util::BodyExt;
use pixfarm_api::error::AppError;
use pixfarm_core::error::CoreError;
use pixfarm_orchestrator::discovery::DiscoveryError;
use pixfarm_orchestrator::error::CoordinatorError;

/// Helper: convert an `AppError` into its status code and parsed JSON body.
async fn error_to_response(err: AppError) -> (axum::http::StatusCode, serde_json::Value) {
    let response = err.into_response();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    (status, json)
}

#[tokio::test]
async fn not_found_error_returns_404() {
    let err = AppError::Core(CoreError::NotFound {
        entity: "Batch",
        id: "b1".into(),
    });

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::NOT_FOUND);
    assert_eq!(json["code"], "NOT_FOUND");
    assert_eq!(json["error"], "Batch with id b1 not found");
}

#[tokio::test]
async fn validation_error_returns_400() {
    let err = AppError::Core(CoreError::Validation("bad spec".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::BAD_REQUEST);
    assert_eq!(json["code"], "VALIDATION_ERROR");
    assert_eq!(json["error"], "bad spec");
}

#[tokio::test]
async fn shutting_down_maps_to_503() {
    let err: AppError = CoordinatorError::ShuttingDown.into();

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["code"], "SERVICE_UNAVAILABLE");
}

#[tokio::test]
async fn discovery_failure_maps_to_502() {
    let err = AppError::Discovery(DiscoveryError::Unreachable("connection refused".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::BAD_GATEWAY);
    assert_eq!(json["code"], "DISCOVERY_UNAVAILABLE");
}

#[tokio::test]
async fn internal_error_is_sanitized() {
    let err = AppError::Core(CoreError::Internal("pool exhausted at 10.0.0.4".into()));

    let (status, json) = error_to_response(err).await;

    assert_eq!(status, axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "An internal error occurred");
}
