use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use pixfarm_core::error::CoreError;
use pixfarm_orchestrator::discovery::DiscoveryError;
use pixfarm_orchestrator::error::CoordinatorError;
use pixfarm_orchestrator::store::StoreError;
use serde_json::json;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `pixfarm_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The persistent store failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// The discovery service could not be used.
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// The caller did not identify itself.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// The coordinator is draining and accepts no new work.
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl From<CoordinatorError> for AppError {
    fn from(err: CoordinatorError) -> Self {
        match err {
            CoordinatorError::Core(core) => AppError::Core(core),
            CoordinatorError::Store(store) => AppError::Store(store),
            err @ CoordinatorError::ShuttingDown => AppError::ServiceUnavailable(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // --- CoreError variants ---
            AppError::Core(core) => match core {
                CoreError::NotFound { entity, id } => (
                    StatusCode::NOT_FOUND,
                    "NOT_FOUND",
                    format!("{entity} with id {id} not found"),
                ),
                CoreError::Validation(msg) => {
                    (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
                }
                CoreError::Internal(msg) => {
                    tracing::error!(error = %msg, "Internal core error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "INTERNAL_ERROR",
                        "An internal error occurred".to_string(),
                    )
                }
            },

            // --- Collaborator errors ---
            AppError::Store(err) => {
                tracing::error!(error = %err, "Store error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Discovery(err) => {
                tracing::warn!(error = %err, "Discovery error");
                (StatusCode::BAD_GATEWAY, "DISCOVERY_UNAVAILABLE", err.to_string())
            }

            // --- HTTP-specific errors ---
            AppError::Unauthorized(msg) => {
                (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone())
            }
            AppError::ServiceUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "SERVICE_UNAVAILABLE",
                msg.clone(),
            ),
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}
