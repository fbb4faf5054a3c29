use axum::extract::State;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the database is reachable; `null` when running without one.
    pub db_healthy: Option<bool>,
    /// Nodes active as of the last probe.
    pub active_nodes: usize,
}

/// GET /health -- returns service, database and node health.
///
/// Reads the registry snapshot only; no node is probed.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let db_healthy = match &state.pool {
        Some(pool) => Some(pixfarm_db::health_check(pool).await.is_ok()),
        None => None,
    };
    let active_nodes = state.coordinator.registry().list_active().await.len();

    let status = if db_healthy == Some(false) {
        "degraded"
    } else {
        "ok"
    };

    Json(HealthResponse {
        status,
        version: env!("CARGO_PKG_VERSION"),
        db_healthy,
        active_nodes,
    })
}

/// Mount health check routes (intended for root-level, NOT under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
