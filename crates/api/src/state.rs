use std::sync::Arc;

use pixfarm_orchestrator::coordinator::BatchCoordinator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool, when a database is configured.
    pub pool: Option<pixfarm_db::DbPool>,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Batch coordinator (owns the node registry).
    pub coordinator: BatchCoordinator,
}
