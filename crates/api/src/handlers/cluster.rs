//! Handlers for cluster observability and node liveness.

use axum::extract::{Path, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::error::AppResult;
use crate::middleware::owner::Owner;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct DiscoverResult {
    pub known_nodes: usize,
    pub active_nodes: usize,
}

#[derive(Debug, Serialize)]
pub struct PingResult {
    pub node_id: String,
    pub active: bool,
}

/// GET /api/v1/cluster
///
/// Re-probes every known node and returns the aggregate view.
pub async fn get_cluster(
    _owner: Owner,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let summary = state.coordinator.cluster_summary().await;
    Ok(Json(DataResponse { data: summary }))
}

/// POST /api/v1/cluster/discover
///
/// Run discovery now instead of waiting for the monitor.
pub async fn discover(
    owner: Owner,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let registry = state.coordinator.registry();
    let known_nodes = registry.discover().await?;
    let active_nodes = registry.list_active().await.len();

    tracing::info!(owner_id = owner.id, known_nodes, active_nodes, "Discovery triggered");

    Ok(Json(DataResponse {
        data: DiscoverResult {
            known_nodes,
            active_nodes,
        },
    }))
}

/// GET /api/v1/nodes/{node_id}/ping
pub async fn ping_node(
    _owner: Owner,
    State(state): State<AppState>,
    Path(node_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let active = state.coordinator.registry().ping(&node_id).await;
    Ok(Json(DataResponse {
        data: PingResult { node_id, active },
    }))
}
