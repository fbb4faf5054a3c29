use axum::routing::{get, post};
use axum::Router;

use crate::handlers::cluster;
use crate::state::AppState;

/// Cluster and node routes, merged at the `/api/v1` root.
///
/// ```text
/// GET    /cluster                 -> get_cluster
/// POST   /cluster/discover        -> discover
/// GET    /nodes/{node_id}/ping    -> ping_node
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cluster", get(cluster::get_cluster))
        .route("/cluster/discover", post(cluster::discover))
        .route("/nodes/{node_id}/ping", get(cluster::ping_node))
}
