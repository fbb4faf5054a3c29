pub mod batches;
pub mod cluster;
pub mod health;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /batches                          list, submit
/// /batches/{batch_id}               detail
/// /batches/{batch_id}/status        status
///
/// /cluster                          cluster summary
/// /cluster/discover                 trigger discovery (POST)
/// /nodes/{node_id}/ping             liveness
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/batches", batches::router())
        .merge(cluster::router())
}
