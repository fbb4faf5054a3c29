//! Route definitions for the `/batches` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::batches;
use crate::state::AppState;

/// Routes mounted at `/batches`.
///
/// ```text
/// GET    /                      -> list_batches
/// POST   /                      -> submit_batch
/// GET    /{batch_id}            -> get_batch
/// GET    /{batch_id}/status     -> get_batch_status
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(batches::list_batches).post(batches::submit_batch))
        .route("/{batch_id}", get(batches::get_batch))
        .route("/{batch_id}/status", get(batches::get_batch_status))
}
