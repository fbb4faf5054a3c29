//! Handlers for the `/batches` resource.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use pixfarm_db::models::job::NewJob;
use serde::Deserialize;

use crate::error::AppResult;
use crate::middleware::owner::Owner;
use crate::query::PaginationParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// Request body for batch submission.
#[derive(Debug, Deserialize)]
pub struct SubmitBatch {
    pub jobs: Vec<NewJob>,
}

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

/// POST /api/v1/batches
///
/// Validate and persist a batch, then dispatch it in the background.
/// Returns 202 with the batch id and job ids.
pub async fn submit_batch(
    owner: Owner,
    State(state): State<AppState>,
    Json(input): Json<SubmitBatch>,
) -> AppResult<impl IntoResponse> {
    let submission = state.coordinator.submit_batch(owner.id, input.jobs).await?;
    Ok((StatusCode::ACCEPTED, Json(DataResponse { data: submission })))
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// GET /api/v1/batches
///
/// The caller's batches, newest first. Supports `limit` and `offset`.
pub async fn list_batches(
    owner: Owner,
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> AppResult<impl IntoResponse> {
    let history = state
        .coordinator
        .list_history(owner.id, params.limit(), params.offset())
        .await?;
    Ok(Json(DataResponse { data: history }))
}

/// GET /api/v1/batches/{batch_id}
pub async fn get_batch(
    owner: Owner,
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let detail = state
        .coordinator
        .get_batch_detail(&batch_id, owner.id)
        .await?;
    Ok(Json(DataResponse { data: detail }))
}

/// GET /api/v1/batches/{batch_id}/status
pub async fn get_batch_status(
    owner: Owner,
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let status = state
        .coordinator
        .get_batch_status(&batch_id, owner.id)
        .await?;
    Ok(Json(DataResponse { data: status }))
}
