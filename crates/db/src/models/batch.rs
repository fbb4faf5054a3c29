//! Batch entity model.
//!
//! Only identity, ownership and timing are stored; the batch status is
//! always derived from its jobs.

use pixfarm_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `batches` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Batch {
    pub id: String,
    pub owner_id: DbId,
    pub job_count: i32,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}
