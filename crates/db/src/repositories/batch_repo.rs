//! Repository for the `batches` table.

use pixfarm_core::batch::MAX_HISTORY_LIMIT;
use pixfarm_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::batch::Batch;

/// Column list for `batches` queries.
const COLUMNS: &str = "id, owner_id, job_count, created_at, finished_at";

/// Provides persistence operations for batches.
pub struct BatchRepo;

impl BatchRepo {
    /// Insert a new batch row.
    pub async fn create(pool: &PgPool, batch: &Batch) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO batches (id, owner_id, job_count, created_at) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(&batch.id)
        .bind(batch.owner_id)
        .bind(batch.job_count)
        .bind(batch.created_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record when the coordinator finalized a batch.
    pub async fn mark_finished(
        pool: &PgPool,
        batch_id: &str,
        finished_at: Timestamp,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE batches SET finished_at = $2 WHERE id = $1")
            .bind(batch_id)
            .bind(finished_at)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Find a batch by ID, restricted to its owner.
    pub async fn find_for_owner(
        pool: &PgPool,
        batch_id: &str,
        owner_id: DbId,
    ) -> Result<Option<Batch>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM batches WHERE id = $1 AND owner_id = $2");
        sqlx::query_as::<_, Batch>(&query)
            .bind(batch_id)
            .bind(owner_id)
            .fetch_optional(pool)
            .await
    }

    /// List an owner's batches, newest first.
    pub async fn list_by_owner(
        pool: &PgPool,
        owner_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Batch>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM batches \
             WHERE owner_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, Batch>(&query)
            .bind(owner_id)
            .bind(limit.clamp(0, MAX_HISTORY_LIMIT))
            .bind(offset.max(0))
            .fetch_all(pool)
            .await
    }
}
