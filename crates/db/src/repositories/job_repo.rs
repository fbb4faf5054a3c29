//! Repository for the `jobs` table.
//!
//! Uses `JobStatus` from `models::status` for all status values; every write
//! persists the full state of one transition.

use sqlx::PgPool;
use pixfarm_core::types::DbId;

use crate::models::job::Job;

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, batch_id, seq, owner_id, original_filename, source_ref, \
    transform_spec, status_id, assigned_node_id, result_ref, \
    error_message, failure_kind, input_size_bytes, result_size_bytes, \
    duration_seconds, created_at, started_at, completed_at";

/// Provides persistence operations for image jobs.
pub struct JobRepo;

impl JobRepo {
    /// Insert a new job row.
    pub async fn create(pool: &PgPool, job: &Job) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO jobs \
                 (id, batch_id, seq, owner_id, original_filename, source_ref, \
                  transform_spec, status_id, input_size_bytes, created_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(&job.id)
        .bind(&job.batch_id)
        .bind(job.seq)
        .bind(job.owner_id)
        .bind(&job.original_filename)
        .bind(&job.source_ref)
        .bind(&job.transform_spec)
        .bind(job.status_id)
        .bind(job.input_size_bytes)
        .bind(job.created_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Write the mutable state of a job (status, assignment, outcome, timing).
    ///
    /// Idempotent: writing the same state twice leaves the row unchanged.
    pub async fn update_state(pool: &PgPool, job: &Job) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE jobs \
             SET status_id = $2, assigned_node_id = $3, result_ref = $4, \
                 error_message = $5, failure_kind = $6, result_size_bytes = $7, \
                 duration_seconds = $8, started_at = $9, completed_at = $10 \
             WHERE id = $1",
        )
        .bind(&job.id)
        .bind(job.status_id)
        .bind(&job.assigned_node_id)
        .bind(&job.result_ref)
        .bind(&job.error_message)
        .bind(&job.failure_kind)
        .bind(job.result_size_bytes)
        .bind(job.duration_seconds)
        .bind(job.started_at)
        .bind(job.completed_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// List the jobs of a batch owned by `owner_id`, in creation order.
    pub async fn list_by_batch(
        pool: &PgPool,
        batch_id: &str,
        owner_id: DbId,
    ) -> Result<Vec<Job>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM jobs \
             WHERE batch_id = $1 AND owner_id = $2 \
             ORDER BY created_at ASC, seq ASC"
        );
        sqlx::query_as::<_, Job>(&query)
            .bind(batch_id)
            .bind(owner_id)
            .fetch_all(pool)
            .await
    }
}
