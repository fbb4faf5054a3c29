//! Image job entity models and DTOs.

use pixfarm_core::transform::TransformStep;
use pixfarm_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;

use super::status::{JobStatus, StatusId};

/// A row from the `jobs` table.
///
/// `batch_id` is an explicit foreign key, so batch membership never has to
/// be inferred from stored paths.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Job {
    pub id: String,
    pub batch_id: String,
    /// Position of the job within its batch (0-based creation order).
    pub seq: i32,
    pub owner_id: DbId,
    pub original_filename: String,
    pub source_ref: String,
    pub transform_spec: Json<Vec<TransformStep>>,
    pub status_id: StatusId,
    pub assigned_node_id: Option<String>,
    pub result_ref: Option<String>,
    pub error_message: Option<String>,
    pub failure_kind: Option<String>,
    pub input_size_bytes: i64,
    pub result_size_bytes: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

/// DTO describing one job of a batch submission.
#[derive(Debug, Clone, Deserialize)]
pub struct NewJob {
    pub original_filename: String,
    pub source_ref: String,
    pub transforms: Vec<TransformStep>,
    pub input_size_bytes: Option<i64>,
}

impl Job {
    /// Derive a job id from its batch id and sequence number.
    pub fn derive_id(batch_id: &str, seq: i32) -> String {
        format!("{batch_id}_job_{seq}")
    }

    /// Build a fresh `Pending` job from a submission entry.
    pub fn new_pending(
        batch_id: &str,
        seq: i32,
        owner_id: DbId,
        input: NewJob,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id: Self::derive_id(batch_id, seq),
            batch_id: batch_id.to_string(),
            seq,
            owner_id,
            original_filename: input.original_filename,
            source_ref: input.source_ref,
            transform_spec: Json(input.transforms),
            status_id: JobStatus::Pending.id(),
            assigned_node_id: None,
            result_ref: None,
            error_message: None,
            failure_kind: None,
            input_size_bytes: input.input_size_bytes.unwrap_or(0),
            result_size_bytes: None,
            duration_seconds: None,
            created_at,
            started_at: None,
            completed_at: None,
        }
    }

    /// Current status. Unknown ids (never written by this crate) read as `Pending`.
    pub fn status(&self) -> JobStatus {
        JobStatus::from_id(self.status_id).unwrap_or(JobStatus::Pending)
    }

    pub fn transforms(&self) -> &[TransformStep] {
        &self.transform_spec.0
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn new_job() -> NewJob {
        NewJob {
            original_filename: "cat.jpg".to_string(),
            source_ref: "uploads/cat.jpg".to_string(),
            transforms: vec![TransformStep::new("grayscale", json!({}))],
            input_size_bytes: Some(2048),
        }
    }

    #[test]
    fn job_id_derives_from_batch_and_sequence() {
        assert_eq!(Job::derive_id("b1", 3), "b1_job_3");
    }

    #[test]
    fn new_pending_job_has_no_outcome() {
        let job = Job::new_pending("b1", 0, 7, new_job(), chrono::Utc::now());
        assert_eq!(job.id, "b1_job_0");
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.owner_id, 7);
        assert_eq!(job.input_size_bytes, 2048);
        assert_eq!(job.transforms().len(), 1);
        assert!(job.assigned_node_id.is_none());
        assert!(job.started_at.is_none());
    }
}
