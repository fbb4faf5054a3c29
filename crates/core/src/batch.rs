//! Batch status aggregation.
//!
//! A batch has no status of its own: it is always derived from the counts
//! of its jobs' states, so the two can never diverge.

use serde::Serialize;

use crate::error::CoreError;

/// Maximum number of jobs accepted in a single batch.
pub const MAX_JOBS_PER_BATCH: usize = 500;

/// Maximum page size for batch history, applied by every store.
pub const MAX_HISTORY_LIMIT: i64 = 100;

/// Derived batch status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    /// At least one job has not reached a terminal state yet.
    Processing,
    /// Every job completed.
    Completed,
    /// Every job reached a terminal state, some completed and some failed.
    Partial,
    /// Every job failed.
    Failed,
}

impl BatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Partial => "partial",
            Self::Failed => "failed",
        }
    }

    pub fn is_finished(self) -> bool {
        !matches!(self, Self::Processing)
    }
}

/// Per-state job counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchCounts {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl BatchCounts {
    /// Number of jobs in a terminal state.
    pub fn terminal(&self) -> usize {
        self.completed + self.failed
    }

    /// Derive the batch status from the counts.
    ///
    /// `Completed` and `Failed` require every job to agree; any job still
    /// pending or processing keeps the batch `Processing`; a finished mix is
    /// `Partial`.
    pub fn status(&self) -> BatchStatus {
        if self.total > 0 && self.completed == self.total {
            BatchStatus::Completed
        } else if self.total > 0 && self.failed == self.total {
            BatchStatus::Failed
        } else if self.terminal() < self.total || self.total == 0 {
            BatchStatus::Processing
        } else {
            BatchStatus::Partial
        }
    }

    /// Percentage of completed jobs, rounded to two decimals.
    pub fn progress_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        round2(self.completed as f64 / self.total as f64 * 100.0)
    }
}

/// Round to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Validate the number of jobs in a submitted batch.
pub fn validate_batch_size(job_count: usize) -> Result<(), CoreError> {
    if job_count == 0 {
        return Err(CoreError::Validation(
            "A batch must contain at least one job".to_string(),
        ));
    }
    if job_count > MAX_JOBS_PER_BATCH {
        return Err(CoreError::Validation(format!(
            "A batch may contain at most {MAX_JOBS_PER_BATCH} jobs"
        )));
    }
    Ok(())
}

/// Validate a caller-declared input size. Unknown sizes are measured at
/// dispatch time.
pub fn validate_input_size(label: &str, size: Option<i64>) -> Result<(), CoreError> {
    match size {
        Some(bytes) if bytes < 0 => Err(CoreError::Validation(format!(
            "{label}: input_size_bytes must not be negative (got {bytes})"
        ))),
        _ => Ok(()),
    }
}
