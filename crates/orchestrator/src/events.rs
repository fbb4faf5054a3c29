//! Batch and job lifecycle events.
//!
//! Published by the coordinator on a `tokio::sync::broadcast` channel; see
//! [`BatchCoordinator::subscribe`](crate::coordinator::BatchCoordinator::subscribe).
//! Events are fire-and-forget: with no subscribers they are dropped.

use pixfarm_core::batch::BatchStatus;
use serde::Serialize;

use crate::error::FailureKind;

/// Default buffer capacity for the broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BatchEvent {
    /// A job was assigned to a node and dispatched.
    JobStarted {
        batch_id: String,
        job_id: String,
        node_id: String,
    },

    JobCompleted {
        batch_id: String,
        job_id: String,
        node_id: String,
        duration_seconds: f64,
    },

    JobFailed {
        batch_id: String,
        job_id: String,
        /// Absent when no node could be selected.
        node_id: Option<String>,
        kind: FailureKind,
        error: String,
    },

    /// Every job reached a terminal state, or the deadline forced them to.
    BatchFinished {
        batch_id: String,
        status: BatchStatus,
        completed: usize,
        failed: usize,
    },
}

impl BatchEvent {
    pub fn batch_id(&self) -> &str {
        match self {
            Self::JobStarted { batch_id, .. }
            | Self::JobCompleted { batch_id, .. }
            | Self::JobFailed { batch_id, .. }
            | Self::BatchFinished { batch_id, .. } => batch_id,
        }
    }
}
