use pixfarm_core::error::CoreError;
use serde::Serialize;

use crate::store::StoreError;

/// Stable classification of a job failure, persisted as `failure_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NodeUnavailable,
    CommunicationTimeout,
    CommunicationFailure,
    RemoteProcessingError,
    LocalIoError,
    BatchTimeout,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NodeUnavailable => "node_unavailable",
            Self::CommunicationTimeout => "communication_timeout",
            Self::CommunicationFailure => "communication_failure",
            Self::RemoteProcessingError => "remote_processing_error",
            Self::LocalIoError => "local_io_error",
            Self::BatchTimeout => "batch_timeout",
        }
    }

    /// Whether the failure is attributable to the node that was contacted,
    /// which then has to be marked inactive.
    pub fn is_node_fault(self) -> bool {
        matches!(
            self,
            Self::CommunicationTimeout | Self::CommunicationFailure | Self::RemoteProcessingError
        )
    }
}

/// Outcome of a failed job. Captured into the job record; never escapes a
/// worker.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DispatchError {
    #[error("No eligible node available")]
    NodeUnavailable,

    #[error("Node {node_id} did not answer before the {timeout_secs}s timeout")]
    CommunicationTimeout { node_id: String, timeout_secs: u64 },

    #[error("Communication with node {node_id} failed: {message}")]
    CommunicationFailure { node_id: String, message: String },

    #[error("Node {node_id} reported a processing error: {message}")]
    RemoteProcessing { node_id: String, message: String },

    #[error("Local I/O error: {0}")]
    LocalIo(String),

    #[error("Batch deadline exceeded (timeout after {0}s)")]
    BatchTimeout(u64),
}

impl DispatchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NodeUnavailable => FailureKind::NodeUnavailable,
            Self::CommunicationTimeout { .. } => FailureKind::CommunicationTimeout,
            Self::CommunicationFailure { .. } => FailureKind::CommunicationFailure,
            Self::RemoteProcessing { .. } => FailureKind::RemoteProcessingError,
            Self::LocalIo(_) => FailureKind::LocalIoError,
            Self::BatchTimeout(_) => FailureKind::BatchTimeout,
        }
    }
}

/// Errors surfaced to callers of the batch coordinator.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    /// Validation failures and not-found lookups.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Coordinator is shutting down and accepts no new batches")]
    ShuttingDown,
}

impl CoordinatorError {
    pub(crate) fn batch_not_found(batch_id: &str) -> Self {
        Self::Core(CoreError::NotFound {
            entity: "Batch",
            id: batch_id.to_string(),
        })
    }
}
