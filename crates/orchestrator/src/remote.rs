//! Execution of one job on one node.
//!
//! [`RemoteJobClient`] is stateless with respect to node health: it returns a
//! classified outcome and leaves marking the node inactive to the caller.

use std::sync::Arc;
use std::time::{Duration, Instant};

use base64::{engine::general_purpose, Engine as _};
use pixfarm_db::models::job::Job;

use crate::error::DispatchError;
use crate::node_api::{NodeApi, NodeApiError, ProcessRequest};
use crate::registry::Node;
use crate::storage::ArtifactStorage;

/// Outcome of a successful dispatch.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSuccess {
    pub result_ref: String,
    pub input_size_bytes: i64,
    pub result_size_bytes: i64,
    /// Wall-clock time of the remote call as observed by the orchestrator.
    pub duration_seconds: f64,
    /// Processing time reported by the node, if any.
    pub node_duration_seconds: Option<f64>,
}

pub struct RemoteJobClient {
    api: Arc<dyn NodeApi>,
    storage: Arc<dyn ArtifactStorage>,
    timeout: Duration,
}

impl RemoteJobClient {
    pub fn new(api: Arc<dyn NodeApi>, storage: Arc<dyn ArtifactStorage>, timeout: Duration) -> Self {
        Self {
            api,
            storage,
            timeout,
        }
    }

    /// Transfer the job's input to `node`, run it, and store the result at
    /// `result_ref`.
    ///
    /// An unreadable input fails with [`DispatchError::LocalIo`] before the
    /// node is contacted.
    pub async fn dispatch(
        &self,
        node: &Node,
        job: &Job,
        result_ref: &str,
    ) -> Result<DispatchSuccess, DispatchError> {
        if !self.storage.exists(&job.source_ref).await {
            return Err(DispatchError::LocalIo(format!(
                "Input artifact not readable: {}",
                job.source_ref
            )));
        }
        let input = self
            .storage
            .read(&job.source_ref)
            .await
            .map_err(|e| DispatchError::LocalIo(e.to_string()))?;

        let request = ProcessRequest {
            job_id: job.id.clone(),
            filename: job.original_filename.clone(),
            encoded_payload: general_purpose::STANDARD.encode(&input),
            transforms: job.transforms().to_vec(),
        };

        tracing::debug!(
            job_id = %job.id,
            node_id = %node.node_id,
            input_bytes = input.len(),
            steps = request.transforms.len(),
            "Dispatching job",
        );

        let started = Instant::now();
        let response = match tokio::time::timeout(
            self.timeout,
            self.api.process_with_payload(&node.endpoint, &request),
        )
        .await
        {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(self.classify_transport(node, e)),
            Err(_) => return Err(self.timed_out(node)),
        };
        let duration_seconds = started.elapsed().as_secs_f64();

        if !response.success {
            return Err(DispatchError::RemoteProcessing {
                node_id: node.node_id.clone(),
                message: response
                    .error
                    .unwrap_or_else(|| "node reported failure without detail".to_string()),
            });
        }
        let encoded = response
            .encoded_result
            .ok_or_else(|| DispatchError::RemoteProcessing {
                node_id: node.node_id.clone(),
                message: "node reported success without a result payload".to_string(),
            })?;
        let output = general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| DispatchError::RemoteProcessing {
                node_id: node.node_id.clone(),
                message: format!("undecodable result payload: {e}"),
            })?;

        self.storage
            .write(result_ref, &output)
            .await
            .map_err(|e| DispatchError::LocalIo(e.to_string()))?;

        Ok(DispatchSuccess {
            result_ref: result_ref.to_string(),
            input_size_bytes: input.len() as i64,
            result_size_bytes: output.len() as i64,
            duration_seconds,
            node_duration_seconds: response.duration,
        })
    }

    fn classify_transport(&self, node: &Node, error: NodeApiError) -> DispatchError {
        match error {
            NodeApiError::Timeout(_) => self.timed_out(node),
            NodeApiError::Status { status, body } => DispatchError::RemoteProcessing {
                node_id: node.node_id.clone(),
                message: format!("HTTP {status}: {body}"),
            },
            e @ (NodeApiError::Transport(_) | NodeApiError::Decode(_)) => {
                DispatchError::CommunicationFailure {
                    node_id: node.node_id.clone(),
                    message: e.to_string(),
                }
            }
        }
    }

    fn timed_out(&self, node: &Node) -> DispatchError {
        DispatchError::CommunicationTimeout {
            node_id: node.node_id.clone(),
            timeout_secs: self.timeout.as_secs(),
        }
    }
}
