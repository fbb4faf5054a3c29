//! Remote capability exposed by every worker node.
//!
//! [`NodeApi`] is the transport seam: the orchestrator only needs `ping`,
//! `obtain_status` and `process_with_payload`.  [`HttpNodeApi`] implements
//! it over JSON/HTTP with [`reqwest`].  Timeouts are applied by the callers
//! (probe timeout in the registry, dispatch timeout in the job client) so
//! every transport is classified the same way.

use async_trait::async_trait;
use pixfarm_core::transform::TransformStep;
use serde::{Deserialize, Serialize};

/// Response to `ping`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PingResponse {
    pub active: bool,
}

/// Node state as reported by the node itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportedState {
    Active,
    Inactive,
    #[serde(other)]
    Unknown,
}

/// Response to `obtain_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatusReport {
    pub status: ReportedState,
    #[serde(default)]
    pub active_job_count: u32,
    #[serde(default)]
    pub capacity: u32,
}

/// Payload-carrying processing request.  Nodes do not share a filesystem
/// with the orchestrator, so the input travels base64-encoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessRequest {
    pub job_id: String,
    pub filename: String,
    pub encoded_payload: String,
    pub transforms: Vec<TransformStep>,
}

/// Result of `process_with_payload`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProcessResponse {
    pub success: bool,
    #[serde(default)]
    pub encoded_result: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    /// Processing time measured by the node, in seconds.
    #[serde(default)]
    pub duration: Option<f64>,
}

/// Errors from the node transport.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NodeApiError {
    /// The transport itself gave up waiting.
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Connection refused, reset, DNS, TLS, ...
    #[error("Transport error: {0}")]
    Transport(String),

    /// The node answered with a non-2xx status.
    #[error("Node returned {status}: {body}")]
    Status { status: u16, body: String },

    /// The node answered with a body that could not be decoded.
    #[error("Malformed node response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for NodeApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(e.to_string())
        } else if e.is_decode() {
            Self::Decode(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Capability implemented by each worker node, invoked remotely.
#[async_trait]
pub trait NodeApi: Send + Sync {
    async fn ping(&self, endpoint: &str) -> Result<PingResponse, NodeApiError>;

    async fn obtain_status(&self, endpoint: &str) -> Result<NodeStatusReport, NodeApiError>;

    async fn process_with_payload(
        &self,
        endpoint: &str,
        request: &ProcessRequest,
    ) -> Result<ProcessResponse, NodeApiError>;
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// JSON/HTTP client for worker nodes.
///
/// * `GET  {endpoint}/ping`
/// * `GET  {endpoint}/status`
/// * `POST {endpoint}/process`
#[derive(Clone, Default)]
pub struct HttpNodeApi {
    client: reqwest::Client,
}

impl HttpNodeApi {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reuse an existing [`reqwest::Client`] across all nodes.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn url(endpoint: &str, path: &str) -> String {
        format!("{}/{}", endpoint.trim_end_matches('/'), path)
    }

    /// Parse a successful JSON response body into the expected type, or
    /// return [`NodeApiError::Status`] with the body text on failure.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, NodeApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(NodeApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl NodeApi for HttpNodeApi {
    async fn ping(&self, endpoint: &str) -> Result<PingResponse, NodeApiError> {
        let response = self.client.get(Self::url(endpoint, "ping")).send().await?;
        Self::parse_response(response).await
    }

    async fn obtain_status(&self, endpoint: &str) -> Result<NodeStatusReport, NodeApiError> {
        let response = self.client.get(Self::url(endpoint, "status")).send().await?;
        Self::parse_response(response).await
    }

    async fn process_with_payload(
        &self,
        endpoint: &str,
        request: &ProcessRequest,
    ) -> Result<ProcessResponse, NodeApiError> {
        let response = self
            .client
            .post(Self::url(endpoint, "process"))
            .json(request)
            .send()
            .await?;
        Self::parse_response(response).await
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn url_joins_without_double_slash() {
        assert_eq!(HttpNodeApi::url("http://n:9000/", "status"), "http://n:9000/status");
        assert_eq!(HttpNodeApi::url("http://n:9000", "ping"), "http://n:9000/ping");
    }

    #[test]
    fn status_report_tolerates_unknown_state() {
        let report: NodeStatusReport =
            serde_json::from_value(json!({"status": "draining", "active_job_count": 2})).unwrap();
        assert_eq!(report.status, ReportedState::Unknown);
        assert_eq!(report.active_job_count, 2);
        assert_eq!(report.capacity, 0);
    }

    #[test]
    fn process_response_optional_fields_default() {
        let response: ProcessResponse =
            serde_json::from_value(json!({"success": false, "error": "bad resize"})).unwrap();
        assert!(!response.success);
        assert!(response.encoded_result.is_none());
        assert_eq!(response.error.as_deref(), Some("bad resize"));
    }
}
