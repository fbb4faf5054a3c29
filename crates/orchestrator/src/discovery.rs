//! Node discovery.
//!
//! Worker nodes register themselves under `{prefix}{node_id}` with an
//! external naming service.  [`DiscoveryService`] is the seam to that
//! service; [`NodeDirectory`] wraps it with the naming convention so the
//! rest of the orchestrator only deals in node ids and endpoints.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

/// Naming/discovery service consumed by the orchestrator.
///
/// `register` is used by the nodes themselves and is not part of this seam.
#[async_trait]
pub trait DiscoveryService: Send + Sync {
    /// All registered names starting with `prefix`, mapped to their endpoints.
    async fn list(&self, prefix: &str) -> Result<HashMap<String, String>, DiscoveryError>;

    /// Resolve one registered name to its endpoint.
    async fn lookup(&self, name: &str) -> Result<String, DiscoveryError>;
}

/// Errors from the discovery layer.
///
/// `Unreachable` concerns the whole registry, not a single node.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Discovery service unreachable: {0}")]
    Unreachable(String),

    #[error("Name not registered: {0}")]
    NotFound(String),

    #[error("Discovery service error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Invalid static node entry: {0}")]
    InvalidEntry(String),
}

impl From<reqwest::Error> for DiscoveryError {
    fn from(e: reqwest::Error) -> Self {
        Self::Unreachable(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// HTTP discovery client
// ---------------------------------------------------------------------------

/// Discovery service reached over HTTP.
///
/// * `GET {base}/names?prefix=node.` -> `{"node.worker01": "http://..."}`
/// * `GET {base}/names/{name}`       -> `{"endpoint": "http://..."}`
pub struct HttpDiscoveryClient {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    endpoint: String,
}

impl HttpDiscoveryClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Reuse an existing [`reqwest::Client`] for connection pooling.
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, DiscoveryError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(DiscoveryError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl DiscoveryService for HttpDiscoveryClient {
    async fn list(&self, prefix: &str) -> Result<HashMap<String, String>, DiscoveryError> {
        let response = self
            .client
            .get(format!("{}/names", self.base_url))
            .query(&[("prefix", prefix)])
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<HashMap<String, String>>().await?)
    }

    async fn lookup(&self, name: &str) -> Result<String, DiscoveryError> {
        let response = self
            .client
            .get(format!("{}/names/{}", self.base_url, name))
            .send()
            .await?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(DiscoveryError::NotFound(name.to_string()));
        }
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<LookupResponse>().await?.endpoint)
    }
}

// ---------------------------------------------------------------------------
// Static discovery
// ---------------------------------------------------------------------------

/// Fixed name -> endpoint table, for deployments without a naming service.
#[derive(Debug, Clone, Default)]
pub struct StaticDiscovery {
    entries: HashMap<String, String>,
}

impl StaticDiscovery {
    pub fn new(entries: HashMap<String, String>) -> Self {
        Self { entries }
    }

    /// Parse a comma-separated `node_id=endpoint` list, registering each
    /// node under `{prefix}{node_id}`.
    pub fn parse(spec: &str, prefix: &str) -> Result<Self, DiscoveryError> {
        let mut entries = HashMap::new();
        for entry in spec.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (node_id, endpoint) = entry
                .split_once('=')
                .map(|(id, ep)| (id.trim(), ep.trim()))
                .filter(|(id, ep)| !id.is_empty() && !ep.is_empty())
                .ok_or_else(|| DiscoveryError::InvalidEntry(entry.to_string()))?;
            entries.insert(format!("{prefix}{node_id}"), endpoint.to_string());
        }
        Ok(Self { entries })
    }
}

#[async_trait]
impl DiscoveryService for StaticDiscovery {
    async fn list(&self, prefix: &str) -> Result<HashMap<String, String>, DiscoveryError> {
        Ok(self
            .entries
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(name, endpoint)| (name.clone(), endpoint.clone()))
            .collect())
    }

    async fn lookup(&self, name: &str) -> Result<String, DiscoveryError> {
        self.entries
            .get(name)
            .cloned()
            .ok_or_else(|| DiscoveryError::NotFound(name.to_string()))
    }
}

// ---------------------------------------------------------------------------
// NodeDirectory
// ---------------------------------------------------------------------------

/// Enumerates and resolves worker node endpoints by node id.
#[derive(Clone)]
pub struct NodeDirectory {
    service: Arc<dyn DiscoveryService>,
    prefix: String,
}

impl NodeDirectory {
    pub fn new(service: Arc<dyn DiscoveryService>, prefix: impl Into<String>) -> Self {
        Self {
            service,
            prefix: prefix.into(),
        }
    }

    /// All registered nodes as `(node_id, endpoint)`, sorted by node id.
    pub async fn enumerate(&self) -> Result<Vec<(String, String)>, DiscoveryError> {
        let registered = self.service.list(&self.prefix).await?;
        let mut nodes: Vec<(String, String)> = registered
            .into_iter()
            .filter_map(|(name, endpoint)| {
                name.strip_prefix(&self.prefix)
                    .filter(|id| !id.is_empty())
                    .map(|id| (id.to_string(), endpoint))
            })
            .collect();
        nodes.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(nodes)
    }

    /// Resolve a node id to its current endpoint.
    pub async fn resolve(&self, node_id: &str) -> Result<String, DiscoveryError> {
        self.service
            .lookup(&format!("{}{}", self.prefix, node_id))
            .await
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn directory(spec: &str) -> NodeDirectory {
        let discovery = StaticDiscovery::parse(spec, "node.").unwrap();
        NodeDirectory::new(Arc::new(discovery), "node.")
    }

    #[test]
    fn parse_registers_under_prefix() {
        let discovery = StaticDiscovery::parse("w1=http://a:1, w2=http://b:2", "node.").unwrap();
        assert_eq!(discovery.entries.len(), 2);
        assert_eq!(discovery.entries["node.w1"], "http://a:1");
    }

    #[test]
    fn parse_rejects_malformed_entry() {
        assert_matches!(
            StaticDiscovery::parse("w1", "node."),
            Err(DiscoveryError::InvalidEntry(_))
        );
        assert_matches!(
            StaticDiscovery::parse("=http://a:1", "node."),
            Err(DiscoveryError::InvalidEntry(_))
        );
    }

    #[test]
    fn parse_empty_spec_is_empty() {
        assert!(StaticDiscovery::parse("", "node.").unwrap().entries.is_empty());
    }

    #[tokio::test]
    async fn enumerate_strips_prefix_and_sorts() {
        let nodes = directory("w2=http://b:2,w1=http://a:1").enumerate().await.unwrap();
        assert_eq!(
            nodes,
            vec![
                ("w1".to_string(), "http://a:1".to_string()),
                ("w2".to_string(), "http://b:2".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn enumerate_ignores_foreign_names() {
        let mut entries = HashMap::new();
        entries.insert("node.w1".to_string(), "http://a:1".to_string());
        entries.insert("db.primary".to_string(), "tcp://db".to_string());
        let dir = NodeDirectory::new(Arc::new(StaticDiscovery::new(entries)), "node.");
        let nodes = dir.enumerate().await.unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].0, "w1");
    }

    #[tokio::test]
    async fn resolve_unknown_node_is_not_found() {
        let dir = directory("w1=http://a:1");
        assert_eq!(dir.resolve("w1").await.unwrap(), "http://a:1");
        assert_matches!(dir.resolve("w9").await, Err(DiscoveryError::NotFound(_)));
    }
}
