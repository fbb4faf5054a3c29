//! Authoritative in-process view of the worker nodes.
//!
//! [`NodeRegistry`] owns a single mutex over the node map.  The lock is only
//! held for map reads and writes: probes run against snapshots and their
//! outcomes are written back afterwards, so no network I/O ever happens
//! under the lock.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use pixfarm_core::types::Timestamp;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::discovery::{DiscoveryError, NodeDirectory};
use crate::node_api::{NodeApi, NodeStatusReport, ReportedState};

/// Health of a node as seen by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Active,
    Inactive,
    /// Known but never probed.
    Unknown,
}

/// A known worker node.
///
/// `active_job_count` is the node's own point-in-time report; it steers
/// balancing but never blocks dispatch.
#[derive(Debug, Clone, Serialize)]
pub struct Node {
    pub node_id: String,
    pub endpoint: String,
    pub status: NodeStatus,
    pub active_job_count: u32,
    pub max_capacity: u32,
    pub last_health_check: Option<Timestamp>,
    pub last_error: Option<String>,
    /// Bumped by out-of-band state changes; a probe that started before a
    /// bump must not overwrite it.
    #[serde(skip)]
    pub(crate) generation: u64,
}

impl Node {
    fn new(node_id: String, endpoint: String) -> Self {
        Self {
            node_id,
            endpoint,
            status: NodeStatus::Unknown,
            active_job_count: 0,
            max_capacity: 0,
            last_health_check: None,
            last_error: None,
            generation: 0,
        }
    }

    /// Fold a probe outcome into the node. Failed probes keep the last
    /// known counters.
    fn apply_probe(&mut self, outcome: Result<NodeStatusReport, String>, at: Timestamp) {
        let previous = self.status;
        self.last_health_check = Some(at);
        match outcome {
            Ok(report) => {
                self.status = NodeStatus::Active;
                self.active_job_count = report.active_job_count;
                self.max_capacity = report.capacity;
                self.last_error = None;
                if previous != NodeStatus::Active {
                    tracing::info!(
                        node_id = %self.node_id,
                        active_jobs = self.active_job_count,
                        capacity = self.max_capacity,
                        "Node is active",
                    );
                }
            }
            Err(error) => {
                self.status = NodeStatus::Inactive;
                if previous != NodeStatus::Inactive {
                    tracing::warn!(node_id = %self.node_id, error = %error, "Node is not responding");
                }
                self.last_error = Some(error);
            }
        }
    }
}

/// Concurrency-safe registry of known nodes.
pub struct NodeRegistry {
    nodes: Mutex<HashMap<String, Node>>,
    directory: NodeDirectory,
    api: Arc<dyn NodeApi>,
    probe_timeout: Duration,
}

impl NodeRegistry {
    pub fn new(directory: NodeDirectory, api: Arc<dyn NodeApi>, probe_timeout: Duration) -> Self {
        Self {
            nodes: Mutex::new(HashMap::new()),
            directory,
            api,
            probe_timeout,
        }
    }

    /// Enumerate registered nodes, probe each, and insert or update them.
    ///
    /// Nodes that fail their probe are kept as `Inactive` so they remain
    /// candidates for later reconnection. Returns the number of known
    /// nodes. A discovery failure concerns the whole registry and leaves the
    /// map untouched.
    pub async fn discover(&self) -> Result<usize, DiscoveryError> {
        let found = self.directory.enumerate().await.map_err(|e| {
            tracing::error!(error = %e, "Node discovery failed");
            e
        })?;
        tracing::debug!(count = found.len(), "Discovered registered nodes");

        let generations: HashMap<String, u64> = {
            let nodes = self.nodes.lock().await;
            nodes
                .values()
                .map(|n| (n.node_id.clone(), n.generation))
                .collect()
        };

        let probes = join_all(found.into_iter().map(|(node_id, endpoint)| async move {
            let outcome = self.probe(&endpoint).await;
            (node_id, endpoint, outcome)
        }))
        .await;

        let now = Utc::now();
        let mut nodes = self.nodes.lock().await;
        for (node_id, endpoint, outcome) in probes {
            let node = nodes
                .entry(node_id.clone())
                .or_insert_with(|| Node::new(node_id, endpoint.clone()));
            if generations
                .get(&node.node_id)
                .is_some_and(|generation| *generation != node.generation)
            {
                tracing::debug!(node_id = %node.node_id, "Node changed during probe, keeping newer state");
                continue;
            }
            node.endpoint = endpoint;
            node.apply_probe(outcome, now);
        }
        Ok(nodes.len())
    }

    /// Re-probe every known node.
    ///
    /// Nodes not currently active are re-resolved through the directory
    /// first, since a restarted node may have registered a new endpoint.
    pub async fn refresh_all(&self) {
        let snapshot: Vec<(String, String, NodeStatus, u64)> = {
            let nodes = self.nodes.lock().await;
            nodes
                .values()
                .map(|n| (n.node_id.clone(), n.endpoint.clone(), n.status, n.generation))
                .collect()
        };

        let probes = join_all(snapshot.into_iter().map(|(node_id, endpoint, status, generation)| async move {
            let endpoint = if status == NodeStatus::Active {
                endpoint
            } else {
                match self.directory.resolve(&node_id).await {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        tracing::debug!(node_id = %node_id, error = %e, "Could not re-resolve node");
                        endpoint
                    }
                }
            };
            let outcome = self.probe(&endpoint).await;
            (node_id, endpoint, generation, outcome)
        }))
        .await;

        let now = Utc::now();
        let mut nodes = self.nodes.lock().await;
        for (node_id, endpoint, generation, outcome) in probes {
            let Some(node) = nodes.get_mut(&node_id) else {
                continue;
            };
            if node.generation != generation {
                tracing::debug!(node_id = %node_id, "Node changed during probe, keeping newer state");
                continue;
            }
            node.endpoint = endpoint;
            node.apply_probe(outcome, now);
        }
    }

    /// Snapshot of the currently active nodes, sorted by node id.
    pub async fn list_active(&self) -> Vec<Node> {
        let mut active: Vec<Node> = self
            .nodes
            .lock()
            .await
            .values()
            .filter(|n| n.status == NodeStatus::Active)
            .cloned()
            .collect();
        active.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        active
    }

    /// Snapshot of every known node, sorted by node id.
    pub async fn list_all(&self) -> Vec<Node> {
        let mut all: Vec<Node> = self.nodes.lock().await.values().cloned().collect();
        all.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        all
    }

    pub async fn get(&self, node_id: &str) -> Option<Node> {
        self.nodes.lock().await.get(node_id).cloned()
    }

    /// Mark a node inactive after a dispatch failure, without waiting for
    /// the next probe. Returns `false` for unknown nodes.
    pub async fn mark_inactive(&self, node_id: &str, reason: &str) -> bool {
        let mut nodes = self.nodes.lock().await;
        match nodes.get_mut(node_id) {
            Some(node) => {
                if node.status != NodeStatus::Inactive {
                    tracing::warn!(node_id, reason, "Marking node inactive");
                }
                node.status = NodeStatus::Inactive;
                node.last_error = Some(reason.to_string());
                node.generation += 1;
                true
            }
            None => false,
        }
    }

    /// Liveness check through the node's `ping` capability. Does not change
    /// the node's recorded state.
    pub async fn ping(&self, node_id: &str) -> bool {
        let Some(endpoint) = self.get(node_id).await.map(|n| n.endpoint) else {
            return false;
        };
        match tokio::time::timeout(self.probe_timeout, self.api.ping(&endpoint)).await {
            Ok(Ok(response)) => response.active,
            Ok(Err(e)) => {
                tracing::debug!(node_id, error = %e, "Ping failed");
                false
            }
            Err(_) => false,
        }
    }

    /// Spawn a background task that re-runs [`discover`](Self::discover)
    /// every `interval` until `cancel` fires.
    pub fn spawn_monitor(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            tracing::info!(
                interval_ms = interval.as_millis() as u64,
                "Node discovery monitor started",
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::info!("Node discovery monitor shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        // Failures are logged inside discover().
                        let _ = self.discover().await;
                    }
                }
            }
        })
    }

    /// Health probe via `obtain_status`, bounded by the probe timeout.
    async fn probe(&self, endpoint: &str) -> Result<NodeStatusReport, String> {
        match tokio::time::timeout(self.probe_timeout, self.api.obtain_status(endpoint)).await {
            Ok(Ok(report)) if report.status == ReportedState::Active => Ok(report),
            Ok(Ok(report)) => Err(format!("node reports state {:?}", report.status)),
            Ok(Err(e)) => Err(e.to_string()),
            Err(_) => Err(format!(
                "status probe timed out after {}s",
                self.probe_timeout.as_secs_f64()
            )),
        }
    }
}
