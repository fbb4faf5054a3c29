//! Least-loaded node selection.

use std::sync::Arc;

use pixfarm_core::batch::round2;
use serde::Serialize;

use crate::registry::{Node, NodeRegistry, NodeStatus};

/// Aggregate view of the cluster for observability.
///
/// Load and capacity figures only count active nodes, whose counters come
/// from the probe that just ran.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub total_nodes: usize,
    pub active_nodes: usize,
    pub inactive_nodes: usize,
    pub jobs_in_progress: u64,
    pub total_capacity: u64,
    pub used_capacity: u64,
    pub available_capacity: u64,
    /// `used / total * 100`, two decimals; `0.0` without capacity.
    pub usage_percent: f64,
    pub nodes: Vec<Node>,
}

impl ClusterSummary {
    fn from_nodes(nodes: Vec<Node>) -> Self {
        let active: Vec<&Node> = nodes
            .iter()
            .filter(|n| n.status == NodeStatus::Active)
            .collect();
        let used_capacity: u64 = active.iter().map(|n| u64::from(n.active_job_count)).sum();
        let total_capacity: u64 = active.iter().map(|n| u64::from(n.max_capacity)).sum();
        let usage_percent = if total_capacity > 0 {
            round2(used_capacity as f64 / total_capacity as f64 * 100.0)
        } else {
            0.0
        };

        Self {
            total_nodes: nodes.len(),
            active_nodes: active.len(),
            inactive_nodes: nodes.len() - active.len(),
            jobs_in_progress: used_capacity,
            total_capacity,
            used_capacity,
            available_capacity: total_capacity.saturating_sub(used_capacity),
            usage_percent,
            nodes,
        }
    }
}

/// Picks one node per job from the registry.
#[derive(Clone)]
pub struct LoadBalancer {
    registry: Arc<NodeRegistry>,
}

impl LoadBalancer {
    pub fn new(registry: Arc<NodeRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    /// Refresh the registry, then return the active node with the fewest
    /// active jobs. Ties go to the lexicographically smallest node id.
    ///
    /// `None` means no node is eligible right now; it is a normal outcome,
    /// not a fault.
    pub async fn select_node(&self) -> Option<Node> {
        self.registry.refresh_all().await;
        let chosen = Self::least_loaded(self.registry.list_active().await);
        match &chosen {
            Some(node) => tracing::debug!(
                node_id = %node.node_id,
                active_jobs = node.active_job_count,
                capacity = node.max_capacity,
                "Selected node",
            ),
            None => tracing::warn!("No active node available"),
        }
        chosen
    }

    /// Refresh the registry and aggregate every known node.
    pub async fn cluster_summary(&self) -> ClusterSummary {
        self.registry.refresh_all().await;
        ClusterSummary::from_nodes(self.registry.list_all().await)
    }

    fn least_loaded(candidates: Vec<Node>) -> Option<Node> {
        candidates
            .into_iter()
            .filter(|n| n.status == NodeStatus::Active)
            .min_by(|a, b| {
                a.active_job_count
                    .cmp(&b.active_job_count)
                    .then_with(|| a.node_id.cmp(&b.node_id))
            })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::test_support::StubCluster;

    async fn balancer(cluster: &StubCluster) -> LoadBalancer {
        let registry = Arc::new(cluster.registry(Duration::from_millis(200)));
        registry.discover().await.unwrap();
        LoadBalancer::new(registry)
    }

    #[tokio::test]
    async fn picks_least_loaded_node() {
        let cluster = StubCluster::new();
        cluster.add_node("a", 4, 5);
        cluster.add_node("b", 1, 5);
        cluster.add_node("c", 3, 5);
        let balancer = balancer(&cluster).await;

        assert_eq!(balancer.select_node().await.unwrap().node_id, "b");
    }

    #[tokio::test]
    async fn tie_breaks_on_smallest_node_id() {
        let cluster = StubCluster::new();
        cluster.add_node("zeta", 2, 5);
        cluster.add_node("alpha", 2, 5);
        cluster.add_node("mid", 2, 5);
        let balancer = balancer(&cluster).await;

        let first = balancer.select_node().await.unwrap();
        let second = balancer.select_node().await.unwrap();
        assert_eq!(first.node_id, "alpha");
        assert_eq!(second.node_id, first.node_id);
    }

    #[tokio::test]
    async fn never_returns_inactive_node() {
        let cluster = StubCluster::new();
        cluster.add_node("a", 0, 5).set_reachable(false);
        cluster.add_node("b", 9, 5);
        let balancer = balancer(&cluster).await;

        let chosen = balancer.select_node().await.unwrap();
        assert_eq!(chosen.node_id, "b");
        assert_eq!(chosen.status, NodeStatus::Active);
    }

    #[tokio::test]
    async fn empty_active_set_yields_none() {
        let cluster = StubCluster::new();
        cluster.add_node("a", 0, 5).set_reachable(false);
        let balancer = balancer(&cluster).await;

        assert!(balancer.select_node().await.is_none());
    }

    #[tokio::test]
    async fn marked_inactive_node_is_skipped_until_probe_fails_too() {
        let cluster = StubCluster::new();
        let a = cluster.add_node("a", 0, 5);
        cluster.add_node("b", 3, 5);
        let balancer = balancer(&cluster).await;

        // The node keeps failing, so the next probe does not revive it.
        a.set_reachable(false);
        balancer.registry().mark_inactive("a", "connection reset").await;
        for _ in 0..3 {
            assert_eq!(balancer.select_node().await.unwrap().node_id, "b");
        }

        // A successful probe flips it back.
        a.set_reachable(true);
        assert_eq!(balancer.select_node().await.unwrap().node_id, "a");
    }

    #[tokio::test]
    async fn summary_aggregates_active_capacity() {
        let cluster = StubCluster::new();
        cluster.add_node("a", 2, 5);
        cluster.add_node("b", 1, 3);
        cluster.add_node("c", 0, 10).set_reachable(false);
        let balancer = balancer(&cluster).await;

        let summary = balancer.cluster_summary().await;
        assert_eq!(summary.total_nodes, 3);
        assert_eq!(summary.active_nodes, 2);
        assert_eq!(summary.inactive_nodes, 1);
        assert_eq!(summary.total_capacity, 8);
        assert_eq!(summary.used_capacity, 3);
        assert_eq!(summary.available_capacity, 5);
        assert_eq!(summary.jobs_in_progress, 3);
        assert_eq!(summary.usage_percent, 37.5);
        assert_eq!(summary.nodes.len(), 3);
    }

    #[test]
    fn summary_of_empty_cluster_is_zero() {
        let summary = ClusterSummary::from_nodes(Vec::new());
        assert_eq!(summary.total_nodes, 0);
        assert_eq!(summary.usage_percent, 0.0);
    }

    #[test]
    fn overloaded_node_reports_no_available_capacity() {
        let node = Node {
            node_id: "a".into(),
            endpoint: "stub://a".into(),
            status: NodeStatus::Active,
            active_job_count: 7,
            max_capacity: 5,
            last_health_check: None,
            last_error: None,
            generation: 0,
        };
        let summary = ClusterSummary::from_nodes(vec![node]);
        assert_eq!(summary.available_capacity, 0);
        assert_eq!(summary.usage_percent, 140.0);
    }
}
