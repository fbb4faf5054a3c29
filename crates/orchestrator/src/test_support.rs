//! In-process stand-ins for the discovery service and worker nodes.
//!
//! Shared by the unit tests and, through the `test-support` feature, the
//! integration tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::discovery::{DiscoveryError, DiscoveryService, NodeDirectory};
use crate::node_api::{
    NodeApi, NodeApiError, NodeStatusReport, PingResponse, ProcessRequest, ProcessResponse,
    ReportedState,
};
use crate::registry::NodeRegistry;

pub const PREFIX: &str = "node.";

#[derive(Debug, Clone)]
pub enum ProcessBehavior {
    /// Return the input payload as the result.
    Echo,
    Reject(String),
    /// Echo after sleeping.
    Delay(Duration),
    /// Go unreachable and fail the call at the transport level.
    Crash,
    /// Report success without a result payload.
    EmptyResult,
}

pub struct StubNode {
    load: AtomicU32,
    capacity: u32,
    reachable: AtomicBool,
    status_delay_ms: AtomicU64,
    behavior: Mutex<ProcessBehavior>,
    process_calls: AtomicUsize,
}

impl StubNode {
    pub fn set_reachable(&self, reachable: bool) -> &Self {
        self.reachable.store(reachable, Ordering::SeqCst);
        self
    }

    pub fn set_load(&self, load: u32) -> &Self {
        self.load.store(load, Ordering::SeqCst);
        self
    }

    pub fn set_status_delay(&self, delay: Duration) -> &Self {
        self.status_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
        self
    }

    pub fn set_behavior(&self, behavior: ProcessBehavior) -> &Self {
        *self.behavior.lock().unwrap() = behavior;
        self
    }

    pub fn process_calls(&self) -> usize {
        self.process_calls.load(Ordering::SeqCst)
    }

    fn check_reachable(&self, endpoint: &str) -> Result<(), NodeApiError> {
        if self.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(NodeApiError::Transport(format!("connection refused: {endpoint}")))
        }
    }
}

#[derive(Default)]
struct Inner {
    names: Mutex<HashMap<String, String>>,
    nodes: Mutex<HashMap<String, Arc<StubNode>>>,
    discovery_down: AtomicBool,
}

impl Inner {
    fn node(&self, endpoint: &str) -> Result<Arc<StubNode>, NodeApiError> {
        self.nodes
            .lock()
            .unwrap()
            .get(endpoint)
            .cloned()
            .ok_or_else(|| NodeApiError::Transport(format!("no route to {endpoint}")))
    }
}

/// A fake cluster: one discovery service plus any number of nodes.
#[derive(Clone, Default)]
pub struct StubCluster {
    inner: Arc<Inner>,
}

impl StubCluster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node reachable at `stub://{id}`.
    pub fn add_node(&self, id: &str, load: u32, capacity: u32) -> Arc<StubNode> {
        let endpoint = format!("stub://{id}");
        let node = Arc::new(StubNode {
            load: AtomicU32::new(load),
            capacity,
            reachable: AtomicBool::new(true),
            status_delay_ms: AtomicU64::new(0),
            behavior: Mutex::new(ProcessBehavior::Echo),
            process_calls: AtomicUsize::new(0),
        });
        self.inner
            .names
            .lock()
            .unwrap()
            .insert(format!("{PREFIX}{id}"), endpoint.clone());
        self.inner
            .nodes
            .lock()
            .unwrap()
            .insert(endpoint, Arc::clone(&node));
        node
    }

    pub fn set_discovery_reachable(&self, reachable: bool) {
        self.inner.discovery_down.store(!reachable, Ordering::SeqCst);
    }

    pub fn api(&self) -> Arc<dyn NodeApi> {
        self.inner.clone()
    }

    pub fn directory(&self) -> NodeDirectory {
        NodeDirectory::new(self.inner.clone(), PREFIX)
    }

    pub fn registry(&self, probe_timeout: Duration) -> NodeRegistry {
        NodeRegistry::new(self.directory(), self.api(), probe_timeout)
    }
}

#[async_trait]
impl DiscoveryService for Inner {
    async fn list(&self, prefix: &str) -> Result<HashMap<String, String>, DiscoveryError> {
        if self.discovery_down.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Unreachable("stub discovery down".into()));
        }
        Ok(self
            .names
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .map(|(n, e)| (n.clone(), e.clone()))
            .collect())
    }

    async fn lookup(&self, name: &str) -> Result<String, DiscoveryError> {
        if self.discovery_down.load(Ordering::SeqCst) {
            return Err(DiscoveryError::Unreachable("stub discovery down".into()));
        }
        self.names
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| DiscoveryError::NotFound(name.to_string()))
    }
}

#[async_trait]
impl NodeApi for Inner {
    async fn ping(&self, endpoint: &str) -> Result<PingResponse, NodeApiError> {
        let node = self.node(endpoint)?;
        node.check_reachable(endpoint)?;
        Ok(PingResponse { active: true })
    }

    async fn obtain_status(&self, endpoint: &str) -> Result<NodeStatusReport, NodeApiError> {
        let node = self.node(endpoint)?;
        let delay = node.status_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        node.check_reachable(endpoint)?;
        Ok(NodeStatusReport {
            status: ReportedState::Active,
            active_job_count: node.load.load(Ordering::SeqCst),
            capacity: node.capacity,
        })
    }

    async fn process_with_payload(
        &self,
        endpoint: &str,
        request: &ProcessRequest,
    ) -> Result<ProcessResponse, NodeApiError> {
        let node = self.node(endpoint)?;
        node.process_calls.fetch_add(1, Ordering::SeqCst);
        node.check_reachable(endpoint)?;

        let behavior = node.behavior.lock().unwrap().clone();
        let echo = ProcessResponse {
            success: true,
            encoded_result: Some(request.encoded_payload.clone()),
            error: None,
            duration: Some(0.01),
        };
        match behavior {
            ProcessBehavior::Echo => Ok(echo),
            ProcessBehavior::Delay(delay) => {
                tokio::time::sleep(delay).await;
                Ok(echo)
            }
            ProcessBehavior::Reject(message) => Ok(ProcessResponse {
                success: false,
                error: Some(message),
                ..Default::default()
            }),
            ProcessBehavior::Crash => {
                node.set_reachable(false);
                Err(NodeApiError::Transport("connection reset by peer".into()))
            }
            ProcessBehavior::EmptyResult => Ok(ProcessResponse {
                success: true,
                ..Default::default()
            }),
        }
    }
}
