//! Node orchestration and batch dispatch.
//!
//! Control flow for one job:
//! [`BatchCoordinator`](coordinator::BatchCoordinator) ->
//! [`LoadBalancer`](balancer::LoadBalancer) ->
//! [`NodeRegistry`](registry::NodeRegistry) (read) ->
//! [`RemoteJobClient`](remote::RemoteJobClient) ->
//! `NodeRegistry` (write-back on failure) -> coordinator (aggregate).

pub mod balancer;
pub mod config;
pub mod coordinator;
pub mod discovery;
pub mod error;
pub mod events;
pub mod node_api;
pub mod registry;
pub mod remote;
pub mod storage;
pub mod store;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;
