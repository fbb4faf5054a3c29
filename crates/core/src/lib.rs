//! Domain types and pure functions shared by every pixfarm crate.
//!
//! Nothing in here performs I/O; the orchestrator and api crates build on
//! these definitions.

pub mod batch;
pub mod error;
pub mod transform;
pub mod types;
