pub mod batches;
pub mod cluster;
