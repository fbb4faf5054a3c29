mod batch_repo;
mod job_repo;

pub use batch_repo::BatchRepo;
pub use job_repo::JobRepo;
