#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pixfarm_core::transform::TransformStep;
use pixfarm_core::types::{DbId, Timestamp};
use pixfarm_db::models::batch::Batch;
use pixfarm_db::models::job::{Job, NewJob};
use pixfarm_orchestrator::config::OrchestratorConfig;
use pixfarm_orchestrator::coordinator::BatchCoordinator;
use pixfarm_orchestrator::events::BatchEvent;
use pixfarm_orchestrator::registry::NodeRegistry;
use pixfarm_orchestrator::storage::LocalArtifactStorage;
use pixfarm_orchestrator::store::{InMemoryJobStore, JobStore, StoreError};
use pixfarm_orchestrator::test_support::StubCluster;
use tokio::sync::broadcast;

pub use pixfarm_orchestrator::test_support::ProcessBehavior;

pub const OWNER: i64 = 7;

// ---------------------------------------------------------------------------
// Slow store
// ---------------------------------------------------------------------------

/// In-memory store whose job inserts take `delay` each.
pub struct SlowInsertStore {
    inner: Arc<InMemoryJobStore>,
    delay: Duration,
}

#[async_trait]
impl JobStore for SlowInsertStore {
    async fn insert_batch(&self, batch: &Batch) -> Result<(), StoreError> {
        self.inner.insert_batch(batch).await
    }

    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.insert_job(job).await
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        self.inner.update_job(job).await
    }

    async fn mark_batch_finished(
        &self,
        batch_id: &str,
        finished_at: Timestamp,
    ) -> Result<(), StoreError> {
        self.inner.mark_batch_finished(batch_id, finished_at).await
    }

    async fn find_batch(&self, batch_id: &str, owner_id: DbId) -> Result<Option<Batch>, StoreError> {
        self.inner.find_batch(batch_id, owner_id).await
    }

    async fn jobs_for_batch(&self, batch_id: &str, owner_id: DbId) -> Result<Vec<Job>, StoreError> {
        self.inner.jobs_for_batch(batch_id, owner_id).await
    }

    async fn list_batches(
        &self,
        owner_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Batch>, StoreError> {
        self.inner.list_batches(owner_id, limit, offset).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub cluster: StubCluster,
    pub registry: Arc<NodeRegistry>,
    pub store: Arc<InMemoryJobStore>,
    pub coordinator: BatchCoordinator,
}

pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_workers: 4,
        dispatch_timeout_secs: 30,
        batch_deadline_secs: 30,
        probe_timeout_secs: 1,
        ..OrchestratorConfig::default()
    }
}

/// Build a coordinator over `cluster`, run discovery once, and return the
/// harness. Inputs and results live in a temporary directory.
pub async fn harness(cluster: StubCluster, config: OrchestratorConfig) -> Harness {
    build(cluster, config, None).await
}

/// Like [`harness`], but every job insert is delayed by `delay`.
pub async fn harness_with_slow_inserts(
    cluster: StubCluster,
    config: OrchestratorConfig,
    delay: Duration,
) -> Harness {
    build(cluster, config, Some(delay)).await
}

async fn build(cluster: StubCluster, config: OrchestratorConfig, insert_delay: Option<Duration>) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let registry = Arc::new(NodeRegistry::new(
        cluster.directory(),
        cluster.api(),
        config.probe_timeout(),
    ));
    registry.discover().await.unwrap();

    let store = Arc::new(InMemoryJobStore::new());
    let job_store: Arc<dyn JobStore> = match insert_delay {
        Some(delay) => Arc::new(SlowInsertStore {
            inner: store.clone(),
            delay,
        }),
        None => store.clone(),
    };
    let storage = Arc::new(LocalArtifactStorage::new(
        dir.path().join("uploads"),
        dir.path().join("results"),
    ));
    let coordinator = BatchCoordinator::new(
        &config,
        registry.clone(),
        cluster.api(),
        job_store,
        storage,
    );

    Harness {
        dir,
        cluster,
        registry,
        store,
        coordinator,
    }
}

impl Harness {
    /// Write an input artifact and describe a job for it.
    pub fn input(&self, name: &str) -> NewJob {
        let path = self.upload_path(name);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, format!("pixels of {name}")).unwrap();
        NewJob {
            original_filename: name.to_string(),
            source_ref: path.to_string_lossy().into_owned(),
            transforms: vec![
                TransformStep::new("resize", serde_json::json!({"width": 64, "height": 64})),
                TransformStep::new("grayscale", serde_json::json!({})),
            ],
            input_size_bytes: None,
        }
    }

    pub fn upload_path(&self, name: &str) -> PathBuf {
        self.dir.path().join("uploads").join(name)
    }

    pub fn results_dir(&self, batch_id: &str) -> PathBuf {
        self.dir.path().join("results").join(format!("batch_{batch_id}"))
    }
}

/// Wait for the `BatchFinished` event of `batch_id`, returning every event
/// of that batch seen on the way, the `BatchFinished` one last.
pub async fn collect_until_finished(
    rx: &mut broadcast::Receiver<BatchEvent>,
    batch_id: &str,
) -> Vec<BatchEvent> {
    tokio::time::timeout(Duration::from_secs(10), async {
        let mut seen = Vec::new();
        loop {
            match rx.recv().await {
                Ok(event) if event.batch_id() == batch_id => {
                    let done = matches!(event, BatchEvent::BatchFinished { .. });
                    seen.push(event);
                    if done {
                        return seen;
                    }
                }
                Ok(_) => continue,
                Err(e) => panic!("event stream ended: {e}"),
            }
        }
    })
    .await
    .expect("batch did not finish in time")
}

/// Wait for the `BatchFinished` event of `batch_id`.
pub async fn wait_finished(rx: &mut broadcast::Receiver<BatchEvent>, batch_id: &str) -> BatchEvent {
    collect_until_finished(rx, batch_id)
        .await
        .pop()
        .expect("finished event")
}
