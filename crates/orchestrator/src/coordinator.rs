//! Batch coordinator.
//!
//! [`BatchCoordinator`] turns a submitted batch into independent jobs,
//! persists them, and fans them out to nodes in the background.  Every batch
//! runs in its own task that owns a [`JoinSet`] of job tasks bounded by the
//! batch deadline; a coordinator-wide [`Semaphore`] caps how many jobs are
//! dispatched at once across all batches.
//!
//! While a batch is cached, the in-memory copy of its jobs is the source of
//! truth and the [`JobStore`] receives every transition as a best-effort
//! write.  Queries fall back to the store once a batch has been evicted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use pixfarm_core::batch::{validate_batch_size, validate_input_size, BatchCounts, BatchStatus};
use pixfarm_core::error::CoreError;
use pixfarm_core::transform::validate_transform_spec;
use pixfarm_core::types::{DbId, Timestamp};
use pixfarm_db::models::batch::Batch;
use pixfarm_db::models::job::{Job, NewJob};
use pixfarm_db::models::status::JobStatus;
use serde::Serialize;
use tokio::sync::{broadcast, RwLock, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::balancer::{ClusterSummary, LoadBalancer};
use crate::config::OrchestratorConfig;
use crate::error::{CoordinatorError, DispatchError};
use crate::events::{BatchEvent, DEFAULT_EVENT_CAPACITY};
use crate::node_api::NodeApi;
use crate::registry::{Node, NodeRegistry};
use crate::remote::{DispatchSuccess, RemoteJobClient};
use crate::storage::ArtifactStorage;
use crate::store::JobStore;

// ---------------------------------------------------------------------------
// Caller-facing reports
// ---------------------------------------------------------------------------

/// Returned by [`BatchCoordinator::submit_batch`] before any job runs.
#[derive(Debug, Clone, Serialize)]
pub struct BatchSubmission {
    pub batch_id: String,
    pub job_ids: Vec<String>,
}

/// Point-in-time batch status, always derived from job states.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchStatusReport {
    pub batch_id: String,
    pub status: BatchStatus,
    #[serde(flatten)]
    pub counts: BatchCounts,
    pub progress_percent: f64,
    pub created_at: Timestamp,
    pub finished_at: Option<Timestamp>,
}

/// One job as shown in a batch detail listing.
#[derive(Debug, Clone, Serialize)]
pub struct JobDetail {
    pub job_id: String,
    pub seq: i32,
    pub original_filename: String,
    pub status: JobStatus,
    pub assigned_node_id: Option<String>,
    pub result_ref: Option<String>,
    pub error_message: Option<String>,
    pub failure_kind: Option<String>,
    pub transform_count: usize,
    pub input_size_bytes: i64,
    pub result_size_bytes: Option<i64>,
    pub duration_seconds: Option<f64>,
    pub created_at: Timestamp,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl From<&Job> for JobDetail {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            seq: job.seq,
            original_filename: job.original_filename.clone(),
            status: job.status(),
            assigned_node_id: job.assigned_node_id.clone(),
            result_ref: job.result_ref.clone(),
            error_message: job.error_message.clone(),
            failure_kind: job.failure_kind.clone(),
            transform_count: job.transforms().len(),
            input_size_bytes: job.input_size_bytes,
            result_size_bytes: job.result_size_bytes,
            duration_seconds: job.duration_seconds,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchDetail {
    #[serde(flatten)]
    pub summary: BatchStatusReport,
    /// Jobs in creation order.
    pub jobs: Vec<JobDetail>,
}

fn count_jobs<'a>(jobs: impl IntoIterator<Item = &'a Job>) -> BatchCounts {
    let mut counts = BatchCounts::default();
    for job in jobs {
        counts.total += 1;
        match job.status() {
            JobStatus::Pending => counts.pending += 1,
            JobStatus::Processing => counts.processing += 1,
            JobStatus::Completed => counts.completed += 1,
            JobStatus::Failed => counts.failed += 1,
        }
    }
    counts
}

fn status_report(batch: &Batch, jobs: &[Job]) -> BatchStatusReport {
    let counts = count_jobs(jobs);
    BatchStatusReport {
        batch_id: batch.id.clone(),
        status: counts.status(),
        counts,
        progress_percent: counts.progress_percent(),
        created_at: batch.created_at,
        finished_at: batch.finished_at,
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

/// Cached state of one batch. `jobs[seq]` is the job with that sequence.
struct BatchState {
    batch: Batch,
    jobs: Vec<Job>,
    /// Monotonic finish time, drives cache eviction.
    finished: Option<Instant>,
}

struct Shared {
    store: Arc<dyn JobStore>,
    storage: Arc<dyn ArtifactStorage>,
    balancer: LoadBalancer,
    client: RemoteJobClient,
    workers: Arc<Semaphore>,
    batches: RwLock<HashMap<String, BatchState>>,
    events: broadcast::Sender<BatchEvent>,
    tracker: TaskTracker,
    /// `true` once shutdown began. Submissions hold a read guard until their
    /// batch is on the tracker; shutdown takes the write guard to close.
    closed: RwLock<bool>,
    batch_deadline: Duration,
    retention: Duration,
}

/// Accepts batches, dispatches their jobs, and answers status queries.
///
/// Cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct BatchCoordinator {
    shared: Arc<Shared>,
}

impl BatchCoordinator {
    pub fn new(
        config: &OrchestratorConfig,
        registry: Arc<NodeRegistry>,
        api: Arc<dyn NodeApi>,
        store: Arc<dyn JobStore>,
        storage: Arc<dyn ArtifactStorage>,
    ) -> Self {
        let (events, _) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        let client = RemoteJobClient::new(api, Arc::clone(&storage), config.dispatch_timeout());
        Self {
            shared: Arc::new(Shared {
                store,
                storage,
                balancer: LoadBalancer::new(registry),
                client,
                workers: Arc::new(Semaphore::new(config.max_workers.max(1))),
                batches: RwLock::new(HashMap::new()),
                events,
                tracker: TaskTracker::new(),
                closed: RwLock::new(false),
                batch_deadline: config.batch_deadline(),
                retention: config.finished_batch_retention(),
            }),
        }
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        self.shared.balancer.registry()
    }

    /// Subscribe to job and batch lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.shared.events.subscribe()
    }

    /// Validate and persist a batch, then dispatch its jobs in the
    /// background. Returns as soon as the records exist.
    ///
    /// Validation happens before any record is created.
    pub async fn submit_batch(
        &self,
        owner_id: DbId,
        jobs: Vec<NewJob>,
    ) -> Result<BatchSubmission, CoordinatorError> {
        let shared = &self.shared;
        let closed = shared.closed.read().await;
        if *closed {
            return Err(CoordinatorError::ShuttingDown);
        }

        validate_batch_size(jobs.len())?;
        for (i, job) in jobs.iter().enumerate() {
            if job.source_ref.trim().is_empty() {
                return Err(CoreError::Validation(format!("Job {i} has an empty source_ref")).into());
            }
            let label = if job.original_filename.is_empty() {
                format!("job {i}")
            } else {
                job.original_filename.clone()
            };
            if !shared.storage.is_input_ref(&job.source_ref) {
                return Err(CoreError::Validation(format!(
                    "{label}: source_ref must point inside the uploads directory"
                ))
                .into());
            }
            validate_input_size(&label, job.input_size_bytes)?;
            validate_transform_spec(&label, &job.transforms)?;
        }

        self.evict_finished().await;

        let batch_id = uuid::Uuid::now_v7().to_string();
        let created_at = Utc::now();
        let batch = Batch {
            id: batch_id.clone(),
            owner_id,
            job_count: jobs.len() as i32,
            created_at,
            finished_at: None,
        };
        let jobs: Vec<Job> = jobs
            .into_iter()
            .enumerate()
            .map(|(seq, input)| Job::new_pending(&batch_id, seq as i32, owner_id, input, created_at))
            .collect();

        shared.store.insert_batch(&batch).await?;
        for job in &jobs {
            shared.store.insert_job(job).await?;
        }

        let job_ids: Vec<String> = jobs.iter().map(|j| j.id.clone()).collect();
        let job_count = jobs.len();
        shared.batches.write().await.insert(
            batch_id.clone(),
            BatchState {
                batch,
                jobs,
                finished: None,
            },
        );

        shared
            .tracker
            .spawn(Arc::clone(shared).run_batch(batch_id.clone(), job_count));
        drop(closed);

        tracing::info!(batch_id = %batch_id, owner_id, jobs = job_count, "Batch submitted");
        Ok(BatchSubmission { batch_id, job_ids })
    }

    /// Counts per state and progress for one of the owner's batches.
    ///
    /// A batch owned by someone else is reported as not found.
    pub async fn get_batch_status(
        &self,
        batch_id: &str,
        owner_id: DbId,
    ) -> Result<BatchStatusReport, CoordinatorError> {
        let (batch, jobs) = self.resolve(batch_id, owner_id).await?;
        Ok(status_report(&batch, &jobs))
    }

    /// Status plus the full job list in creation order.
    pub async fn get_batch_detail(
        &self,
        batch_id: &str,
        owner_id: DbId,
    ) -> Result<BatchDetail, CoordinatorError> {
        let (batch, jobs) = self.resolve(batch_id, owner_id).await?;
        Ok(BatchDetail {
            summary: status_report(&batch, &jobs),
            jobs: jobs.iter().map(JobDetail::from).collect(),
        })
    }

    /// The owner's batches, newest first.
    pub async fn list_history(
        &self,
        owner_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<BatchStatusReport>, CoordinatorError> {
        let batches = self
            .shared
            .store
            .list_batches(owner_id, limit, offset)
            .await?;

        let mut history = Vec::with_capacity(batches.len());
        for batch in batches {
            let cached = {
                let cache = self.shared.batches.read().await;
                cache
                    .get(&batch.id)
                    .map(|state| status_report(&state.batch, &state.jobs))
            };
            let report = match cached {
                Some(report) => report,
                None => {
                    let jobs = self
                        .shared
                        .store
                        .jobs_for_batch(&batch.id, owner_id)
                        .await?;
                    status_report(&batch, &jobs)
                }
            };
            history.push(report);
        }
        Ok(history)
    }

    pub async fn cluster_summary(&self) -> ClusterSummary {
        self.shared.balancer.cluster_summary().await
    }

    /// Drop finished batches older than the retention period from the
    /// cache. Returns how many were evicted.
    pub async fn evict_finished(&self) -> usize {
        let retention = self.shared.retention;
        let mut cache = self.shared.batches.write().await;
        let before = cache.len();
        cache.retain(|_, state| {
            state
                .finished
                .map_or(true, |finished| finished.elapsed() < retention)
        });
        let evicted = before - cache.len();
        if evicted > 0 {
            tracing::debug!(evicted, "Evicted finished batches from cache");
        }
        evicted
    }

    /// Stop accepting batches and wait for every running batch to finish.
    ///
    /// Submissions already past the shutdown check complete first and their
    /// batches are drained with the rest.
    pub async fn shutdown(&self) {
        *self.shared.closed.write().await = true;
        self.shared.tracker.close();
        tracing::info!(
            running = self.shared.tracker.len(),
            "Batch coordinator draining",
        );
        self.shared.tracker.wait().await;
        tracing::info!("Batch coordinator stopped");
    }

    /// Resolve a batch and its jobs from the cache, else from the store.
    async fn resolve(
        &self,
        batch_id: &str,
        owner_id: DbId,
    ) -> Result<(Batch, Vec<Job>), CoordinatorError> {
        {
            let cache = self.shared.batches.read().await;
            if let Some(state) = cache.get(batch_id) {
                if state.batch.owner_id != owner_id {
                    return Err(CoordinatorError::batch_not_found(batch_id));
                }
                return Ok((state.batch.clone(), state.jobs.clone()));
            }
        }

        let store = &self.shared.store;
        let batch = store.find_batch(batch_id, owner_id).await?;
        let jobs = store.jobs_for_batch(batch_id, owner_id).await?;
        match batch {
            Some(batch) => Ok((batch, jobs)),
            // Orphaned job rows still describe a batch.
            None if !jobs.is_empty() => {
                let batch = Batch {
                    id: batch_id.to_string(),
                    owner_id,
                    job_count: jobs.len() as i32,
                    created_at: jobs.iter().map(|j| j.created_at).min().unwrap_or_else(Utc::now),
                    finished_at: None,
                };
                Ok((batch, jobs))
            }
            None => Err(CoordinatorError::batch_not_found(batch_id)),
        }
    }
}

// ---------------------------------------------------------------------------
// Background execution
// ---------------------------------------------------------------------------

impl Shared {
    /// Fan the batch's jobs out and wait for them until the deadline.
    async fn run_batch(self: Arc<Self>, batch_id: String, job_count: usize) {
        let cancel = CancellationToken::new();
        let mut set = JoinSet::new();
        for seq in 0..job_count {
            let job_task = Arc::clone(&self).run_job(batch_id.clone(), seq, cancel.clone());
            set.spawn(self.tracker.track_future(job_task));
        }

        let drained = tokio::time::timeout(self.batch_deadline, async {
            while let Some(joined) = set.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(batch_id = %batch_id, error = %e, "Job task aborted");
                }
            }
        })
        .await;

        if drained.is_err() {
            // Queued jobs give up; in-flight calls are abandoned, not aborted.
            cancel.cancel();
            set.detach_all();
            self.expire_unresolved(&batch_id).await;
        }
        self.finish_batch(&batch_id).await;
    }

    async fn run_job(self: Arc<Self>, batch_id: String, seq: usize, cancel: CancellationToken) {
        let _permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            permit = Arc::clone(&self.workers).acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
        };
        if cancel.is_cancelled() {
            return;
        }

        let Some(job) = self
            .transition(&batch_id, seq, |job| {
                job.status_id = JobStatus::Processing.id();
                job.started_at = Some(Utc::now());
            })
            .await
        else {
            return;
        };

        let Some(node) = self.balancer.select_node().await else {
            self.fail_job(&batch_id, seq, None, DispatchError::NodeUnavailable)
                .await;
            return;
        };

        let result_ref = self
            .storage
            .result_ref_for(&batch_id, &job.original_filename);
        let Some(job) = self
            .transition(&batch_id, seq, |job| {
                job.assigned_node_id = Some(node.node_id.clone());
            })
            .await
        else {
            return;
        };
        self.emit(BatchEvent::JobStarted {
            batch_id: batch_id.clone(),
            job_id: job.id.clone(),
            node_id: node.node_id.clone(),
        });

        match self.client.dispatch(&node, &job, &result_ref).await {
            Ok(success) => self.complete_job(&batch_id, seq, &node, success).await,
            Err(e) => {
                if e.kind().is_node_fault() {
                    self.balancer
                        .registry()
                        .mark_inactive(&node.node_id, &e.to_string())
                        .await;
                }
                self.fail_job(&batch_id, seq, Some(&node), e).await;
            }
        }
    }

    async fn complete_job(&self, batch_id: &str, seq: usize, node: &Node, success: DispatchSuccess) {
        let updated = self
            .transition(batch_id, seq, |job| {
                job.status_id = JobStatus::Completed.id();
                job.result_ref = Some(success.result_ref.clone());
                job.result_size_bytes = Some(success.result_size_bytes);
                job.duration_seconds = Some(success.duration_seconds);
                if job.input_size_bytes == 0 {
                    job.input_size_bytes = success.input_size_bytes;
                }
                job.completed_at = Some(Utc::now());
            })
            .await;

        let Some(job) = updated else {
            tracing::debug!(
                batch_id,
                node_id = %node.node_id,
                result_ref = %success.result_ref,
                "Discarding late result",
            );
            return;
        };

        tracing::info!(
            batch_id,
            job_id = %job.id,
            node_id = %node.node_id,
            duration_secs = success.duration_seconds,
            node_duration_secs = ?success.node_duration_seconds,
            "Job completed",
        );
        self.emit(BatchEvent::JobCompleted {
            batch_id: batch_id.to_string(),
            job_id: job.id.clone(),
            node_id: node.node_id.clone(),
            duration_seconds: success.duration_seconds,
        });

        if let Err(e) = self.storage.delete(&job.source_ref).await {
            tracing::warn!(job_id = %job.id, error = %e, "Failed to delete input artifact");
        }
    }

    async fn fail_job(&self, batch_id: &str, seq: usize, node: Option<&Node>, error: DispatchError) {
        let kind = error.kind();
        let message = error.to_string();
        let updated = self
            .transition(batch_id, seq, |job| {
                job.status_id = JobStatus::Failed.id();
                job.error_message = Some(message.clone());
                job.failure_kind = Some(kind.as_str().to_string());
                job.completed_at = Some(Utc::now());
            })
            .await;

        let Some(job) = updated else {
            return;
        };
        let node_id = node.map(|n| n.node_id.clone());
        tracing::warn!(
            batch_id,
            job_id = %job.id,
            node_id = ?node_id,
            kind = kind.as_str(),
            error = %message,
            "Job failed",
        );
        self.emit(BatchEvent::JobFailed {
            batch_id: batch_id.to_string(),
            job_id: job.id,
            node_id,
            kind,
            error: message,
        });
    }

    /// Force every non-terminal job of the batch to `failed`.
    async fn expire_unresolved(&self, batch_id: &str) {
        let error = DispatchError::BatchTimeout(self.batch_deadline.as_secs());
        let kind = error.kind();
        let message = error.to_string();
        let now = Utc::now();

        let expired: Vec<Job> = {
            let mut cache = self.batches.write().await;
            let Some(state) = cache.get_mut(batch_id) else {
                return;
            };
            state
                .jobs
                .iter_mut()
                .filter(|job| !job.status().is_terminal())
                .map(|job| {
                    job.status_id = JobStatus::Failed.id();
                    job.error_message = Some(message.clone());
                    job.failure_kind = Some(kind.as_str().to_string());
                    job.completed_at = Some(now);
                    job.clone()
                })
                .collect()
        };

        tracing::warn!(
            batch_id,
            expired = expired.len(),
            deadline_secs = self.batch_deadline.as_secs(),
            "Batch deadline exceeded",
        );
        for job in expired {
            self.persist(&job).await;
            self.emit(BatchEvent::JobFailed {
                batch_id: batch_id.to_string(),
                job_id: job.id,
                node_id: job.assigned_node_id,
                kind,
                error: message.clone(),
            });
        }
    }

    async fn finish_batch(&self, batch_id: &str) {
        let finished_at = Utc::now();
        let counts = {
            let mut cache = self.batches.write().await;
            let Some(state) = cache.get_mut(batch_id) else {
                return;
            };
            state.batch.finished_at = Some(finished_at);
            state.finished = Some(Instant::now());
            count_jobs(&state.jobs)
        };

        if let Err(e) = self.store.mark_batch_finished(batch_id, finished_at).await {
            tracing::error!(batch_id, error = %e, "Failed to persist batch completion");
        }

        let status = counts.status();
        tracing::info!(
            batch_id,
            status = status.as_str(),
            completed = counts.completed,
            failed = counts.failed,
            total = counts.total,
            "Batch finished",
        );
        self.emit(BatchEvent::BatchFinished {
            batch_id: batch_id.to_string(),
            status,
            completed: counts.completed,
            failed: counts.failed,
        });
    }

    /// Apply `update` to a cached, non-terminal job and persist the result.
    ///
    /// Returns `None` when the job is gone or already terminal; terminal
    /// states never change again.
    async fn transition<F>(&self, batch_id: &str, seq: usize, update: F) -> Option<Job>
    where
        F: FnOnce(&mut Job),
    {
        let job = {
            let mut cache = self.batches.write().await;
            let job = cache.get_mut(batch_id)?.jobs.get_mut(seq)?;
            if job.status().is_terminal() {
                return None;
            }
            update(job);
            job.clone()
        };
        self.persist(&job).await;
        Some(job)
    }

    async fn persist(&self, job: &Job) {
        if let Err(e) = self.store.update_job(job).await {
            tracing::error!(job_id = %job.id, error = %e, "Failed to persist job state");
        }
    }

    fn emit(&self, event: BatchEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }
}
