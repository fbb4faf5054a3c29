//! Persistent store for batch and job records.
//!
//! The coordinator writes every job transition through [`JobStore`] with
//! at-least-once semantics; no multi-row atomicity between jobs and batches
//! is required.  [`PgJobStore`] is the production implementation,
//! [`InMemoryJobStore`] serves database-less deployments and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use pixfarm_core::batch::MAX_HISTORY_LIMIT;
use pixfarm_core::types::{DbId, Timestamp};
use pixfarm_db::models::batch::Batch;
use pixfarm_db::models::job::Job;
use pixfarm_db::repositories::{BatchRepo, JobRepo};
use pixfarm_db::DbPool;
use tokio::sync::RwLock;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_batch(&self, batch: &Batch) -> Result<(), StoreError>;

    async fn insert_job(&self, job: &Job) -> Result<(), StoreError>;

    /// Persist the mutable state of one job transition.
    async fn update_job(&self, job: &Job) -> Result<(), StoreError>;

    async fn mark_batch_finished(
        &self,
        batch_id: &str,
        finished_at: Timestamp,
    ) -> Result<(), StoreError>;

    /// Find a batch, restricted to its owner.
    async fn find_batch(&self, batch_id: &str, owner_id: DbId)
        -> Result<Option<Batch>, StoreError>;

    /// The jobs of an owner's batch, in creation order.
    async fn jobs_for_batch(&self, batch_id: &str, owner_id: DbId)
        -> Result<Vec<Job>, StoreError>;

    /// An owner's batches, newest first.
    async fn list_batches(
        &self,
        owner_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Batch>, StoreError>;
}

// ---------------------------------------------------------------------------
// PostgreSQL
// ---------------------------------------------------------------------------

pub struct PgJobStore {
    pool: DbPool,
}

impl PgJobStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert_batch(&self, batch: &Batch) -> Result<(), StoreError> {
        Ok(BatchRepo::create(&self.pool, batch).await?)
    }

    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        Ok(JobRepo::create(&self.pool, job).await?)
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        Ok(JobRepo::update_state(&self.pool, job).await?)
    }

    async fn mark_batch_finished(
        &self,
        batch_id: &str,
        finished_at: Timestamp,
    ) -> Result<(), StoreError> {
        Ok(BatchRepo::mark_finished(&self.pool, batch_id, finished_at).await?)
    }

    async fn find_batch(
        &self,
        batch_id: &str,
        owner_id: DbId,
    ) -> Result<Option<Batch>, StoreError> {
        Ok(BatchRepo::find_for_owner(&self.pool, batch_id, owner_id).await?)
    }

    async fn jobs_for_batch(
        &self,
        batch_id: &str,
        owner_id: DbId,
    ) -> Result<Vec<Job>, StoreError> {
        Ok(JobRepo::list_by_batch(&self.pool, batch_id, owner_id).await?)
    }

    async fn list_batches(
        &self,
        owner_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Batch>, StoreError> {
        Ok(BatchRepo::list_by_owner(&self.pool, owner_id, limit, offset).await?)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Process-local store. Contents are lost on restart.
#[derive(Default)]
pub struct InMemoryJobStore {
    batches: RwLock<HashMap<String, Batch>>,
    jobs: RwLock<HashMap<String, Job>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn batch_count(&self) -> usize {
        self.batches.read().await.len()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.read().await.len()
    }

    pub async fn job(&self, job_id: &str) -> Option<Job> {
        self.jobs.read().await.get(job_id).cloned()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn insert_batch(&self, batch: &Batch) -> Result<(), StoreError> {
        self.batches
            .write()
            .await
            .insert(batch.id.clone(), batch.clone());
        Ok(())
    }

    async fn insert_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn update_job(&self, job: &Job) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id.clone(), job.clone());
        Ok(())
    }

    async fn mark_batch_finished(
        &self,
        batch_id: &str,
        finished_at: Timestamp,
    ) -> Result<(), StoreError> {
        if let Some(batch) = self.batches.write().await.get_mut(batch_id) {
            batch.finished_at = Some(finished_at);
        }
        Ok(())
    }

    async fn find_batch(
        &self,
        batch_id: &str,
        owner_id: DbId,
    ) -> Result<Option<Batch>, StoreError> {
        Ok(self
            .batches
            .read()
            .await
            .get(batch_id)
            .filter(|b| b.owner_id == owner_id)
            .cloned())
    }

    async fn jobs_for_batch(
        &self,
        batch_id: &str,
        owner_id: DbId,
    ) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .read()
            .await
            .values()
            .filter(|j| j.batch_id == batch_id && j.owner_id == owner_id)
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.seq.cmp(&b.seq)));
        Ok(jobs)
    }

    async fn list_batches(
        &self,
        owner_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Batch>, StoreError> {
        let mut batches: Vec<Batch> = self
            .batches
            .read()
            .await
            .values()
            .filter(|b| b.owner_id == owner_id)
            .cloned()
            .collect();
        batches.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(batches
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.clamp(0, MAX_HISTORY_LIMIT) as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use pixfarm_core::transform::TransformStep;
    use pixfarm_db::models::job::NewJob;

    use super::*;

    fn batch(id: &str, owner_id: DbId, age_secs: i64) -> Batch {
        Batch {
            id: id.to_string(),
            owner_id,
            job_count: 1,
            created_at: Utc::now() - Duration::seconds(age_secs),
            finished_at: None,
        }
    }

    fn job(batch_id: &str, seq: i32, owner_id: DbId) -> Job {
        let input = NewJob {
            original_filename: format!("{seq}.png"),
            source_ref: format!("uploads/{seq}.png"),
            transforms: vec![TransformStep::new("blur", serde_json::json!({"radius": 2}))],
            input_size_bytes: None,
        };
        Job::new_pending(batch_id, seq, owner_id, input, Utc::now())
    }

    #[tokio::test]
    async fn history_is_newest_first_and_owner_scoped() {
        let store = InMemoryJobStore::new();
        store.insert_batch(&batch("old", 1, 60)).await.unwrap();
        store.insert_batch(&batch("new", 1, 0)).await.unwrap();
        store.insert_batch(&batch("other", 2, 0)).await.unwrap();

        let ids: Vec<String> = store
            .list_batches(1, 10, 0)
            .await
            .unwrap()
            .into_iter()
            .map(|b| b.id)
            .collect();
        assert_eq!(ids, vec!["new", "old"]);

        let page = store.list_batches(1, 1, 1).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "old");
    }

    #[tokio::test]
    async fn jobs_for_batch_requires_owner() {
        let store = InMemoryJobStore::new();
        store.insert_job(&job("b1", 1, 1)).await.unwrap();
        store.insert_job(&job("b1", 0, 1)).await.unwrap();

        let jobs = store.jobs_for_batch("b1", 1).await.unwrap();
        assert_eq!(jobs.len(), 2);
        assert!(store.jobs_for_batch("b1", 2).await.unwrap().is_empty());
        assert!(store.find_batch("b1", 2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn mark_finished_sets_timestamp() {
        let store = InMemoryJobStore::new();
        store.insert_batch(&batch("b1", 1, 0)).await.unwrap();
        let at = Utc::now();
        store.mark_batch_finished("b1", at).await.unwrap();
        assert_eq!(store.find_batch("b1", 1).await.unwrap().unwrap().finished_at, Some(at));
    }
}
