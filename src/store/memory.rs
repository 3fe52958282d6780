//! In-memory stores, used by tests and single-document CLI runs.

use super::{sort_newest_first, validate_key, JobStore, ObjectStore};
use crate::error::UnderwriteError;
use crate::job::{Job, JobId, JobStatus, JobSummary, JobUpdate};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<JobId, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` against the stored job under the write lock; the job is only
    /// replaced when `f` succeeds.
    async fn modify<F>(&self, job_id: &JobId, f: F) -> Result<Job, UnderwriteError>
    where
        F: FnOnce(&mut Job) -> Result<(), UnderwriteError> + Send,
    {
        let mut jobs = self.jobs.write().await;
        let stored = jobs
            .get_mut(job_id)
            .ok_or_else(|| UnderwriteError::JobNotFound {
                job_id: job_id.clone(),
            })?;
        let mut next = stored.clone();
        f(&mut next)?;
        *stored = next.clone();
        Ok(next)
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn create(&self, job: Job) -> Result<Job, UnderwriteError> {
        let mut jobs = self.jobs.write().await;
        if jobs.contains_key(&job.job_id) {
            return Err(UnderwriteError::JobAlreadyExists {
                job_id: job.job_id.clone(),
            });
        }
        jobs.insert(job.job_id.clone(), job.clone());
        Ok(job)
    }

    async fn get(&self, job_id: &JobId) -> Result<Job, UnderwriteError> {
        self.jobs
            .read()
            .await
            .get(job_id)
            .cloned()
            .ok_or_else(|| UnderwriteError::JobNotFound {
                job_id: job_id.clone(),
            })
    }

    async fn list(&self) -> Result<Vec<JobSummary>, UnderwriteError> {
        let mut summaries: Vec<JobSummary> =
            self.jobs.read().await.values().map(JobSummary::from).collect();
        sort_newest_first(&mut summaries);
        Ok(summaries)
    }

    async fn transition(
        &self,
        job_id: &JobId,
        expected_revision: u64,
        to: JobStatus,
        error: Option<String>,
    ) -> Result<Job, UnderwriteError> {
        self.modify(job_id, |job| job.advance(expected_revision, to, error))
            .await
    }

    async fn apply(&self, job_id: &JobId, update: JobUpdate) -> Result<Job, UnderwriteError> {
        self.modify(job_id, |job| job.apply(update)).await
    }
}

#[derive(Debug, Default)]
pub struct MemoryObjectStore {
    objects: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), UnderwriteError> {
        validate_key(key)?;
        let mut objects = self.objects.write().await;
        if objects.contains_key(key) {
            return Err(UnderwriteError::ObjectExists {
                key: key.to_string(),
            });
        }
        objects.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, UnderwriteError> {
        self.objects
            .read()
            .await
            .get(key)
            .cloned()
            .ok_or_else(|| UnderwriteError::ObjectNotFound {
                key: key.to_string(),
            })
    }

    async fn exists(&self, key: &str) -> Result<bool, UnderwriteError> {
        Ok(self.objects.read().await.contains_key(key))
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, UnderwriteError> {
        Ok(self
            .objects
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}
