//! Durable state: the job store and the object store.
//!
//! Both are traits so the pipeline runs the same against the in-memory
//! stores (tests, `underwrite run`) and the filesystem stores
//! (`underwrite serve`).
//!
//! ## Concurrency contract
//!
//! Extraction batches of one job run concurrently and each records its
//! pages through [`JobStore::apply`]. Implementations must make every
//! `apply` and `transition` an atomic read-modify-write of the single job
//! record, so concurrent writers touching disjoint page keys never lose an
//! update.

pub mod fs;
pub mod memory;

use crate::error::UnderwriteError;
use crate::job::{Job, JobId, JobStatus, JobSummary, JobUpdate};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub use fs::{FsJobStore, FsObjectStore};
pub use memory::{MemoryJobStore, MemoryObjectStore};

#[async_trait]
pub trait JobStore: Send + Sync {
    /// Insert a new job. Fails with `JobAlreadyExists` on a duplicate id.
    async fn create(&self, job: Job) -> Result<Job, UnderwriteError>;

    /// Point lookup. Pure read.
    async fn get(&self, job_id: &JobId) -> Result<Job, UnderwriteError>;

    /// Summaries of every job, newest upload first.
    async fn list(&self) -> Result<Vec<JobSummary>, UnderwriteError>;

    /// Summaries of the jobs sharing `batch_id`, newest upload first.
    async fn list_by_batch(&self, batch_id: &str) -> Result<Vec<JobSummary>, UnderwriteError> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|s| s.batch_id.as_deref() == Some(batch_id))
            .collect())
    }

    /// Atomically move the job to `to` if it is still at `expected_revision`.
    async fn transition(
        &self,
        job_id: &JobId,
        expected_revision: u64,
        to: JobStatus,
        error: Option<String>,
    ) -> Result<Job, UnderwriteError>;

    /// Atomically record a stage-owned field write.
    async fn apply(&self, job_id: &JobId, update: JobUpdate) -> Result<Job, UnderwriteError>;
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write-once put. Fails with `ObjectExists` when `key` is taken.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), UnderwriteError>;

    async fn get(&self, key: &str) -> Result<Vec<u8>, UnderwriteError>;

    async fn exists(&self, key: &str) -> Result<bool, UnderwriteError>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, UnderwriteError>;
}

/// Serialise `value` as pretty JSON and put it under `key`.
pub async fn put_json<T: Serialize + Sync>(
    store: &dyn ObjectStore,
    key: &str,
    value: &T,
) -> Result<(), UnderwriteError> {
    let bytes = serde_json::to_vec_pretty(value)?;
    store.put(key, bytes).await
}

/// Fetch `key` and deserialise it from JSON.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    key: &str,
) -> Result<T, UnderwriteError> {
    let bytes = store.get(key).await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| UnderwriteError::Storage(format!("object '{key}' is not valid JSON: {e}")))
}

/// Object keys are relative, `/`-separated paths without empty or dot
/// segments.
pub fn validate_key(key: &str) -> Result<(), UnderwriteError> {
    let ok = !key.is_empty()
        && !key.contains('\\')
        && key
            .split('/')
            .all(|seg| !seg.is_empty() && seg != "." && seg != "..");
    if ok {
        Ok(())
    } else {
        Err(UnderwriteError::InvalidField {
            field: "key",
            value: key.to_string(),
        })
    }
}

/// Newest upload first; ties broken by id for a stable order.
pub(crate) fn sort_newest_first(summaries: &mut [JobSummary]) {
    summaries.sort_by(|a, b| {
        b.uploaded_at
            .cmp(&a.uploaded_at)
            .then_with(|| a.job_id.cmp(&b.job_id))
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_validation() {
        assert!(validate_key("uploads/j1/a.pdf").is_ok());
        assert!(validate_key("extracted/j1/1-3.json").is_ok());
        for bad in ["", "/abs", "a//b", "a/../b", "./a", "a\\b", "trailing/"] {
            assert!(validate_key(bad).is_err(), "accepted {bad:?}");
        }
    }
}
