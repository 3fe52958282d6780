//! Filesystem stores, used by `underwrite serve`.
//!
//! Layout under the data directory:
//!
//! ```text
//! <root>/jobs/<job_id>.json     one JSON record per job
//! <root>/objects/<key>          one file per object key
//! ```
//!
//! Every write goes to a temp file first and is then renamed into place, so
//! a crash never leaves a half-written record behind. Read-modify-write of a
//! job record happens under a process-wide mutex; one server process owns
//! the directory.

use super::{sort_newest_first, validate_key, JobStore, ObjectStore};
use crate::error::UnderwriteError;
use crate::job::{Job, JobId, JobStatus, JobSummary, JobUpdate};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Write `bytes` to `path` via a sibling temp file and a rename.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), UnderwriteError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await?;
    Ok(())
}

#[derive(Debug)]
pub struct FsJobStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FsJobStore {
    /// Open (creating if needed) the job directory under `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, UnderwriteError> {
        let dir = root.as_ref().join("jobs");
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn path(&self, job_id: &JobId) -> PathBuf {
        self.dir.join(format!("{}.json", job_id))
    }

    async fn read(&self, job_id: &JobId) -> Result<Job, UnderwriteError> {
        match tokio::fs::read(self.path(job_id)).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(UnderwriteError::JobNotFound {
                job_id: job_id.clone(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn write(&self, job: &Job) -> Result<(), UnderwriteError> {
        let bytes = serde_json::to_vec_pretty(job)?;
        write_atomic(&self.path(&job.job_id), &bytes).await
    }

    async fn modify<F>(&self, job_id: &JobId, f: F) -> Result<Job, UnderwriteError>
    where
        F: FnOnce(&mut Job) -> Result<(), UnderwriteError> + Send,
    {
        let _guard = self.lock.lock().await;
        let mut job = self.read(job_id).await?;
        f(&mut job)?;
        self.write(&job).await?;
        Ok(job)
    }
}

#[async_trait]
impl JobStore for FsJobStore {
    async fn create(&self, job: Job) -> Result<Job, UnderwriteError> {
        let _guard = self.lock.lock().await;
        if tokio::fs::try_exists(self.path(&job.job_id)).await? {
            return Err(UnderwriteError::JobAlreadyExists {
                job_id: job.job_id.clone(),
            });
        }
        self.write(&job).await?;
        debug!(job_id = %job.job_id, "Job record created");
        Ok(job)
    }

    async fn get(&self, job_id: &JobId) -> Result<Job, UnderwriteError> {
        self.read(job_id).await
    }

    async fn list(&self) -> Result<Vec<JobSummary>, UnderwriteError> {
        let mut summaries = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            match serde_json::from_slice::<Job>(&bytes) {
                Ok(job) => summaries.push(job.summary()),
                Err(e) => warn!("Skipping unreadable job record {}: {}", path.display(), e),
            }
        }
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

#[derive(Debug)]
pub struct FsObjectStore {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FsObjectStore {
    /// Open (creating if needed) the object directory under `root`.
    pub async fn open(root: impl AsRef<Path>) -> Result<Self, UnderwriteError> {
        let dir = root.as_ref().join("objects");
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            lock: Mutex::new(()),
        })
    }

    fn path(&self, key: &str) -> Result<PathBuf, UnderwriteError> {
        validate_key(key)?;
        Ok(key.split('/').fold(self.dir.clone(), |p, seg| p.join(seg)))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), UnderwriteError> {
        let path = self.path(key)?;
        let _guard = self.lock.lock().await;
        if tokio::fs::try_exists(&path).await? {
            return Err(UnderwriteError::ObjectExists {
                key: key.to_string(),
            });
        }
        write_atomic(&path, &bytes).await?;
        debug!(key, bytes = bytes.len(), "Object stored");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, UnderwriteError> {
        let path = self.path(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(UnderwriteError::ObjectNotFound {
                key: key.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, UnderwriteError> {
        Ok(tokio::fs::try_exists(self.path(key)?).await?)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, UnderwriteError> {
        let mut keys = Vec::new();
        let mut pending = vec![self.dir.clone()];
        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(rel) = path.strip_prefix(&self.dir) else {
                    continue;
                };
                let key = rel
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.ends_with(".tmp") {
                    continue;
                }
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::InsuranceProfile;

    #[tokio::test]
    async fn job_records_survive_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let id = JobId::from("j1");
        {
            let store = FsJobStore::open(tmp.path()).await.unwrap();
            store
                .create(Job::new(id.clone(), "a.pdf", InsuranceProfile::Life, Some("b".into())))
                .await
                .unwrap();
            store
                .transition(&id, 0, JobStatus::Classifying, None)
                .await
                .unwrap();
        }
        let store = FsJobStore::open(tmp.path()).await.unwrap();
        let job = store.get(&id).await.unwrap();
        assert_eq!(job.status, JobStatus::Classifying);
        assert_eq!(job.revision, 1);
        assert_eq!(store.list_by_batch("b").await.unwrap().len(), 1);
        assert!(matches!(
            store.transition(&id, 0, JobStatus::Extracting, None).await,
            Err(UnderwriteError::RevisionConflict { .. })
        ));
    }

    #[tokio::test]
    async fn objects_nest_and_are_write_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::open(tmp.path()).await.unwrap();
        store.put("extracted/j1/1-3.json", b"{}".to_vec()).await.unwrap();
        store.put("extracted/j1/4-6.json", b"{}".to_vec()).await.unwrap();
        store.put("uploads/j1/a.pdf", b"%PDF".to_vec()).await.unwrap();
        assert!(matches!(
            store.put("uploads/j1/a.pdf", vec![]).await,
            Err(UnderwriteError::ObjectExists { .. })
        ));
        assert_eq!(
            store.list("extracted/j1/").await.unwrap(),
            vec!["extracted/j1/1-3.json", "extracted/j1/4-6.json"]
        );
        assert!(matches!(
            store.get("uploads/j1/missing.pdf").await,
            Err(UnderwriteError::ObjectNotFound { .. })
        ));
        assert!(store.get("../outside").await.is_err());
    }
}
