//! Object-created events and the dispatcher that turns them into runs.
//!
//! Writing an upload into the object store is the only way a job starts.
//! The upload handler emits an [`ObjectCreated`] for the key it wrote; the
//! [`TriggerDispatcher`] loop resolves the job from the key and spawns one
//! orchestrator run per event. Keys outside `uploads/` are ignored.

use crate::error::UnderwriteError;
use crate::job::JobId;
use crate::orchestrator::Orchestrator;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

const UPLOAD_PREFIX: &str = "uploads/";

/// A new object was written to the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectCreated {
    pub key: String,
}

impl ObjectCreated {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }

    /// The job an `uploads/{job_id}/{filename}` key belongs to.
    pub fn job_id(&self) -> Option<JobId> {
        let rest = self.key.strip_prefix(UPLOAD_PREFIX)?;
        let (id, filename) = rest.split_once('/')?;
        if filename.is_empty() || filename.contains('/') {
            return None;
        }
        JobId::parse(id).ok()
    }
}

/// Sending half of the trigger channel.
#[derive(Debug, Clone)]
pub struct TriggerDispatcher {
    tx: mpsc::Sender<ObjectCreated>,
}

impl TriggerDispatcher {
    /// Start the dispatch loop. It runs until every dispatcher handle is
    /// dropped.
    pub fn start(orchestrator: Orchestrator, capacity: usize) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<ObjectCreated>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(job_id) = event.job_id() else {
                    debug!(key = %event.key, "Ignoring object outside uploads/");
                    continue;
                };
                let orchestrator = orchestrator.clone();
                tokio::spawn(async move {
                    run_for_upload(&orchestrator, &job_id, &event.key).await;
                });
            }
            debug!("Trigger channel closed");
        });

        (Self { tx }, handle)
    }

    /// Report a newly written object.
    pub async fn notify(&self, event: ObjectCreated) -> Result<(), UnderwriteError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| UnderwriteError::Internal("trigger dispatcher has stopped".into()))
    }
}

async fn run_for_upload(orchestrator: &Orchestrator, job_id: &JobId, key: &str) {
    let job = match orchestrator.context().jobs.get(job_id).await {
        Ok(job) => job,
        Err(e) => {
            warn!(job_id = %job_id, key = %key, "Upload has no job: {}", e);
            return;
        }
    };
    if job.object_key != key {
        warn!(
            job_id = %job_id,
            key = %key,
            expected = %job.object_key,
            "Upload key does not match the job's document; ignoring"
        );
        return;
    }

    info!(job_id = %job_id, "Upload received, starting pipeline");
    match orchestrator.run(job_id).await {
        Ok(job) => debug!(job_id = %job_id, status = %job.status, "Run ended"),
        Err(e) => error!(job_id = %job_id, "Could not run pipeline: {}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_id_from_upload_key() {
        let e = ObjectCreated::new("uploads/3f2a-11/application.pdf");
        assert_eq!(e.job_id(), Some(JobId::from("3f2a-11")));
    }

    #[test]
    fn other_keys_are_not_uploads() {
        assert!(ObjectCreated::new("extracted/j1/1-3.json").job_id().is_none());
        assert!(ObjectCreated::new("uploads/j1/").job_id().is_none());
        assert!(ObjectCreated::new("uploads/j1/nested/a.pdf").job_id().is_none());
        assert!(ObjectCreated::new("uploads/../a.pdf").job_id().is_none());
    }
}
