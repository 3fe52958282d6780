//! Observer trait for pipeline events.
//!
//! The orchestrator reports status changes and batch outcomes to an
//! [`Arc<dyn PipelineObserver>`]. Callers can forward events to a terminal
//! progress bar (the CLI), a broadcast channel feeding server-sent events
//! (the API server), or nowhere at all, without the library knowing how
//! the host application communicates.
//!
//! # Example
//!
//! ```rust
//! use edgequake_underwrite::{JobId, JobStatus, PipelineObserver};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! struct CountingObserver {
//!     changes: AtomicUsize,
//! }
//!
//! impl PipelineObserver for CountingObserver {
//!     fn on_status(&self, _job_id: &JobId, _status: JobStatus) {
//!         self.changes.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//! ```

use crate::job::{JobId, JobStatus};
use crate::output::PageRange;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Called by the orchestrator as a job moves through the pipeline.
///
/// Implementations must be `Send + Sync`: extraction batches of one job
/// complete concurrently, so `on_batch_complete` and `on_batch_error` may
/// be called from different tasks at once. Every method defaults to a
/// no-op.
pub trait PipelineObserver: Send + Sync {
    /// The job entered `status`.
    fn on_status(&self, job_id: &JobId, status: JobStatus) {
        let _ = (job_id, status);
    }

    /// Extraction was planned as `ranges`.
    fn on_batches_planned(&self, job_id: &JobId, ranges: &[PageRange]) {
        let _ = (job_id, ranges);
    }

    /// One extraction batch finished and recorded `pages` entries.
    fn on_batch_complete(&self, job_id: &JobId, range: PageRange, pages: usize) {
        let _ = (job_id, range, pages);
    }

    /// One extraction batch failed.
    fn on_batch_error(&self, job_id: &JobId, range: PageRange, error: &str) {
        let _ = (job_id, range, error);
    }

    /// The job reached a terminal status.
    fn on_job_finished(&self, job_id: &JobId, status: JobStatus, error: Option<&str>) {
        let _ = (job_id, status, error);
    }
}

/// Observer that ignores every event.
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {}

/// Convenience alias for the shared observer handle.
pub type Observer = Arc<dyn PipelineObserver>;

/// A pipeline event in wire form (server-sent events).
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PipelineEvent {
    #[serde(rename_all = "camelCase")]
    Status { job_id: JobId, status: JobStatus },
    #[serde(rename_all = "camelCase")]
    BatchesPlanned { job_id: JobId, ranges: Vec<PageRange> },
    #[serde(rename_all = "camelCase")]
    BatchComplete {
        job_id: JobId,
        range: PageRange,
        pages: usize,
    },
    #[serde(rename_all = "camelCase")]
    BatchError {
        job_id: JobId,
        range: PageRange,
        error: String,
    },
    #[serde(rename_all = "camelCase")]
    Finished {
        job_id: JobId,
        status: JobStatus,
        error: Option<String>,
    },
}

impl PipelineEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            PipelineEvent::Status { job_id, .. }
            | PipelineEvent::BatchesPlanned { job_id, .. }
            | PipelineEvent::BatchComplete { job_id, .. }
            | PipelineEvent::BatchError { job_id, .. }
            | PipelineEvent::Finished { job_id, .. } => job_id,
        }
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            PipelineEvent::Status { .. } => "status",
            PipelineEvent::BatchesPlanned { .. } => "batchesPlanned",
            PipelineEvent::BatchComplete { .. } => "batchComplete",
            PipelineEvent::BatchError { .. } => "batchError",
            PipelineEvent::Finished { .. } => "finished",
        }
    }
}

/// Observer that publishes every event on a broadcast channel.
///
/// Sends never block; with no subscribers the event is dropped, and a slow
/// subscriber that falls behind the channel capacity skips ahead.
#[derive(Debug, Clone)]
pub struct BroadcastObserver {
    tx: broadcast::Sender<PipelineEvent>,
}

impl BroadcastObserver {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    fn send(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

impl PipelineObserver for BroadcastObserver {
    fn on_status(&self, job_id: &JobId, status: JobStatus) {
        self.send(PipelineEvent::Status {
            job_id: job_id.clone(),
            status,
        });
    }

    fn on_batches_planned(&self, job_id: &JobId, ranges: &[PageRange]) {
        self.send(PipelineEvent::BatchesPlanned {
            job_id: job_id.clone(),
            ranges: ranges.to_vec(),
        });
    }

    fn on_batch_complete(&self, job_id: &JobId, range: PageRange, pages: usize) {
        self.send(PipelineEvent::BatchComplete {
            job_id: job_id.clone(),
            range,
            pages,
        });
    }

    fn on_batch_error(&self, job_id: &JobId, range: PageRange, error: &str) {
        self.send(PipelineEvent::BatchError {
            job_id: job_id.clone(),
            range,
            error: error.to_string(),
        });
    }

    fn on_job_finished(&self, job_id: &JobId, status: JobStatus, error: Option<&str>) {
        self.send(PipelineEvent::Finished {
            job_id: job_id.clone(),
            status,
            error: error.map(str::to_string),
        });
    }
}
