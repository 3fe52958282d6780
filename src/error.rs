//! Error types for the edgequake-underwrite library.
//!
//! Two error types, mirroring the two ways a submission can go wrong:
//!
//! * [`UnderwriteError`]: the single fatal error type. Returned from store
//!   operations, pipeline stages and the orchestrator. When it escapes a
//!   stage the orchestrator records it on the job and moves the job to a
//!   terminal status.
//!
//! * [`BatchError`]: one page-range batch of the extraction fan-out failed.
//!   Batches run independently, so their failures are collected first and
//!   only turned into a job failure at fan-in, once every sibling batch has
//!   reported.

use crate::job::{JobId, JobStatus};
use crate::output::PageRange;
use crate::pipeline::Stage;
use thiserror::Error;

/// All fatal errors returned by the edgequake-underwrite library.
#[derive(Debug, Error)]
pub enum UnderwriteError {
    // ── Input / validation errors ─────────────────────────────────────────
    /// Upload filename does not carry an accepted extension.
    #[error("Unsupported file type '{filename}': only PDF documents are accepted")]
    UnsupportedFileType { filename: String },

    /// The uploaded bytes are not a PDF.
    #[error("Uploaded document is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// A required request field is absent or empty.
    #[error("Missing required field '{0}'")]
    MissingField(&'static str),

    /// A request field carries a value outside its accepted set.
    #[error("Invalid value '{value}' for field '{field}'")]
    InvalidField { field: &'static str, value: String },

    /// CLI input is neither an existing file nor an HTTP/HTTPS URL.
    #[error("Input not found: '{input}'\nCheck the path exists or pass an HTTP/HTTPS URL.")]
    InputNotFound { input: String },

    /// URL download failed.
    #[error("Failed to download '{url}': {reason}")]
    DownloadFailed { url: String, reason: String },

    /// URL download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'")]
    DownloadTimeout { url: String, secs: u64 },

    // ── Store errors ──────────────────────────────────────────────────────
    /// No job with this identifier exists.
    #[error("Job {job_id} not found")]
    JobNotFound { job_id: JobId },

    /// A job with this identifier was already created.
    #[error("Job {job_id} already exists")]
    JobAlreadyExists { job_id: JobId },

    /// Status change outside the forward stage sequence.
    #[error("Job {job_id}: illegal status transition {from} → {to}")]
    IllegalTransition {
        job_id: JobId,
        from: JobStatus,
        to: JobStatus,
    },

    /// Optimistic-concurrency check failed on a status transition.
    #[error("Job {job_id}: revision conflict (expected {expected}, found {actual})")]
    RevisionConflict {
        job_id: JobId,
        expected: u64,
        actual: u64,
    },

    /// The job reached a terminal status and can no longer be mutated.
    #[error("Job {job_id} is {status} and can no longer be modified")]
    JobTerminal { job_id: JobId, status: JobStatus },

    /// A stage tried to write a field it does not own in the current status.
    #[error("Job {job_id}: cannot record {field} while {status}")]
    OutOfStageUpdate {
        job_id: JobId,
        field: &'static str,
        status: JobStatus,
    },

    /// The requested object key is absent from the object store.
    #[error("Object '{key}' not found")]
    ObjectNotFound { key: String },

    /// Objects are write-once; the key is already taken.
    #[error("Object '{key}' already exists")]
    ObjectExists { key: String },

    /// Underlying storage I/O or (de)serialisation failure.
    #[error("Storage error: {0}")]
    Storage(String),

    // ── Stage execution errors ────────────────────────────────────────────
    /// The document could not be opened by the renderer.
    #[error("Document is corrupt or unreadable: {detail}")]
    CorruptPdf { detail: String },

    /// The document opened but contains no pages.
    #[error("Document has no pages")]
    EmptyDocument,

    /// The renderer failed on a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RasterisationFailed { page: u32, detail: String },

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// The model call failed after all retries.
    #[error("{stage}: model call failed after {retries} retries: {detail}")]
    ModelCallFailed {
        stage: Stage,
        retries: u32,
        detail: String,
    },

    /// The model response did not contain a usable payload.
    #[error("{stage}: unparseable model output: {detail}")]
    UnparseableOutput { stage: Stage, detail: String },

    /// Aggregation input does not cover the document exactly once.
    #[error("Extraction set is inconsistent: {0}")]
    InconsistentExtraction(String),

    /// The agent picked a tool it does not have, or gave it bad arguments.
    #[error("Action tool '{tool}' failed: {detail}")]
    ToolFailed { tool: String, detail: String },

    /// One extraction batch failed; the job fails with the batch message.
    #[error(transparent)]
    Batch(#[from] BatchError),

    // ── Orchestration errors ──────────────────────────────────────────────
    /// The whole pipeline exceeded its ceiling.
    #[error("Pipeline exceeded its {secs}s timeout")]
    PipelineTimeout { secs: u64 },

    /// Chat (or another read of final results) on a job that has not completed.
    #[error("Job {job_id} is not ready (status {status})")]
    JobNotReady { job_id: JobId, status: JobStatus },

    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl UnderwriteError {
    /// `true` when the error comes from executing a stage (render, model,
    /// parse, tool) rather than from infrastructure. The orchestrator records
    /// the former as FAILED and the latter as ERROR.
    pub fn is_stage_failure(&self) -> bool {
        matches!(
            self,
            UnderwriteError::CorruptPdf { .. }
                | UnderwriteError::EmptyDocument
                | UnderwriteError::RasterisationFailed { .. }
                | UnderwriteError::ModelCallFailed { .. }
                | UnderwriteError::UnparseableOutput { .. }
                | UnderwriteError::InconsistentExtraction(_)
                | UnderwriteError::ToolFailed { .. }
        ) || matches!(self, UnderwriteError::Batch(b) if b.stage_failure)
    }

    /// `true` for errors caused by the caller's request.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            UnderwriteError::UnsupportedFileType { .. }
                | UnderwriteError::NotAPdf { .. }
                | UnderwriteError::MissingField(_)
                | UnderwriteError::InvalidField { .. }
        )
    }
}

impl From<serde_json::Error> for UnderwriteError {
    fn from(e: serde_json::Error) -> Self {
        UnderwriteError::Storage(format!("serialisation: {e}"))
    }
}

impl From<std::io::Error> for UnderwriteError {
    fn from(e: std::io::Error) -> Self {
        UnderwriteError::Storage(e.to_string())
    }
}

/// Failure of a single extraction batch.
#[derive(Debug, Clone, Error, serde::Serialize, serde::Deserialize)]
#[error("Extraction of pages {range} failed: {detail}")]
pub struct BatchError {
    /// Page range the batch covered.
    pub range: PageRange,
    /// Position of the batch in the plan (0-based).
    pub index: usize,
    /// Human-readable cause, stored as the job's error message.
    pub detail: String,
    /// Whether the cause was a stage failure rather than storage or internal.
    #[serde(default)]
    pub stage_failure: bool,
}

impl BatchError {
    pub fn new(index: usize, range: PageRange, cause: &UnderwriteError) -> Self {
        Self {
            range,
            index,
            detail: cause.to_string(),
            stage_failure: cause.is_stage_failure(),
        }
    }
}
