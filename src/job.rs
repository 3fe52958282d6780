//! The job record and its status state machine.
//!
//! A [`Job`] is an explicit, versioned record. Stages never hold it as
//! shared mutable state: they read a fresh copy from the [`crate::store::JobStore`],
//! compute, and hand back a [`JobUpdate`] naming only the fields they own.
//! Status is the single point of sequential mutation and only moves through
//! [`Job::advance`], which checks the caller's expected revision.
//!
//! ```text
//! CREATED ─▶ CLASSIFYING ─▶ EXTRACTING ─▶ ANALYZING ─▶ ACTING ─▶ COMPLETE
//!    │            │              │             │           │
//!    └────────────┴──────────────┴─────────────┴───────────┴──▶ FAILED | ERROR
//! ```

use crate::error::UnderwriteError;
use crate::output::{ActionOutcome, AnalysisResult, PageEntry};
use crate::profile::InsuranceProfile;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Identity ─────────────────────────────────────────────────────────────

/// Opaque job identifier, assigned at upload time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    /// A fresh random (v4 UUID) identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Accept an identifier from an untrusted source (URL path, object key).
    ///
    /// Identifiers become object-key and file-name segments, so path
    /// separators and dot-segments are refused.
    pub fn parse(raw: &str) -> Result<Self, UnderwriteError> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw.len() <= 128
            && raw != "."
            && raw != ".."
            && raw
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if valid {
            Ok(Self(raw.to_string()))
        } else {
            Err(UnderwriteError::InvalidField {
                field: "jobId",
                value: raw.to_string(),
            })
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ── Status ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Created,
    Classifying,
    Extracting,
    Analyzing,
    Acting,
    Complete,
    Failed,
    Error,
}

impl JobStatus {
    /// The forward stage sequence, in order.
    pub const SEQUENCE: [JobStatus; 6] = [
        JobStatus::Created,
        JobStatus::Classifying,
        JobStatus::Extracting,
        JobStatus::Analyzing,
        JobStatus::Acting,
        JobStatus::Complete,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed | JobStatus::Error)
    }

    fn position(self) -> Option<usize> {
        Self::SEQUENCE.iter().position(|s| *s == self)
    }

    /// Forward by exactly one stage, or from any live status to FAILED/ERROR.
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            JobStatus::Failed | JobStatus::Error => true,
            _ => match (self.position(), next.position()) {
                (Some(from), Some(to)) => to == from + 1,
                _ => false,
            },
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Created => "CREATED",
            JobStatus::Classifying => "CLASSIFYING",
            JobStatus::Extracting => "EXTRACTING",
            JobStatus::Analyzing => "ANALYZING",
            JobStatus::Acting => "ACTING",
            JobStatus::Complete => "COMPLETE",
            JobStatus::Failed => "FAILED",
            JobStatus::Error => "ERROR",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of the job's status history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: JobStatus,
    pub at: DateTime<Utc>,
}

// ── Record ───────────────────────────────────────────────────────────────

/// The unit of work for one uploaded document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub job_id: JobId,
    pub original_filename: String,
    /// Object-store key of the uploaded document.
    pub object_key: String,
    pub insurance_type: InsuranceProfile,
    pub status: JobStatus,
    /// Incremented on every status transition.
    pub revision: u64,
    pub batch_id: Option<String>,
    pub classification: Option<String>,
    pub page_count: Option<u32>,
    pub error_message: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub history: Vec<StatusChange>,
    /// Per-page extraction entries keyed by page number. Batches write
    /// disjoint keys.
    pub extraction: BTreeMap<u32, PageEntry>,
    pub analysis: Option<AnalysisResult>,
    pub action: Option<ActionOutcome>,
}

/// Object-store key the document of `job_id` is uploaded to.
pub fn upload_key(job_id: &JobId, filename: &str) -> String {
    format!("uploads/{job_id}/{filename}")
}

impl Job {
    pub fn new(
        job_id: JobId,
        original_filename: impl Into<String>,
        insurance_type: InsuranceProfile,
        batch_id: Option<String>,
    ) -> Self {
        let original_filename = original_filename.into();
        let now = Utc::now();
        Self {
            object_key: upload_key(&job_id, &original_filename),
            job_id,
            original_filename,
            insurance_type,
            status: JobStatus::Created,
            revision: 0,
            batch_id,
            classification: None,
            page_count: None,
            error_message: None,
            uploaded_at: now,
            updated_at: now,
            history: vec![StatusChange {
                status: JobStatus::Created,
                at: now,
            }],
            extraction: BTreeMap::new(),
            analysis: None,
            action: None,
        }
    }

    /// Move to `to`, provided the record is still at `expected_revision`.
    ///
    /// `error` is recorded as the job's error message (FAILED/ERROR).
    pub fn advance(
        &mut self,
        expected_revision: u64,
        to: JobStatus,
        error: Option<String>,
    ) -> Result<(), UnderwriteError> {
        if self.status.is_terminal() {
            return Err(UnderwriteError::JobTerminal {
                job_id: self.job_id.clone(),
                status: self.status,
            });
        }
        if self.revision != expected_revision {
            return Err(UnderwriteError::RevisionConflict {
                job_id: self.job_id.clone(),
                expected: expected_revision,
                actual: self.revision,
            });
        }
        if !self.status.can_transition_to(to) {
            return Err(UnderwriteError::IllegalTransition {
                job_id: self.job_id.clone(),
                from: self.status,
                to,
            });
        }

        let now = Utc::now();
        self.status = to;
        self.revision += 1;
        self.updated_at = now;
        self.history.push(StatusChange { status: to, at: now });
        if error.is_some() {
            self.error_message = error;
        }
        Ok(())
    }

    /// Record a stage's output. Each field may only be written while the
    /// job is in the status of the stage that owns it.
    pub fn apply(&mut self, update: JobUpdate) -> Result<(), UnderwriteError> {
        if self.status.is_terminal() {
            return Err(UnderwriteError::JobTerminal {
                job_id: self.job_id.clone(),
                status: self.status,
            });
        }
        let owner = update.owning_status();
        if self.status != owner {
            return Err(UnderwriteError::OutOfStageUpdate {
                job_id: self.job_id.clone(),
                field: update.field(),
                status: self.status,
            });
        }

        match update {
            JobUpdate::Classification { label, page_count } => {
                self.classification = Some(label);
                self.page_count = Some(page_count);
            }
            JobUpdate::ExtractedPages(entries) => {
                for entry in entries {
                    self.extraction.insert(entry.page_number, entry);
                }
            }
            JobUpdate::Analysis(result) => self.analysis = Some(result),
            JobUpdate::Action(outcome) => self.action = Some(outcome),
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary::from(self)
    }
}

/// A stage-owned field write.
#[derive(Debug, Clone)]
pub enum JobUpdate {
    Classification { label: String, page_count: u32 },
    ExtractedPages(Vec<PageEntry>),
    Analysis(AnalysisResult),
    Action(ActionOutcome),
}

impl JobUpdate {
    fn owning_status(&self) -> JobStatus {
        match self {
            JobUpdate::Classification { .. } => JobStatus::Classifying,
            JobUpdate::ExtractedPages(_) => JobStatus::Extracting,
            JobUpdate::Analysis(_) => JobStatus::Analyzing,
            JobUpdate::Action(_) => JobStatus::Acting,
        }
    }

    fn field(&self) -> &'static str {
        match self {
            JobUpdate::Classification { .. } => "classification",
            JobUpdate::ExtractedPages(_) => "extraction",
            JobUpdate::Analysis(_) => "analysis",
            JobUpdate::Action(_) => "action",
        }
    }
}

/// Listing view of a job, without the large payloads.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub job_id: JobId,
    pub original_filename: String,
    pub insurance_type: InsuranceProfile,
    pub status: JobStatus,
    pub batch_id: Option<String>,
    pub classification: Option<String>,
    pub error_message: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.job_id.clone(),
            original_filename: job.original_filename.clone(),
            insurance_type: job.insurance_type,
            status: job.status,
            batch_id: job.batch_id.clone(),
            classification: job.classification.clone(),
            error_message: job.error_message.clone(),
            uploaded_at: job.uploaded_at,
            updated_at: job.updated_at,
        }
    }
}
