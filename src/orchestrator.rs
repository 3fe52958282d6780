//! The five-stage sequencer.
//!
//! ```text
//! CREATED ─▶ CLASSIFYING ─▶ EXTRACTING ─▶ ANALYZING ─▶ ACTING ─▶ COMPLETE
//!              classify       plan +          analyze      act
//!                             extract × N
//! ```
//!
//! The orchestrator is the only component that changes a job's status.
//! Stages write their own fields and return; the orchestrator advances the
//! status with the revision it last saw. A second driver of the same job
//! loses the CREATED → CLASSIFYING claim and returns its conflict to the
//! caller; it never records a failure on the job the winner is running.
//!
//! ## Fan-out / fan-in
//!
//! Extraction batches run through `buffer_unordered(extraction_concurrency)`.
//! Every batch reports before the job moves on. If any batch failed, the job
//! fails with the error of the earliest failed batch (by plan order); pages
//! written by the successful batches stay in storage but the job never
//! reaches ANALYZING.
//!
//! ## Failure mapping
//!
//! Errors from running a stage (render, model, parse, tool) end the job in
//! FAILED. A failed batch takes the mapping of its cause. Everything else (storage, internal errors, the pipeline
//! timeout) ends it in ERROR. Either way the message is stored on the job.

use crate::error::{BatchError, UnderwriteError};
use crate::job::{Job, JobId, JobStatus};
use crate::output::{ExtractionChunk, PageRange};
use crate::pipeline::input::{check_pdf_magic, validate_upload_filename};
use crate::pipeline::{act, analyze, classify, extract, plan, StageContext};
use crate::profile::InsuranceProfile;
use crate::progress::{NoopObserver, Observer};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{timeout, Duration};
use tracing::{error, info, warn};

/// Drives jobs through the pipeline.
#[derive(Clone)]
pub struct Orchestrator {
    ctx: StageContext,
    observer: Observer,
}

impl Orchestrator {
    pub fn new(ctx: StageContext) -> Self {
        Self {
            ctx,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Observer) -> Self {
        self.observer = observer;
        self
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    /// Create a job for `bytes` and store the document, without running it.
    ///
    /// The filename must end in `.pdf` and the bytes must carry the PDF
    /// magic; both are checked before anything is written.
    pub async fn submit(
        &self,
        filename: &str,
        bytes: Vec<u8>,
        profile: InsuranceProfile,
        batch_id: Option<String>,
    ) -> Result<Job, UnderwriteError> {
        let filename = validate_upload_filename(filename)?;
        check_pdf_magic(&bytes)?;
        let job = Job::new(JobId::generate(), filename, profile, batch_id);
        let job = self.ctx.jobs.create(job).await?;
        self.ctx.objects.put(&job.object_key, bytes).await?;
        info!(job_id = %job.job_id, key = %job.object_key, "Document submitted");
        Ok(job)
    }

    /// Run a CREATED job to a terminal status and return the final record.
    ///
    /// Stage failures and the timeout are recorded on the job and are not
    /// returned as `Err`; the caller inspects `status` and `error_message`.
    /// `Err` means the job could not be claimed, another writer moved it
    /// underneath this run, or its failure could not be recorded.
    pub async fn run(&self, job_id: &JobId) -> Result<Job, UnderwriteError> {
        let job = self.ctx.jobs.get(job_id).await?;
        if job.status != JobStatus::Created {
            return Err(UnderwriteError::IllegalTransition {
                job_id: job_id.clone(),
                from: job.status,
                to: JobStatus::Classifying,
            });
        }

        let start = Instant::now();
        let job = self.advance(&job, JobStatus::Classifying).await?;
        let secs = self.ctx.config.pipeline_timeout_secs;
        let outcome = match timeout(Duration::from_secs(secs), self.drive(job)).await {
            Ok(result) => result,
            Err(_) => Err(UnderwriteError::PipelineTimeout { secs }),
        };

        let job = match outcome {
            Ok(job) => job,
            // The job belongs to whoever wrote the newer revision.
            Err(e @ UnderwriteError::RevisionConflict { .. })
            | Err(e @ UnderwriteError::JobTerminal { .. }) => {
                warn!(job_id = %job_id, "Run abandoned: {}", e);
                return Err(e);
            }
            Err(e) => self.fail(job_id, e).await?,
        };

        info!(
            job_id = %job_id,
            status = %job.status,
            "Pipeline finished in {:?}",
            start.elapsed()
        );
        self.observer
            .on_job_finished(job_id, job.status, job.error_message.as_deref());
        Ok(job)
    }

    async fn drive(&self, job: Job) -> Result<Job, UnderwriteError> {
        let job_id = job.job_id.clone();
        let classification = classify::classify(&self.ctx, &job_id).await?;

        let ranges = plan::plan_batches(classification.page_count, self.ctx.config.batch_size);
        info!(
            job_id = %job_id,
            pages = classification.page_count,
            batches = ranges.len(),
            "Extraction planned"
        );
        self.observer.on_batches_planned(&job_id, &ranges);

        let job = self.advance(&job, JobStatus::Extracting).await?;
        self.extract_all(&job_id, &ranges).await?;

        let job = self.advance(&job, JobStatus::Analyzing).await?;
        analyze::analyze(&self.ctx, &job_id).await?;

        let job = self.advance(&job, JobStatus::Acting).await?;
        act::act(&self.ctx, &job_id).await?;

        self.advance(&job, JobStatus::Complete).await
    }

    /// Fan out one task per range, wait for all of them, then fan in.
    async fn extract_all(&self, job_id: &JobId, ranges: &[PageRange]) -> Result<(), UnderwriteError> {
        let concurrency = self.ctx.config.extraction_concurrency.max(1);

        let results: Vec<(usize, PageRange, Result<ExtractionChunk, UnderwriteError>)> =
            stream::iter(ranges.iter().copied().enumerate().map(|(index, range)| {
                let ctx = self.ctx.clone();
                let observer = Arc::clone(&self.observer);
                let job_id = job_id.clone();
                async move {
                    let result = extract::extract_batch(&ctx, &job_id, range).await;
                    match &result {
                        Ok(chunk) => observer.on_batch_complete(&job_id, range, chunk.pages.len()),
                        Err(e) => {
                            warn!(job_id = %job_id, pages = %range, "Batch failed: {}", e);
                            observer.on_batch_error(&job_id, range, &e.to_string());
                        }
                    }
                    (index, range, result)
                }
            }))
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let first_failure = results
            .into_iter()
            .filter_map(|(index, range, result)| {
                result.err().map(|e| BatchError::new(index, range, &e))
            })
            .min_by_key(|e| e.index);

        match first_failure {
            Some(batch_error) => Err(batch_error.into()),
            None => Ok(()),
        }
    }

    /// Advance from the revision of `job`, reporting the new status.
    async fn advance(&self, job: &Job, to: JobStatus) -> Result<Job, UnderwriteError> {
        let next = self
            .ctx
            .jobs
            .transition(&job.job_id, job.revision, to, None)
            .await?;
        info!(job_id = %job.job_id, "{} → {}", job.status, to);
        self.observer.on_status(&job.job_id, to);
        Ok(next)
    }

    /// Record `cause` on the job as FAILED or ERROR.
    async fn fail(&self, job_id: &JobId, cause: UnderwriteError) -> Result<Job, UnderwriteError> {
        let status = if cause.is_stage_failure() {
            JobStatus::Failed
        } else {
            JobStatus::Error
        };
        let message = cause.to_string();
        error!(job_id = %job_id, "Pipeline {}: {}", status, message);

        let current = self.ctx.jobs.get(job_id).await?;
        if current.status.is_terminal() {
            return Ok(current);
        }
        let job = self
            .ctx
            .jobs
            .transition(job_id, current.revision, status, Some(message))
            .await?;
        self.observer.on_status(job_id, status);
        Ok(job)
    }
}
