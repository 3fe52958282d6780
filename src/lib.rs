//! # edgequake-underwrite
//!
//! Underwrite insurance submissions with Vision Language Models (VLMs).
//!
//! A submission is a PDF bundle: application forms, medical or inspection
//! reports, financial statements. This crate rasterises its pages, lets a
//! VLM read them as an underwriter would, and turns the result into a
//! structured risk analysis plus one automated follow-up action.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload ──▶ ObjectCreated ──▶ Orchestrator
//!                                 │
//!                                 ├─ 1. Classify  first page(s) → document type
//!                                 ├─ 2. Plan      page count → contiguous batches
//!                                 ├─ 3. Extract   one VLM call per batch (bounded fan-out)
//!                                 ├─ 4. Analyze   all pages → risks, discrepancies, recommendation
//!                                 └─ 5. Act       agent picks one tool (notice / request / review)
//!
//! chat: question answering over a COMPLETE job, with calculator tools
//! ```
//!
//! Every stage reads and writes the [`store::JobStore`] and
//! [`store::ObjectStore`]; only the [`Orchestrator`] changes a job's status.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_underwrite::store::{MemoryJobStore, MemoryObjectStore};
//! use edgequake_underwrite::{InsuranceProfile, Orchestrator, PipelineConfig, StageContext};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = PipelineConfig::builder().batch_size(3).build()?;
//!     let ctx = StageContext::new(
//!         config,
//!         Arc::new(MemoryJobStore::new()),
//!         Arc::new(MemoryObjectStore::new()),
//!     )?;
//!     let orchestrator = Orchestrator::new(ctx);
//!
//!     let bytes = std::fs::read("application.pdf")?;
//!     let job = orchestrator
//!         .submit("application.pdf", bytes, InsuranceProfile::Life, None)
//!         .await?;
//!     let job = orchestrator.run(&job.job_id).await?;
//!     println!("{} → {:?}", job.status, job.action.map(|a| a.confirmation));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `underwrite` binary (clap + anyhow + indicatif + tracing-subscriber) |
//! | `server` | on      | The axum HTTP API in [`server`] |
//!
//! Library-only use:
//! ```toml
//! edgequake-underwrite = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod job;
pub mod orchestrator;
pub mod output;
pub mod pipeline;
pub mod profile;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod store;
pub mod trigger;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder};
pub use error::{BatchError, UnderwriteError};
pub use job::{Job, JobId, JobStatus, JobSummary, JobUpdate};
pub use orchestrator::Orchestrator;
pub use output::{
    ActionOutcome, AnalysisResult, ChatReply, ChatRole, ChatTurn, ExtractionChunk, ExtractionSet,
    PageEntry, PageRange,
};
pub use pipeline::chat::chat;
pub use pipeline::{Stage, StageContext};
pub use profile::InsuranceProfile;
pub use progress::{BroadcastObserver, NoopObserver, Observer, PipelineEvent, PipelineObserver};
pub use trigger::{ObjectCreated, TriggerDispatcher};
