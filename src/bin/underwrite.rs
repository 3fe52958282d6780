//! CLI binary for edgequake-underwrite.
//!
//! `underwrite serve` runs the HTTP API over filesystem stores.
//! `underwrite run` pushes one document through the pipeline in-process.

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use edgequake_underwrite::pipeline::input::resolve_input;
use edgequake_underwrite::server::grants::GrantStore;
use edgequake_underwrite::server::{self, AppState};
use edgequake_underwrite::store::{FsJobStore, FsObjectStore, MemoryJobStore, MemoryObjectStore};
use edgequake_underwrite::{
    InsuranceProfile, Job, JobId, JobStatus, Orchestrator, PageRange, PipelineConfig,
    PipelineObserver, StageContext,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress observer using indicatif ────────────────────────────────────

/// Spinner while classifying, then a page bar through extraction. Batches
/// may finish out of order.
struct CliObserver {
    bar: ProgressBar,
    failed_batches: AtomicUsize,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(TICKS),
        );
        bar.set_prefix("Preparing");
        bar.set_message("Uploading document…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self {
            bar,
            failed_batches: AtomicUsize::new(0),
        })
    }
}

impl PipelineObserver for CliObserver {
    fn on_status(&self, _job_id: &JobId, status: JobStatus) {
        let (prefix, msg) = match status {
            JobStatus::Classifying => ("Classifying", "reading the first page…"),
            JobStatus::Extracting => ("Extracting", ""),
            JobStatus::Analyzing => ("Analyzing", "assessing risks…"),
            JobStatus::Acting => ("Acting", "choosing a follow-up…"),
            _ => return,
        };
        self.bar.set_prefix(prefix);
        self.bar.set_message(msg);
    }

    fn on_batches_planned(&self, _job_id: &JobId, ranges: &[PageRange]) {
        let pages: u64 = ranges.iter().map(|r| u64::from(r.page_count())).sum();
        self.bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {prefix:.bold}  \
                 [{bar:42.green/238}] {pos:>3}/{len} pages  {msg}  ⏱ {elapsed_precise}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▉▊▋▌▍▎▏  ")
            .tick_strings(TICKS),
        );
        self.bar.set_length(pages);
        self.bar.println(format!(
            "{} {}",
            green("◆"),
            bold(&format!("{pages} pages in {} batches", ranges.len()))
        ));
    }

    fn on_batch_complete(&self, _job_id: &JobId, range: PageRange, pages: usize) {
        self.bar.println(format!(
            "  {} Pages {:<9} {}",
            green("✓"),
            range.to_string(),
            dim(&format!("{pages} entries"))
        ));
        self.bar.inc(u64::from(range.page_count()));
    }

    fn on_batch_error(&self, _job_id: &JobId, range: PageRange, error: &str) {
        self.failed_batches.fetch_add(1, Ordering::SeqCst);
        let msg: String = if error.chars().count() > 80 {
            error.chars().take(79).chain(std::iter::once('…')).collect()
        } else {
            error.to_string()
        };
        self.bar
            .println(format!("  {} Pages {:<9} {}", red("✗"), range.to_string(), red(&msg)));
        self.bar.inc(u64::from(range.page_count()));
    }

    fn on_job_finished(&self, _job_id: &JobId, status: JobStatus, _error: Option<&str>) {
        self.bar.finish_and_clear();
        if status == JobStatus::Complete {
            eprintln!("{} {}", green("✔"), bold("Underwriting complete"));
        } else {
            eprintln!(
                "{} {} ({} failed batches)",
                red("✘"),
                bold(status.as_str()),
                self.failed_batches.load(Ordering::SeqCst)
            );
        }
    }
}

// ── Arguments ────────────────────────────────────────────────────────────────

/// Underwrite insurance PDF submissions with Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "underwrite",
    version,
    about = "Underwrite insurance PDF submissions with Vision LLMs",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "UNDERWRITE_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "UNDERWRITE_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API.
    Serve(ServeArgs),
    /// Process one document end to end and print the job record.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "UNDERWRITE_ADDR", default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Root directory of the job and object stores.
    #[arg(long, env = "UNDERWRITE_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Lifetime of upload links, in seconds.
    #[arg(long, env = "UNDERWRITE_UPLOAD_TTL", default_value_t = 300)]
    upload_ttl: u64,

    /// Lifetime of document read links, in seconds.
    #[arg(long, env = "UNDERWRITE_READ_TTL", default_value_t = 3600)]
    read_ttl: u64,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Local PDF file path or HTTP/HTTPS URL.
    input: String,

    /// Line of business the submission belongs to.
    #[arg(long, env = "UNDERWRITE_INSURANCE_TYPE", value_enum, default_value = "property-casualty")]
    insurance_type: ProfileArg,

    /// Print the full job record as JSON.
    #[arg(long, env = "UNDERWRITE_JSON")]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "UNDERWRITE_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ProfileArg {
    Life,
    PropertyCasualty,
}

impl From<ProfileArg> for InsuranceProfile {
    fn from(v: ProfileArg) -> Self {
        match v {
            ProfileArg::Life => InsuranceProfile::Life,
            ProfileArg::PropertyCasualty => InsuranceProfile::PropertyCasualty,
        }
    }
}

#[derive(Args, Debug)]
struct PipelineArgs {
    /// LLM model ID (e.g. gpt-4.1-mini, gpt-4.1, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Pages per extraction call.
    #[arg(long, env = "UNDERWRITE_BATCH_SIZE", default_value_t = 3)]
    batch_size: u32,

    /// Extraction calls in flight at once.
    #[arg(short, long, env = "UNDERWRITE_CONCURRENCY", default_value_t = 1)]
    concurrency: usize,

    /// Pages shown to the classifier.
    #[arg(long, env = "UNDERWRITE_CLASSIFICATION_PAGES", default_value_t = 1)]
    classification_pages: u32,

    /// Rendering DPI (72–400).
    #[arg(long, env = "UNDERWRITE_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Longest rendered edge in pixels.
    #[arg(long, env = "UNDERWRITE_MAX_PIXELS", default_value_t = 2000)]
    max_pixels: u32,

    /// JPEG quality of extraction images (1–100).
    #[arg(long, env = "UNDERWRITE_JPEG_QUALITY", default_value_t = 60,
          value_parser = clap::value_parser!(u8).range(1..=100))]
    jpeg_quality: u8,

    /// Max LLM output tokens per call.
    #[arg(long, env = "UNDERWRITE_MAX_TOKENS", default_value_t = 4096)]
    max_tokens: usize,

    /// LLM temperature for pipeline stages (0.0–2.0).
    #[arg(long, env = "UNDERWRITE_TEMPERATURE", default_value_t = 0.0)]
    temperature: f32,

    /// LLM temperature for chat (0.0–2.0).
    #[arg(long, env = "UNDERWRITE_CHAT_TEMPERATURE", default_value_t = 0.1)]
    chat_temperature: f32,

    /// Retries per model call.
    #[arg(long, env = "UNDERWRITE_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Base backoff between retries, in milliseconds.
    #[arg(long, env = "UNDERWRITE_RETRY_BACKOFF_MS", default_value_t = 500)]
    retry_backoff_ms: u64,

    /// Per-call LLM timeout in seconds.
    #[arg(long, env = "UNDERWRITE_API_TIMEOUT", default_value_t = 120)]
    api_timeout: u64,

    /// Ceiling on one whole pipeline run, in seconds.
    #[arg(long, env = "UNDERWRITE_PIPELINE_TIMEOUT", default_value_t = 1800)]
    pipeline_timeout: u64,

    /// HTTP download timeout in seconds.
    #[arg(long, env = "UNDERWRITE_DOWNLOAD_TIMEOUT", default_value_t = 120)]
    download_timeout: u64,

    /// Directory holding libpdfium (or the library file itself).
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib: Option<PathBuf>,
}

impl PipelineArgs {
    fn to_config(&self) -> Result<PipelineConfig> {
        let mut builder = PipelineConfig::builder()
            .batch_size(self.batch_size)
            .extraction_concurrency(self.concurrency)
            .classification_pages(self.classification_pages)
            .dpi(self.dpi)
            .max_rendered_pixels(self.max_pixels)
            .jpeg_quality(self.jpeg_quality)
            .max_tokens(self.max_tokens)
            .temperature(self.temperature)
            .chat_temperature(self.chat_temperature)
            .max_retries(self.max_retries)
            .retry_backoff_ms(self.retry_backoff_ms)
            .api_timeout_secs(self.api_timeout)
            .pipeline_timeout_secs(self.pipeline_timeout)
            .download_timeout_secs(self.download_timeout);
        if let Some(ref model) = self.model {
            builder = builder.model(model);
        }
        if let Some(ref provider) = self.provider {
            builder = builder.provider_name(provider);
        }
        if let Some(ref path) = self.pdfium_lib {
            builder = builder.pdfium_library_path(path);
        }
        builder.build().context("Invalid pipeline configuration")
    }
}

// ── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The progress bar replaces INFO logs during `run`.
    let bar_active = match &cli.command {
        Command::Run(args) => !cli.quiet && !args.no_progress && !args.json,
        Command::Serve(_) => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || bar_active {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Serve(args) => serve(args).await,
        Command::Run(args) => run(args, bar_active, cli.quiet).await,
    }
}

async fn serve(args: ServeArgs) -> Result<()> {
    let config = args.pipeline.to_config()?;
    let jobs = FsJobStore::open(&args.data_dir)
        .await
        .with_context(|| format!("Failed to open job store in {:?}", args.data_dir))?;
    let objects = FsObjectStore::open(&args.data_dir)
        .await
        .with_context(|| format!("Failed to open object store in {:?}", args.data_dir))?;

    let ctx = StageContext::new(config, Arc::new(jobs), Arc::new(objects))
        .context("Failed to initialise the LLM provider")?;
    let grants = GrantStore::new(
        Duration::from_secs(args.upload_ttl),
        Duration::from_secs(args.read_ttl),
    );
    let state = AppState::new(ctx, grants);

    server::serve(args.addr, state)
        .await
        .with_context(|| format!("API server on {} failed", args.addr))
}

async fn run(args: RunArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let config = args.pipeline.to_config()?;
    let input = resolve_input(&args.input, config.download_timeout_secs)
        .await
        .with_context(|| format!("Failed to read {}", args.input))?;

    let ctx = StageContext::new(
        config,
        Arc::new(MemoryJobStore::new()),
        Arc::new(MemoryObjectStore::new()),
    )
    .context("Failed to initialise the LLM provider")?;

    let mut orchestrator = Orchestrator::new(ctx);
    if show_progress {
        orchestrator = orchestrator.with_observer(CliObserver::new());
    }

    let job = orchestrator
        .submit(&input.filename, input.bytes, args.insurance_type.into(), None)
        .await
        .context("Failed to submit document")?;
    let job = orchestrator
        .run(&job.job_id)
        .await
        .context("Pipeline could not run")?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&job).context("Failed to serialise job")?
        );
    } else if !quiet {
        print_report(&job);
    }

    if job.status != JobStatus::Complete {
        bail!(
            "Job {} ended {}: {}",
            job.job_id,
            job.status,
            job.error_message.as_deref().unwrap_or("no detail")
        );
    }
    Ok(())
}

fn print_report(job: &Job) {
    println!("{}", bold(&job.original_filename));
    println!("Job:             {}", job.job_id);
    println!("Line:            {}", job.insurance_type.display_name());
    println!("Status:          {}", job.status);
    if let Some(ref label) = job.classification {
        println!("Document type:   {}", label);
    }
    if let Some(pages) = job.page_count {
        println!("Pages:           {}", pages);
    }

    if let Some(ref analysis) = job.analysis {
        if let Some(ref summary) = analysis.summary {
            println!("\n{}\n{}", bold("Summary"), summary);
        }
        println!("\n{}", bold("Risks"));
        for risk in &analysis.risks {
            println!(
                "  - [{:?}] {} {}",
                risk.severity,
                risk.description,
                dim(&format!("{:?}", risk.page_references))
            );
        }
        if !analysis.discrepancies.is_empty() {
            println!("\n{}", bold("Discrepancies"));
            for d in &analysis.discrepancies {
                println!("  - {} {}", d.description, dim(&format!("{:?}", d.page_references)));
            }
        }
        println!("\n{}\n{}", bold("Recommendation"), analysis.final_recommendation);
    }

    if let Some(ref action) = job.action {
        println!("\n{} {}", bold("Action:"), action.confirmation);
        println!("{}", dim(&format!("artifact: {}", action.artifact_key)));
    }
}
