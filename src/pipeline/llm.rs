//! Model interaction: the [`ModelClient`] seam and its provider adapter.
//!
//! Stages never talk to an `LLMProvider` directly. They build a
//! [`ModelRequest`] (system prompt, turns, optional page images) and hand
//! it to a [`ModelClient`]. Production uses [`ProviderModel`], which wraps an
//! edgequake-llm provider with retry, backoff and a per-call timeout; tests
//! plug in a scripted client so the whole pipeline runs offline.
//!
//! ## Retry Strategy
//!
//! HTTP 429 / 503 errors from LLM APIs are transient and frequent under
//! load. Exponential backoff (`retry_backoff_ms * 2^attempt`) with 500 ms
//! base and 3 retries waits 500 ms → 1 s → 2 s before giving up. A call that
//! exceeds `api_timeout_secs` counts as a failed attempt.

use crate::config::PipelineConfig;
use crate::error::UnderwriteError;
use crate::output::PageRange;
use crate::pipeline::Stage;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

/// Who said a [`Turn`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Speaker {
    User,
    Assistant,
}

/// One conversational turn sent to the model.
#[derive(Clone)]
pub struct Turn {
    pub speaker: Speaker,
    pub text: String,
    /// Page images attached to a user turn, in page order.
    pub images: Vec<ImageData>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::User,
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            speaker: Speaker::Assistant,
            text: text.into(),
            images: Vec::new(),
        }
    }

    pub fn with_images(mut self, images: Vec<ImageData>) -> Self {
        self.images = images;
        self
    }
}

/// Everything one model call needs.
#[derive(Clone)]
pub struct ModelRequest {
    pub stage: Stage,
    pub system: String,
    pub turns: Vec<Turn>,
    /// Page range the request covers (extraction batches only).
    pub range: Option<PageRange>,
    /// Overrides `PipelineConfig::max_tokens` for this call.
    pub max_tokens: Option<usize>,
    /// Overrides `PipelineConfig::temperature` for this call.
    pub temperature: Option<f32>,
}

impl ModelRequest {
    pub fn new(stage: Stage, system: impl Into<String>) -> Self {
        Self {
            stage,
            system: system.into(),
            turns: Vec::new(),
            range: None,
            max_tokens: None,
            temperature: None,
        }
    }

    pub fn turn(mut self, turn: Turn) -> Self {
        self.turns.push(turn);
        self
    }

    pub fn range(mut self, range: PageRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.max_tokens = Some(n);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = Some(t);
        self
    }

    /// Number of images across all turns.
    pub fn image_count(&self) -> usize {
        self.turns.iter().map(|t| t.images.len()).sum()
    }
}

/// Model output and accounting for one call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelReply {
    pub text: String,
    pub input_tokens: usize,
    pub output_tokens: usize,
    /// Attempts beyond the first that were needed.
    pub retries: u32,
}

impl ModelReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// The multimodal model capability the pipeline depends on.
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Run one request to completion. Implementations own their retry
    /// policy; an `Err` is final for the calling stage.
    async fn converse(&self, request: ModelRequest) -> Result<ModelReply, UnderwriteError>;
}

/// [`ModelClient`] backed by an edgequake-llm provider.
pub struct ProviderModel {
    provider: Arc<dyn LLMProvider>,
    temperature: f32,
    max_tokens: usize,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
}

impl ProviderModel {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
        }
    }

    /// Resolve the provider from `config` (see [`resolve_provider`]) and wrap it.
    pub fn from_config(config: &PipelineConfig) -> Result<Self, UnderwriteError> {
        let provider = resolve_provider(config)?;
        Ok(Self::new(provider, config))
    }

    fn build_messages(request: &ModelRequest) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(request.turns.len() + 1);
        messages.push(ChatMessage::system(request.system.as_str()));
        for turn in &request.turns {
            let message = match turn.speaker {
                Speaker::User if !turn.images.is_empty() => {
                    ChatMessage::user_with_images(turn.text.as_str(), turn.images.clone())
                }
                Speaker::User => ChatMessage::user(turn.text.as_str()),
                Speaker::Assistant => ChatMessage::assistant(turn.text.as_str()),
            };
            messages.push(message);
        }
        messages
    }
}

#[async_trait]
impl ModelClient for ProviderModel {
    async fn converse(&self, request: ModelRequest) -> Result<ModelReply, UnderwriteError> {
        let start = Instant::now();
        let messages = Self::build_messages(&request);
        let options = build_options(
            request.temperature.unwrap_or(self.temperature),
            request.max_tokens.unwrap_or(self.max_tokens),
        );
        let label = match request.range {
            Some(range) => format!("{} [pages {}]", request.stage, range),
            None => request.stage.to_string(),
        };

        let mut last_err: Option<String> = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = self.retry_backoff_ms * 2u64.pow(attempt - 1);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    label, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let call = self.provider.chat(&messages, Some(&options));
            match timeout(Duration::from_secs(self.api_timeout_secs), call).await {
                Ok(Ok(response)) => {
                    debug!(
                        "{}: {} images, {} input tokens, {} output tokens, {:?}",
                        label,
                        request.image_count(),
                        response.prompt_tokens,
                        response.completion_tokens,
                        start.elapsed()
                    );
                    return Ok(ModelReply {
                        text: response.content,
                        input_tokens: response.prompt_tokens,
                        output_tokens: response.completion_tokens,
                        retries: attempt,
                    });
                }
                Ok(Err(e)) => {
                    let err_msg = format!("{}", e);
                    warn!("{}: attempt {} failed: {}", label, attempt + 1, err_msg);
                    last_err = Some(err_msg);
                }
                Err(_) => {
                    let err_msg = format!("no response within {}s", self.api_timeout_secs);
                    warn!("{}: attempt {} timed out", label, attempt + 1);
                    last_err = Some(err_msg);
                }
            }
        }

        Err(UnderwriteError::ModelCallFailed {
            stage: request.stage,
            retries: self.max_retries,
            detail: last_err.unwrap_or_else(|| "Unknown error".to_string()),
        })
    }
}

/// Build `CompletionOptions` for one call.
fn build_options(temperature: f32, max_tokens: usize) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(temperature),
        max_tokens: Some(max_tokens),
        ..Default::default()
    }
}

const DEFAULT_MODEL: &str = "gpt-4.1-mini";

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, UnderwriteError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        UnderwriteError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. **Pre-built provider** (`config.provider`), used as-is.
/// 2. **Named provider + model** (`config.provider_name`).
/// 3. **Environment pair** (`EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL`),
///    honoured only when both are set.
/// 4. **OpenAI** when `OPENAI_API_KEY` is present, so a machine holding
///    several keys still defaults to one predictable provider.
/// 5. **Full auto-detection** via [`ProviderFactory::from_env`].
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, UnderwriteError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| UnderwriteError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}
