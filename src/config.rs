//! Configuration for the underwriting pipeline.
//!
//! Every pipeline knob lives in [`PipelineConfig`], built via its
//! [`PipelineConfigBuilder`]. One struct is shared (behind an `Arc`) by the
//! orchestrator, every stage and the API server, so two runs can be diffed
//! by diffing their configs.

use crate::error::UnderwriteError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for processing underwriting submissions.
///
/// # Example
/// ```rust
/// use edgequake_underwrite::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .batch_size(5)
///     .extraction_concurrency(2)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 5);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Pages per extraction batch. Default: 3.
    ///
    /// Small batches keep each multimodal request inside the model's image
    /// limit and latency budget. The last batch of a document may be shorter.
    pub batch_size: u32,

    /// Maximum extraction batches of one job in flight at once. Default: 1.
    ///
    /// This is a rate-limit knob, not a correctness one: extraction is
    /// serialised by default so a single job never bursts the provider's
    /// request quota. Raise it when the provider tier allows.
    pub extraction_concurrency: usize,

    /// Leading pages shown to the classifier. Default: 1.
    pub classification_pages: u32,

    /// Rendering DPI. Range: 72–400. Default: 150.
    pub dpi: u32,

    /// Cap on either rendered dimension, in pixels. Default: 2000.
    pub max_rendered_pixels: u32,

    /// JPEG quality for extraction images. Default: 60.
    ///
    /// Extraction pages are sent as greyscale JPEG; several pages go into
    /// one request, so payload size matters more than for classification.
    pub jpeg_quality: u8,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for stage calls. Default: 0.0.
    pub temperature: f32,

    /// Sampling temperature for chat answers. Default: 0.1.
    pub chat_temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_tokens: usize,

    /// Retries on a failed model call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 120.
    pub api_timeout_secs: u64,

    /// Ceiling for one job's whole pipeline, in seconds. Default: 1800.
    pub pipeline_timeout_secs: u64,

    /// Download timeout for URL inputs (CLI), in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Directory or file of the pdfium shared library. If None, the
    /// library is looked up next to the executable and then system-wide.
    pub pdfium_library_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            batch_size: 3,
            extraction_concurrency: 1,
            classification_pages: 1,
            dpi: 150,
            max_rendered_pixels: 2000,
            jpeg_quality: 60,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.0,
            chat_temperature: 0.1,
            max_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 120,
            pipeline_timeout_secs: 1800,
            download_timeout_secs: 120,
            pdfium_library_path: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("batch_size", &self.batch_size)
            .field("extraction_concurrency", &self.extraction_concurrency)
            .field("classification_pages", &self.classification_pages)
            .field("dpi", &self.dpi)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("jpeg_quality", &self.jpeg_quality)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("max_retries", &self.max_retries)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("pipeline_timeout_secs", &self.pipeline_timeout_secs)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn batch_size(mut self, pages: u32) -> Self {
        self.config.batch_size = pages.max(1);
        self
    }

    pub fn extraction_concurrency(mut self, n: usize) -> Self {
        self.config.extraction_concurrency = n.max(1);
        self
    }

    pub fn classification_pages(mut self, pages: u32) -> Self {
        self.config.classification_pages = pages.max(1);
        self
    }

    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn jpeg_quality(mut self, q: u8) -> Self {
        self.config.jpeg_quality = q.clamp(1, 100);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn chat_temperature(mut self, t: f32) -> Self {
        self.config.chat_temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn pipeline_timeout_secs(mut self, secs: u64) -> Self {
        self.config.pipeline_timeout_secs = secs;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, UnderwriteError> {
        let c = &self.config;
        if c.max_tokens == 0 {
            return Err(UnderwriteError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if c.api_timeout_secs == 0 || c.pipeline_timeout_secs == 0 {
            return Err(UnderwriteError::InvalidConfig(
                "timeouts must be ≥ 1 second".into(),
            ));
        }
        if c.api_timeout_secs > c.pipeline_timeout_secs {
            return Err(UnderwriteError::InvalidConfig(format!(
                "api_timeout_secs ({}) exceeds pipeline_timeout_secs ({})",
                c.api_timeout_secs, c.pipeline_timeout_secs
            )));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let c = PipelineConfig::default();
        assert_eq!(c.batch_size, 3);
        assert_eq!(c.extraction_concurrency, 1);
        assert_eq!(c.jpeg_quality, 60);
        assert_eq!(c.temperature, 0.0);
        assert_eq!(c.pipeline_timeout_secs, 1800);
    }

    #[test]
    fn builder_clamps() {
        let c = PipelineConfig::builder()
            .batch_size(0)
            .extraction_concurrency(0)
            .dpi(1000)
            .jpeg_quality(0)
            .build()
            .unwrap();
        assert_eq!(c.batch_size, 1);
        assert_eq!(c.extraction_concurrency, 1);
        assert_eq!(c.dpi, 400);
        assert_eq!(c.jpeg_quality, 1);
    }

    #[test]
    fn build_rejects_inverted_timeouts() {
        let err = PipelineConfig::builder()
            .api_timeout_secs(600)
            .pipeline_timeout_secs(60)
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("api_timeout_secs"));
    }

    #[test]
    fn debug_hides_provider() {
        let s = format!("{:?}", PipelineConfig::default());
        assert!(s.contains("batch_size: 3"));
        assert!(s.contains("provider: None"));
    }
}
