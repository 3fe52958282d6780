//! Pipeline stages for underwriting a submitted document.
//!
//! Each submodule implements exactly one stage or one shared helper. Stages
//! know nothing about their neighbours: they read what they need from the
//! stores, write the fields they own, and return. Sequencing and every
//! status change belong to [`crate::orchestrator`].
//!
//! ## Data Flow
//!
//! ```text
//! classify ──▶ plan ──▶ extract × N ──▶ analyze ──▶ act
//! (label)     (ranges)  (fan-out/in)    (risks)     (tool)
//!
//! chat: on demand, against a COMPLETE job
//! ```
//!
//! Shared helpers:
//! - [`input`] : upload validation and CLI input resolution
//! - [`render`]: rasterise pages; pdfium runs in `spawn_blocking`
//! - [`encode`]: PNG / greyscale JPEG base64 payloads
//! - [`llm`]   : the [`llm::ModelClient`] seam with retry/backoff/timeout
//! - [`parse`] : payload extraction from free-text model output

pub mod act;
pub mod analyze;
pub mod chat;
pub mod classify;
pub mod encode;
pub mod extract;
pub mod input;
pub mod llm;
pub mod parse;
pub mod plan;
pub mod render;

use crate::config::PipelineConfig;
use crate::error::UnderwriteError;
use crate::job::Job;
use crate::output::PageRange;
use crate::store::{JobStore, ObjectStore};
use edgequake_llm::ImageData;
use llm::ModelClient;
use render::PageRenderer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The collaborators every stage works against.
///
/// Cheap to clone; each stage invocation gets its own copy and shares
/// nothing else with its siblings.
#[derive(Clone)]
pub struct StageContext {
    pub config: Arc<PipelineConfig>,
    pub jobs: Arc<dyn JobStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub model: Arc<dyn ModelClient>,
    pub renderer: Arc<dyn PageRenderer>,
}

impl StageContext {
    /// Context backed by the configured LLM provider and the pdfium
    /// renderer.
    pub fn new(
        config: PipelineConfig,
        jobs: Arc<dyn JobStore>,
        objects: Arc<dyn ObjectStore>,
    ) -> Result<Self, UnderwriteError> {
        let model = llm::ProviderModel::from_config(&config)?;
        let renderer = render::PdfiumRenderer::new(&config);
        Ok(Self {
            config: Arc::new(config),
            jobs,
            objects,
            model: Arc::new(model),
            renderer: Arc::new(renderer),
        })
    }

    /// Fetch the job's uploaded document.
    pub async fn load_document(&self, job: &Job) -> Result<Arc<Vec<u8>>, UnderwriteError> {
        Ok(Arc::new(self.objects.get(&job.object_key).await?))
    }

    /// Render `range` and encode each page with `encode`, returning the
    /// images and the caption block that names them.
    pub async fn page_images<F>(
        &self,
        pdf: Arc<Vec<u8>>,
        range: PageRange,
        encode: F,
    ) -> Result<(Vec<ImageData>, String), UnderwriteError>
    where
        F: Fn(&image::DynamicImage) -> Result<ImageData, image::ImageError>,
    {
        let rendered = self.renderer.render(pdf, range).await?;
        let mut images = Vec::with_capacity(rendered.len());
        let mut captions = Vec::with_capacity(rendered.len());
        for page in &rendered {
            let data = encode(&page.image).map_err(|e| UnderwriteError::RasterisationFailed {
                page: page.page,
                detail: format!("Image encoding failed: {}", e),
            })?;
            images.push(data);
            captions.push(crate::prompts::page_image_caption(page.page));
        }
        Ok((images, captions.join("\n")))
    }
}

/// The model-calling steps of the pipeline, plus chat.
///
/// Carried on model requests and errors so logs and failure messages say
/// which step went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Classify,
    Extract,
    Analyze,
    Act,
    Chat,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Classify => "classify",
            Stage::Extract => "extract",
            Stage::Analyze => "analyze",
            Stage::Act => "act",
            Stage::Chat => "chat",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
