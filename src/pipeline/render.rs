//! PDF rasterisation behind the [`PageRenderer`] seam.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-bound and not
//! safe to drive from async contexts. Every pdfium call runs on tokio's
//! blocking pool so worker threads never stall while pages render.
//!
//! ## Why cap pixels, not DPI?
//!
//! Scanned submissions mix letter pages with oversized plans and photos.
//! `max_rendered_pixels` caps the longest edge regardless of physical size,
//! keeping memory bounded and each image inside the model's sweet spot.

use crate::config::PipelineConfig;
use crate::error::UnderwriteError;
use crate::output::PageRange;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

/// One rasterised page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// 1-based page number.
    pub page: u32,
    pub image: DynamicImage,
}

/// The document-rendering capability the pipeline depends on.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Number of pages in the document.
    async fn page_count(&self, pdf: Arc<Vec<u8>>) -> Result<u32, UnderwriteError>;

    /// Rasterise every page of `range`, in page order.
    async fn render(
        &self,
        pdf: Arc<Vec<u8>>,
        range: PageRange,
    ) -> Result<Vec<RenderedPage>, UnderwriteError>;
}

/// [`PageRenderer`] backed by pdfium.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    library_path: Option<PathBuf>,
    max_pixels: u32,
}

impl PdfiumRenderer {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            library_path: config.pdfium_library_path.clone(),
            max_pixels: config.max_rendered_pixels,
        }
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn page_count(&self, pdf: Arc<Vec<u8>>) -> Result<u32, UnderwriteError> {
        let library = self.library_path.clone();
        tokio::task::spawn_blocking(move || {
            let pdfium = bind(library.as_ref())?;
            let document = open(&pdfium, &pdf)?;
            Ok(document.pages().len() as u32)
        })
        .await
        .map_err(|e| UnderwriteError::Internal(format!("Page count task panicked: {}", e)))?
    }

    async fn render(
        &self,
        pdf: Arc<Vec<u8>>,
        range: PageRange,
    ) -> Result<Vec<RenderedPage>, UnderwriteError> {
        let library = self.library_path.clone();
        let max_pixels = self.max_pixels;
        tokio::task::spawn_blocking(move || {
            render_blocking(library.as_ref(), &pdf, range, max_pixels)
        })
        .await
        .map_err(|e| UnderwriteError::Internal(format!("Render task panicked: {}", e)))?
    }
}

/// Bind pdfium from the configured location, then next to the executable,
/// then the system library path.
fn bind(library_path: Option<&PathBuf>) -> Result<Pdfium, UnderwriteError> {
    let bindings = match library_path {
        Some(path) if path.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
        }
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    };
    bindings
        .map(Pdfium::new)
        .map_err(|e| UnderwriteError::Internal(format!("pdfium library unavailable: {:?}", e)))
}

fn open<'a>(pdfium: &'a Pdfium, bytes: &'a [u8]) -> Result<PdfDocument<'a>, UnderwriteError> {
    pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| UnderwriteError::CorruptPdf {
            detail: format!("{:?}", e),
        })
}

fn render_blocking(
    library_path: Option<&PathBuf>,
    bytes: &[u8],
    range: PageRange,
    max_pixels: u32,
) -> Result<Vec<RenderedPage>, UnderwriteError> {
    let pdfium = bind(library_path)?;
    let document = open(&pdfium, bytes)?;

    let pages = document.pages();
    let total = pages.len() as u32;
    if range.end > total {
        return Err(UnderwriteError::RasterisationFailed {
            page: range.end,
            detail: format!("document has only {} pages", total),
        });
    }

    let render_config = PdfRenderConfig::new()
        .set_target_width(max_pixels as i32)
        .set_maximum_height(max_pixels as i32);

    let mut results = Vec::with_capacity(range.page_count() as usize);
    for page_num in range.pages() {
        let page = pages
            .get((page_num - 1) as u16)
            .map_err(|e| UnderwriteError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            })?;

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            UnderwriteError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_num,
            image.width(),
            image.height()
        );
        results.push(RenderedPage {
            page: page_num,
            image,
        });
    }

    info!("Rendered pages {} ({} images)", range, results.len());
    Ok(results)
}
