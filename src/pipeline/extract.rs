//! Page extraction: one page-range batch through the multimodal model.
//!
//! A batch is a self-contained unit of work. It reads the job and the
//! document, renders only its own pages, and writes only its own page keys:
//! the chunk object `extracted/{job_id}/{start}-{end}.json` and the
//! matching entries of the job's extraction collection. Sibling batches
//! never see each other.

use super::encode::encode_greyscale_jpeg;
use super::llm::{ModelRequest, Turn};
use super::parse::{page_blocks, PageBlock};
use super::{Stage, StageContext};
use crate::error::UnderwriteError;
use crate::job::{JobId, JobUpdate};
use crate::output::{ExtractionChunk, PageEntry, PageRange, UNKNOWN_PAGE_TYPE};
use crate::profile::OTHER_LABEL;
use crate::prompts;
use crate::store::put_json;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Extract pages `range` of the job's document.
pub async fn extract_batch(
    ctx: &StageContext,
    job_id: &JobId,
    range: PageRange,
) -> Result<ExtractionChunk, UnderwriteError> {
    let job = ctx.jobs.get(job_id).await?;
    let profile = job.insurance_type;
    let classification = job
        .classification
        .clone()
        .unwrap_or_else(|| OTHER_LABEL.to_string());
    let pdf = ctx.load_document(&job).await?;

    let quality = ctx.config.jpeg_quality;
    let (images, captions) = ctx
        .page_images(pdf, range, |img| encode_greyscale_jpeg(img, quality))
        .await?;

    let text = format!(
        "{}\n\n{}",
        prompts::extraction_prompt(profile, &classification, range),
        captions
    );
    let request = ModelRequest::new(Stage::Extract, prompts::extraction_system(profile))
        .turn(Turn::user(text).with_images(images))
        .range(range);

    let reply = ctx.model.converse(request).await?;
    debug!(
        job_id = %job_id,
        pages = %range,
        "Extraction reply: {} chars, {} output tokens",
        reply.text.len(),
        reply.output_tokens
    );

    let pages = entries_for_range(range, page_blocks(&reply.text))?;

    let chunk = ExtractionChunk {
        job_id: job_id.clone(),
        range,
        classification,
        pages,
    };
    put_json(
        ctx.objects.as_ref(),
        &ExtractionChunk::object_key(job_id, range),
        &chunk,
    )
    .await?;
    ctx.jobs
        .apply(job_id, JobUpdate::ExtractedPages(chunk.pages.clone()))
        .await?;

    info!(job_id = %job_id, pages = %range, "Batch extracted");
    Ok(chunk)
}

/// Turn parsed blocks into exactly one entry per page of `range`.
///
/// Blocks outside the range are dropped, a repeated page keeps its first
/// block, and pages without a block get a placeholder. A response with no
/// usable block at all is an unparseable-output failure.
pub fn entries_for_range(range: PageRange, blocks: Vec<PageBlock>) -> Result<Vec<PageEntry>, UnderwriteError> {
    let mut by_page: BTreeMap<u32, PageEntry> = BTreeMap::new();

    for block in blocks {
        if !range.contains(block.page) {
            warn!(
                "Dropping extraction block for page {} outside batch {}",
                block.page, range
            );
            continue;
        }
        if by_page.contains_key(&block.page) {
            warn!("Ignoring repeated extraction block for page {}", block.page);
            continue;
        }
        let entry = PageEntry {
            page_number: block.page,
            page_type: block
                .page_type
                .unwrap_or_else(|| UNKNOWN_PAGE_TYPE.to_string()),
            content: block.content.unwrap_or(block.raw),
        };
        by_page.insert(block.page, entry);
    }

    if by_page.is_empty() {
        return Err(UnderwriteError::UnparseableOutput {
            stage: Stage::Extract,
            detail: format!("no <output page=\"N\"> block for pages {}", range),
        });
    }

    for page in range.pages() {
        by_page.entry(page).or_insert_with(|| {
            warn!("No extraction output for page {}, storing placeholder", page);
            PageEntry::placeholder(page)
        });
    }

    Ok(by_page.into_values().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(page: u32, page_type: Option<&str>, content: Option<&str>, raw: &str) -> PageBlock {
        PageBlock {
            page,
            page_type: page_type.map(str::to_string),
            content: content.map(str::to_string),
            raw: raw.to_string(),
        }
    }

    #[test]
    fn fills_placeholders_and_drops_strays() {
        let range = PageRange::new(4, 6).unwrap();
        let blocks = vec![
            block(4, Some("Lab Report"), Some("HbA1c 5.4%"), ""),
            block(9, Some("Stray"), Some("x"), ""),
            block(6, None, None, "loose text"),
            block(4, Some("Duplicate"), Some("y"), ""),
        ];
        let entries = entries_for_range(range, blocks).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].page_type, "Lab Report");
        assert_eq!(entries[1], PageEntry::placeholder(5));
        assert_eq!(entries[2].page_type, UNKNOWN_PAGE_TYPE);
        assert_eq!(entries[2].content, "loose text");
    }

    #[test]
    fn no_usable_block_is_a_failure() {
        let range = PageRange::new(1, 3).unwrap();
        let err = entries_for_range(range, vec![block(7, None, None, "")]).unwrap_err();
        assert!(matches!(
            err,
            UnderwriteError::UnparseableOutput {
                stage: Stage::Extract,
                ..
            }
        ));
        assert!(entries_for_range(range, vec![]).is_err());
    }
}
