//! Classification: label the document from its first page(s).

use super::encode::encode_png;
use super::llm::{ModelRequest, Turn};
use super::parse::json_object;
use super::{Stage, StageContext};
use crate::error::UnderwriteError;
use crate::job::{JobId, JobUpdate};
use crate::output::PageRange;
use crate::prompts;
use serde_json::Value;
use tracing::{debug, info};

/// What classification learned about the document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub label: &'static str,
    pub page_count: u32,
}

/// Classify the job's document and record the label and page count.
///
/// Fails with `EmptyDocument` for a zero-page PDF and `UnparseableOutput`
/// when the response carries no `document_type`. A label outside the
/// profile's set is recorded as `OTHER`.
pub async fn classify(ctx: &StageContext, job_id: &JobId) -> Result<Classification, UnderwriteError> {
    let job = ctx.jobs.get(job_id).await?;
    let profile = job.insurance_type;
    let pdf = ctx.load_document(&job).await?;

    let page_count = ctx.renderer.page_count(pdf.clone()).await?;
    let range = PageRange::new(1, ctx.config.classification_pages.min(page_count))
        .ok_or(UnderwriteError::EmptyDocument)?;

    let (images, captions) = ctx.page_images(pdf, range, encode_png).await?;
    let text = format!("{}\n\n{}", prompts::classification_prompt(profile), captions);
    let request = ModelRequest::new(Stage::Classify, prompts::classification_system(profile))
        .turn(Turn::user(text).with_images(images))
        .range(range);

    let reply = ctx.model.converse(request).await?;
    debug!(job_id = %job_id, "Classification reply: {}", reply.text);

    let raw_label = json_object(&reply.text)
        .and_then(|obj| match obj.get("document_type") {
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.clone()),
            _ => None,
        })
        .ok_or_else(|| UnderwriteError::UnparseableOutput {
            stage: Stage::Classify,
            detail: "response carries no \"document_type\" value".to_string(),
        })?;

    let label = profile.normalise_label(&raw_label);
    ctx.jobs
        .apply(
            job_id,
            JobUpdate::Classification {
                label: label.to_string(),
                page_count,
            },
        )
        .await?;

    info!(job_id = %job_id, label, page_count, "Document classified");
    Ok(Classification { label, page_count })
}
