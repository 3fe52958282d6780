//! Aggregation: combine every page entry into one underwriting analysis.
//!
//! The stage reads the chunk objects the extraction batches wrote, checks
//! that they cover the document exactly once, and asks the model for a
//! JSON assessment wrapped in `<output>`. The payload is validated before
//! anything is stored: missing required keys fail the stage, and page
//! references outside the document are removed.

use super::llm::{ModelRequest, Turn};
use super::parse::{json_object, page_references};
use super::{Stage, StageContext};
use crate::error::UnderwriteError;
use crate::job::{Job, JobId, JobUpdate};
use crate::output::{
    AnalysisResult, Discrepancy, DomainSection, ExtractionChunk, ExtractionSet, MissingItem,
    RiskFinding, Severity,
};
use crate::profile::InsuranceProfile;
use crate::prompts;
use crate::store::get_json;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

const KEY_SUMMARY: &str = "SUMMARY";
const KEY_RISKS: &str = "RISK_ASSESSMENT";
const KEY_DISCREPANCIES: &str = "DISCREPANCIES";
const KEY_RECOMMENDATION: &str = "FINAL_RECOMMENDATION";
const KEY_MISSING: &str = "MISSING_INFORMATION";
const KEY_CONFIDENCE: &str = "CONFIDENCE_SCORE";

/// Load every extraction chunk of `job` and assemble the full page set.
pub async fn load_extraction_set(ctx: &StageContext, job: &Job) -> Result<ExtractionSet, UnderwriteError> {
    let total_pages = job.page_count.ok_or_else(|| {
        UnderwriteError::Internal(format!("job {} has no page count", job.job_id))
    })?;

    let prefix = format!("extracted/{}/", job.job_id);
    let mut chunks = Vec::new();
    for key in ctx.objects.list(&prefix).await? {
        if !key.ends_with(".json") {
            continue;
        }
        let chunk: ExtractionChunk = get_json(ctx.objects.as_ref(), &key).await?;
        chunks.push(chunk);
    }
    debug!(job_id = %job.job_id, chunks = chunks.len(), "Loaded extraction chunks");

    ExtractionSet::assemble(total_pages, chunks)
}

/// Analyse the job's complete extraction and record the result.
pub async fn analyze(ctx: &StageContext, job_id: &JobId) -> Result<AnalysisResult, UnderwriteError> {
    let job = ctx.jobs.get(job_id).await?;
    let profile = job.insurance_type;
    let set = load_extraction_set(ctx, &job).await?;
    let total_pages = set.total_pages();

    let extraction_json = serde_json::to_string_pretty(&set.to_prompt_json())?;
    let request = ModelRequest::new(Stage::Analyze, prompts::analysis_system(profile)).turn(
        Turn::user(prompts::analysis_prompt(profile, &extraction_json, total_pages)),
    );

    let reply = ctx.model.converse(request).await?;
    let result = parse_analysis(profile, total_pages, &reply.text)?;

    ctx.jobs
        .apply(job_id, JobUpdate::Analysis(result.clone()))
        .await?;
    info!(
        job_id = %job_id,
        risks = result.risks.len(),
        discrepancies = result.discrepancies.len(),
        "Analysis recorded"
    );
    Ok(result)
}

/// Validate the model's analysis payload for a `total_pages` document.
pub fn parse_analysis(
    profile: InsuranceProfile,
    total_pages: u32,
    text: &str,
) -> Result<AnalysisResult, UnderwriteError> {
    let obj = json_object(text).ok_or_else(|| unparseable("no JSON object in response"))?;

    let domain_kind = profile.domain_section();
    for key in [KEY_RISKS, KEY_DISCREPANCIES, domain_kind.key(), KEY_RECOMMENDATION] {
        if !obj.contains_key(key) {
            return Err(unparseable(&format!("missing required key {key}")));
        }
    }

    let risks = list(&obj, KEY_RISKS)?
        .iter()
        .filter_map(|item| {
            let (description, fields) = described(item)?;
            Some(RiskFinding {
                description,
                severity: fields
                    .and_then(|f| f.get("severity"))
                    .and_then(Value::as_str)
                    .map(Severity::from_label)
                    .unwrap_or_default(),
                page_references: cited(fields, total_pages),
            })
        })
        .collect();

    let discrepancies = list(&obj, KEY_DISCREPANCIES)?
        .iter()
        .filter_map(|item| {
            let (description, fields) = described(item)?;
            Some(Discrepancy {
                description,
                detail: fields
                    .and_then(|f| f.get("detail").or_else(|| f.get("details")))
                    .map(text_of)
                    .unwrap_or_default(),
                page_references: cited(fields, total_pages),
            })
        })
        .collect();

    let missing_information = match obj.get(KEY_MISSING) {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(MissingItem {
                    item: s.clone(),
                    notes: String::new(),
                }),
                Value::Object(m) => Some(MissingItem {
                    item: m.get("item").map(text_of)?,
                    notes: m.get("notes").map(text_of).unwrap_or_default(),
                }),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let confidence_score = match obj.get(KEY_CONFIDENCE) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .map(|c| c.clamp(0.0, 1.0) as f32);

    let summary = obj
        .get(KEY_SUMMARY)
        .map(text_of)
        .filter(|s| !s.trim().is_empty());

    let domain_text = obj.get(domain_kind.key()).map(text_of).unwrap_or_default();
    let final_recommendation = obj.get(KEY_RECOMMENDATION).map(text_of).unwrap_or_default();

    Ok(AnalysisResult {
        summary,
        risks,
        discrepancies,
        domain_section: DomainSection {
            kind: domain_kind,
            text: domain_text,
        },
        final_recommendation,
        missing_information,
        confidence_score,
    })
}

fn unparseable(detail: &str) -> UnderwriteError {
    UnderwriteError::UnparseableOutput {
        stage: Stage::Analyze,
        detail: detail.to_string(),
    }
}

fn list<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a [Value], UnderwriteError> {
    match obj.get(key) {
        Some(Value::Array(items)) => Ok(items.as_slice()),
        Some(Value::Null) => Ok(&[]),
        _ => Err(unparseable(&format!("{key} must be a list"))),
    }
}

/// Description of a finding plus its object fields. Plain strings are
/// accepted as a description without fields.
fn described(item: &Value) -> Option<(String, Option<&Map<String, Value>>)> {
    match item {
        Value::String(s) if !s.trim().is_empty() => Some((s.clone(), None)),
        Value::Object(m) => {
            let description = m.get("description").map(text_of)?;
            if description.trim().is_empty() {
                return None;
            }
            Some((description, Some(m)))
        }
        _ => {
            warn!("Skipping malformed finding: {}", item);
            None
        }
    }
}

/// Page references of a finding, keeping only pages of the document.
fn cited(fields: Option<&Map<String, Value>>, total_pages: u32) -> Vec<u32> {
    let Some(raw) = fields.and_then(|f| f.get("page_references")) else {
        return Vec::new();
    };
    let (kept, dropped): (Vec<u32>, Vec<u32>) = page_references(raw)
        .into_iter()
        .partition(|p| (1..=total_pages).contains(p));
    if !dropped.is_empty() {
        warn!(
            "Removed page references {:?} outside 1-{}",
            dropped, total_pages
        );
    }
    kept
}

/// String values as-is; anything else as compact JSON.
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::DomainSectionKind;

    const LIFE_REPLY: &str = r#"<thinking>reviewing</thinking>
<output>
{
  "SUMMARY": "Application for a 45 year old.",
  "RISK_ASSESSMENT": [
    {"description": "Elevated HbA1c", "severity": "moderate", "page_references": ["3", "5-6"]},
    {"description": "Smoker", "severity": "High", "page_references": [2, 41]},
    "Family history of heart disease",
    {"severity": "Low"}
  ],
  "DISCREPANCIES": [
    {"description": "Height differs", "detail": "180 cm on p1, 175 cm on p4", "page_references": ["pg 1", "4"]}
  ],
  "MEDICAL_TIMELINE": "- 2019: diagnosis (pg 3)",
  "FINAL_RECOMMENDATION": "Order an APS.",
  "MISSING_INFORMATION": [{"item": "Lab panel", "notes": "not attached"}, "Signature"],
  "CONFIDENCE_SCORE": "0.8"
}
</output>"#;

    #[test]
    fn parses_and_bounds_references() {
        let a = parse_analysis(InsuranceProfile::Life, 7, LIFE_REPLY).unwrap();
        assert_eq!(a.risks.len(), 3);
        assert_eq!(a.risks[0].severity, Severity::Medium);
        assert_eq!(a.risks[0].page_references, vec![3, 5, 6]);
        assert_eq!(a.risks[1].page_references, vec![2]);
        assert_eq!(a.risks[2].severity, Severity::Unknown);
        assert_eq!(a.discrepancies[0].page_references, vec![1, 4]);
        assert_eq!(a.domain_section.kind, DomainSectionKind::MedicalTimeline);
        assert_eq!(a.missing_information.len(), 2);
        assert_eq!(a.confidence_score, Some(0.8));
        assert!(a.cited_pages().all(|p| (1..=7).contains(&p)));
    }

    #[test]
    fn wrong_profile_section_is_missing_key() {
        let err = parse_analysis(InsuranceProfile::PropertyCasualty, 7, LIFE_REPLY).unwrap_err();
        assert!(err.to_string().contains("PROPERTY_ASSESSMENT"), "got {err}");
    }

    #[test]
    fn garbage_fails() {
        assert!(parse_analysis(InsuranceProfile::Life, 3, "I cannot help with that.").is_err());
        let not_list = r#"<output>{"RISK_ASSESSMENT": "none", "DISCREPANCIES": [],
            "MEDICAL_TIMELINE": "", "FINAL_RECOMMENDATION": ""}</output>"#;
        assert!(parse_analysis(InsuranceProfile::Life, 3, not_list).is_err());
    }
}
