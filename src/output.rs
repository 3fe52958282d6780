//! Stage output types.
//!
//! Everything a pipeline stage produces and persists lives here: the page
//! ranges the planner hands out, the per-page entries extraction writes,
//! the assembled extraction set aggregation reads, the analysis result,
//! the action outcome and the chat reply.

use crate::error::UnderwriteError;
use crate::job::JobId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ── Page ranges ──────────────────────────────────────────────────────────

/// A contiguous, 1-based, inclusive slice of a document's pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PageRange {
    pub start: u32,
    pub end: u32,
}

impl PageRange {
    /// Returns `None` unless `1 <= start <= end`.
    pub fn new(start: u32, end: u32) -> Option<Self> {
        (start >= 1 && start <= end).then_some(Self { start, end })
    }

    /// Number of pages in the range (always ≥ 1).
    pub fn page_count(&self) -> u32 {
        self.end - self.start + 1
    }

    pub fn contains(&self, page: u32) -> bool {
        page >= self.start && page <= self.end
    }

    pub fn pages(&self) -> std::ops::RangeInclusive<u32> {
        self.start..=self.end
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

// ── Extraction ───────────────────────────────────────────────────────────

/// Page type recorded when the model returned nothing usable for a page.
pub const UNKNOWN_PAGE_TYPE: &str = "Unknown";

/// Suffix the model appends to a page type that continues the previous page.
pub const CONTINUED_SUFFIX: &str = "-Continued";

/// Structured findings for one page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageEntry {
    /// 1-indexed page number within the original document.
    pub page_number: u32,
    /// Page-type label, e.g. "Pharmacy Report" or "ACORD Form 125-Continued".
    pub page_type: String,
    /// Extracted underwriting-relevant content.
    pub content: String,
}

impl PageEntry {
    /// Entry stored for a page the model skipped.
    pub fn placeholder(page_number: u32) -> Self {
        Self {
            page_number,
            page_type: UNKNOWN_PAGE_TYPE.to_string(),
            content: "No output returned for this page".to_string(),
        }
    }

    pub fn is_continuation(&self) -> bool {
        self.page_type.ends_with(CONTINUED_SUFFIX)
    }

    /// Page type with any `-Continued` suffix removed, used for grouping.
    pub fn base_type(&self) -> &str {
        self.page_type
            .strip_suffix(CONTINUED_SUFFIX)
            .unwrap_or(&self.page_type)
            .trim()
    }
}

/// The output of one page-range batch, persisted as its own object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionChunk {
    pub job_id: JobId,
    pub range: PageRange,
    /// Document classification the batch was extracted under.
    pub classification: String,
    pub pages: Vec<PageEntry>,
}

impl ExtractionChunk {
    /// Object-store key of the chunk for `range` of `job_id`.
    pub fn object_key(job_id: &JobId, range: PageRange) -> String {
        format!("extracted/{job_id}/{}-{}.json", range.start, range.end)
    }
}

/// The complete, de-duplicated per-page extraction of a document.
///
/// Built only from chunks that together cover pages `1..=total_pages`
/// exactly once; anything else is rejected so aggregation never sees a
/// partial or doubled view of the document.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSet {
    total_pages: u32,
    pages: BTreeMap<u32, PageEntry>,
}

impl ExtractionSet {
    pub fn assemble(
        total_pages: u32,
        chunks: impl IntoIterator<Item = ExtractionChunk>,
    ) -> Result<Self, UnderwriteError> {
        let mut pages = BTreeMap::new();
        for chunk in chunks {
            for entry in chunk.pages {
                let n = entry.page_number;
                if n == 0 || n > total_pages {
                    return Err(UnderwriteError::InconsistentExtraction(format!(
                        "page {n} is outside the document (1-{total_pages})"
                    )));
                }
                if pages.insert(n, entry).is_some() {
                    return Err(UnderwriteError::InconsistentExtraction(format!(
                        "page {n} appears in more than one chunk"
                    )));
                }
            }
        }

        let missing: Vec<String> = (1..=total_pages)
            .filter(|p| !pages.contains_key(p))
            .map(|p| p.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(UnderwriteError::InconsistentExtraction(format!(
                "no entry for page(s) {}",
                missing.join(", ")
            )));
        }

        Ok(Self { total_pages, pages })
    }

    pub fn total_pages(&self) -> u32 {
        self.total_pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Entries in page order.
    pub fn entries(&self) -> impl Iterator<Item = &PageEntry> {
        self.pages.values()
    }

    /// Entries grouped by base page type, continuation pages folded into
    /// the group of the type they continue. Each group stays in page order.
    pub fn grouped(&self) -> BTreeMap<&str, Vec<&PageEntry>> {
        let mut groups: BTreeMap<&str, Vec<&PageEntry>> = BTreeMap::new();
        for entry in self.pages.values() {
            groups.entry(entry.base_type()).or_default().push(entry);
        }
        groups
    }

    /// JSON document handed to the aggregation and chat prompts.
    pub fn to_prompt_json(&self) -> serde_json::Value {
        let groups: serde_json::Map<String, serde_json::Value> = self
            .grouped()
            .into_iter()
            .map(|(page_type, entries)| {
                let pages = entries
                    .into_iter()
                    .map(|e| {
                        serde_json::json!({
                            "page_number": e.page_number,
                            "page_type": e.page_type,
                            "content": e.content,
                        })
                    })
                    .collect();
                (page_type.to_string(), serde_json::Value::Array(pages))
            })
            .collect();
        serde_json::Value::Object(groups)
    }
}

// ── Analysis ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Severity {
    Low,
    Medium,
    High,
    #[default]
    Unknown,
}

impl Severity {
    /// Lenient mapping of model-supplied severity words.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" | "minor" => Severity::Low,
            "medium" | "moderate" => Severity::Medium,
            "high" | "severe" | "critical" => Severity::High,
            _ => Severity::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskFinding {
    pub description: String,
    pub severity: Severity,
    pub page_references: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discrepancy {
    pub description: String,
    pub detail: String,
    pub page_references: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingItem {
    pub item: String,
    pub notes: String,
}

/// Which profile-specific narrative the analysis carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DomainSectionKind {
    MedicalTimeline,
    PropertyAssessment,
}

impl DomainSectionKind {
    /// Key of the section in the model's JSON payload.
    pub fn key(self) -> &'static str {
        match self {
            DomainSectionKind::MedicalTimeline => "MEDICAL_TIMELINE",
            DomainSectionKind::PropertyAssessment => "PROPERTY_ASSESSMENT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainSection {
    pub kind: DomainSectionKind,
    /// Markdown narrative.
    pub text: String,
}

/// The underwriting analysis of one job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub summary: Option<String>,
    pub risks: Vec<RiskFinding>,
    pub discrepancies: Vec<Discrepancy>,
    pub domain_section: DomainSection,
    pub final_recommendation: String,
    pub missing_information: Vec<MissingItem>,
    /// Model's self-reported confidence, clamped to 0.0–1.0.
    pub confidence_score: Option<f32>,
}

impl AnalysisResult {
    /// Every page number cited by a risk or a discrepancy.
    pub fn cited_pages(&self) -> impl Iterator<Item = u32> + '_ {
        self.risks
            .iter()
            .flat_map(|r| r.page_references.iter().copied())
            .chain(
                self.discrepancies
                    .iter()
                    .flat_map(|d| d.page_references.iter().copied()),
            )
    }
}

// ── Action ───────────────────────────────────────────────────────────────

/// What the action stage decided and did.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionOutcome {
    pub tool: String,
    pub arguments: serde_json::Value,
    /// Human-readable confirmation returned by the tool.
    pub confirmation: String,
    /// Object-store key of the artifact the tool wrote.
    pub artifact_key: String,
    /// Full model response the decision was parsed from.
    pub raw_response: String,
}

// ── Chat ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    /// The web frontend labels model turns `ai`.
    #[serde(alias = "ai")]
    Assistant,
}

/// One turn of caller-held chat history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    #[serde(alias = "sender")]
    pub role: ChatRole,
    #[serde(alias = "content")]
    pub text: String,
}

/// A calculator the chat model invoked, with its result or error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub name: String,
    pub input: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatReply {
    pub job_id: JobId,
    pub response: String,
    pub tool_calls: Vec<ToolInvocation>,
}
