//! Prompt templates for every model-calling stage.
//!
//! Centralising prompts here serves two purposes:
//!
//! 1. **Single source of truth**: the marker formats the parsers in
//!    [`crate::pipeline::parse`] depend on (`<output>`, `<output page="N">`,
//!    `<tool_call>`) are spelled out in exactly one place.
//!
//! 2. **Testability**: unit tests inspect prompts directly without a model,
//!    so prompt regressions are caught before they become parse failures.
//!
//! Everything that differs between lines of business comes from the
//! [`InsuranceProfile`]; nothing here branches on a string tag.

use crate::output::PageRange;
use crate::profile::InsuranceProfile;

/// One parameter of a tool the model may call.
#[derive(Debug, Clone, Copy)]
pub struct ToolParam {
    pub name: &'static str,
    pub description: &'static str,
    pub required: bool,
}

/// A tool shown to the model in a catalogue.
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub params: &'static [ToolParam],
}

/// How the model must format a tool invocation.
pub const TOOL_CALL_FORMAT: &str = r#"To call a tool, write exactly one block of this form:

<tool_call>{"tool": "<tool name>", "arguments": {"<parameter>": <value>}}</tool_call>

The block must contain valid JSON. Use only the tools listed above and only their parameters."#;

/// Caption placed before each page image, so the model can tie images to
/// page numbers.
pub fn page_image_caption(page: u32) -> String {
    format!("--- Image for Page {} ---", page)
}

// ── Classification ───────────────────────────────────────────────────────

pub fn classification_system(profile: InsuranceProfile) -> String {
    format!(
        "You are an expert in classifying {} documents. You look at page images and \
         decide which kind of document they belong to.",
        profile.display_name()
    )
}

/// Instruction for the classification call. The answer must be
/// `{"document_type": "<LABEL>"}`.
pub fn classification_prompt(profile: InsuranceProfile) -> String {
    let mut out = format!(
        "Analyze the attached page image(s) of an {} submission and classify the document \
         into exactly one of these categories:\n\n",
        profile.display_name()
    );
    for (i, doc_type) in profile.document_types().iter().enumerate() {
        out.push_str(&format!("{}. {}:\n", i + 1, doc_type.label));
        for t in doc_type.traits {
            out.push_str(&format!("   - {}\n", t));
        }
    }
    out.push_str(
        "\nRespond with a JSON object and nothing else, using the category name exactly \
         as written above:\n{\"document_type\": \"CATEGORY_NAME\"}",
    );
    out
}

// ── Extraction ───────────────────────────────────────────────────────────

pub fn extraction_system(profile: InsuranceProfile) -> String {
    format!(
        "You are an expert {} underwriter. You read scanned application pages and extract \
         every fact an underwriter needs, page by page, without interpretation.",
        profile.display_name()
    )
}

/// Instruction for one extraction batch covering `range`.
pub fn extraction_prompt(profile: InsuranceProfile, classification: &str, range: PageRange) -> String {
    let mut out = format!(
        "The attached images are pages {range} of a document classified as {classification}. \
         Each image is preceded by a caption of the form \"{caption}\".\n\n\
         Extract the following information from every page:\n",
        caption = page_image_caption(range.start),
    );
    for item in profile.extraction_focus() {
        out.push_str(&format!("- {}\n", item));
    }
    out.push_str(&format!(
        r#"
First think through the pages inside <thinking></thinking> tags. Then, for EACH page from {start} to {end}, write one block:

<output page="N">
<page_type>Type of the page, e.g. "Medical Report" or "Application Form"</page_type>
<page_content>Everything relevant extracted from the page, in Markdown</page_content>
</output>

Rules:
- Write exactly one <output> block per page, with its page number in the page attribute.
- If a page continues the previous page's document, use the previous page type with the suffix "-Continued" (for example "Lab Report-Continued").
- Dates are very important: keep every date exactly as written.
- Do not mention information that is absent from the page.
- Ignore redactions and blacked-out areas; do not speculate about their content.
- Do not add commentary outside the <thinking> and <output> blocks."#,
        start = range.start,
        end = range.end,
    ));
    out
}

// ── Analysis ─────────────────────────────────────────────────────────────

pub fn analysis_system(profile: InsuranceProfile) -> String {
    format!(
        "You are an expert {} underwriter reviewing extracted application data. You report \
         observations for a human underwriter; you never make the final decision.",
        profile.display_name()
    )
}

/// Instruction for the aggregation call over the whole extraction set.
///
/// `extraction_json` is [`crate::output::ExtractionSet::to_prompt_json`]
/// rendered as text.
pub fn analysis_prompt(profile: InsuranceProfile, extraction_json: &str, total_pages: u32) -> String {
    let domain_key = profile.domain_section().key();
    format!(
        r#"Below is the page-by-page extraction of a {total_pages}-page {name} submission, grouped by page type:

<extraction>
{extraction_json}
</extraction>

Analyze it and produce an underwriting assessment focused on {risk_focus}.

Guidelines:
- Cite page references for EVERY finding. Page numbers must lie between 1 and {total_pages}.
- State facts found in the documents. Be factual, not speculative.
- For each discrepancy, explain both conflicting versions and where each appears.
- Keep a neutral tone: findings are observations that need clarification, not conclusions.
- Recommend next steps for the underwriter; do not accept or decline the application.

Write your answer as a single JSON object wrapped in <output></output> tags, with these keys:

<output>
{{
  "SUMMARY": "Two or three sentences describing the submission",
  "RISK_ASSESSMENT": [
    {{"description": "...", "severity": "Low | Medium | High", "page_references": ["1", "3-5"]}}
  ],
  "DISCREPANCIES": [
    {{"description": "...", "detail": "Both versions and where each appears", "page_references": ["2"]}}
  ],
  "{domain_key}": "{domain_instruction} (Markdown)",
  "FINAL_RECOMMENDATION": "Recommended next steps for the underwriter",
  "MISSING_INFORMATION": [
    {{"item": "...", "notes": "..."}}
  ],
  "CONFIDENCE_SCORE": 0.75
}}
</output>

Use "N/A" as the only page reference when a finding has no page source. Use empty lists when there is nothing to report."#,
        name = profile.display_name(),
        risk_focus = profile.risk_focus(),
        domain_instruction = profile.domain_section_instruction(),
    )
}

// ── Action ───────────────────────────────────────────────────────────────

pub fn action_system(profile: InsuranceProfile, tools: &[ToolSpec]) -> String {
    format!(
        "You are an automated {} underwriting agent. You review a completed analysis and take \
         exactly one follow-up action using the tools below.\n\n{}\n\n{}",
        profile.display_name(),
        render_tool_catalogue(tools),
        TOOL_CALL_FORMAT
    )
}

/// Instruction for the action call.
pub fn action_prompt(
    profile: InsuranceProfile,
    document_identifier: &str,
    classification: &str,
    analysis_json: &str,
) -> String {
    let mut out = format!(
        "Document identifier: {document_identifier}\nApplication type: {classification}\n\n\
         <analysis>\n{analysis_json}\n</analysis>\n\n\
         Step 1. Check the analysis against these ineligibility rules:\n"
    );
    for (i, rule) in profile.ineligibility_rules().iter().enumerate() {
        out.push_str(&format!("{}. {}\n", i + 1, rule));
    }
    out.push_str(
        "\nIf any rule applies, call send_ineligibility_notice with the stated reason.\n\n\
         Step 2. Otherwise, if the analysis lists missing information or unresolved \
         discrepancies, call request_supporting_documents. Request the documents listed for \
         the application type (or DEFAULT):\n",
    );
    for (application_type, docs) in profile.supporting_documents() {
        out.push_str(&format!("- {}: {}\n", application_type, docs.join("; ")));
    }
    out.push_str(
        "\nStep 3. Otherwise call flag_for_manual_review with a one-sentence reason.\n\n\
         Always choose exactly one tool. Use the document identifier above verbatim.",
    );
    out
}

// ── Chat ─────────────────────────────────────────────────────────────────

/// System prompt for chat about one completed job.
pub fn chat_system(
    profile: InsuranceProfile,
    tools: &[ToolSpec],
    extraction_json: &str,
    analysis_json: &str,
    total_pages: u32,
) -> String {
    format!(
        r#"{role}

You answer an underwriter's questions about one {total_pages}-page submission. Its extracted pages and the completed analysis follow.

<extraction>
{extraction_json}
</extraction>

<analysis>
{analysis_json}
</analysis>

Guidelines:
- Cite pages as Markdown links of the form [pg XX](/page/XX).
- If the documents do not contain the answer, say so plainly. Acknowledge the limits of what is available.
- Format answers in Markdown.
- Do not make final underwriting decisions; support the underwriter's judgement.

You may use these calculators when a question needs them:

{catalogue}

{format}

After a tool call, stop; the result will be appended to your answer."#,
        role = profile.chat_role(),
        catalogue = render_tool_catalogue(tools),
        format = TOOL_CALL_FORMAT,
    )
}

/// Render tools as a numbered catalogue.
pub fn render_tool_catalogue(tools: &[ToolSpec]) -> String {
    let mut out = String::from("Available tools:\n");
    for (i, tool) in tools.iter().enumerate() {
        out.push_str(&format!("\n{}. {}: {}\n", i + 1, tool.name, tool.description));
        for p in tool.params {
            let req = if p.required { "required" } else { "optional" };
            out.push_str(&format!("   - {} ({}): {}\n", p.name, req, p.description));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_lists_every_label() {
        let p = classification_prompt(InsuranceProfile::Life);
        for t in InsuranceProfile::Life.document_types() {
            assert!(p.contains(t.label), "missing {}", t.label);
        }
        assert!(p.contains("\"document_type\""));
        assert!(!p.contains("ACORD_FORM"));
    }

    #[test]
    fn extraction_prompt_names_range_and_marker() {
        let range = PageRange::new(4, 6).unwrap();
        let p = extraction_prompt(InsuranceProfile::PropertyCasualty, "ACORD_FORM", range);
        assert!(p.contains("pages 4-6"));
        assert!(p.contains("from 4 to 6"));
        assert!(p.contains("<output page=\"N\">"));
        assert!(p.contains("-Continued"));
        assert!(p.contains("Security measures"));
    }

    #[test]
    fn analysis_prompt_uses_profile_section() {
        let life = analysis_prompt(InsuranceProfile::Life, "{}", 7);
        assert!(life.contains("\"MEDICAL_TIMELINE\""));
        assert!(life.contains("between 1 and 7"));
        let pc = analysis_prompt(InsuranceProfile::PropertyCasualty, "{}", 2);
        assert!(pc.contains("\"PROPERTY_ASSESSMENT\""));
        assert!(!pc.contains("MEDICAL_TIMELINE"));
    }

    #[test]
    fn catalogue_renders_params() {
        const TOOLS: &[ToolSpec] = &[ToolSpec {
            name: "calculate_bmi",
            description: "Body mass index",
            params: &[ToolParam {
                name: "height_cm",
                description: "Height in centimetres",
                required: true,
            }],
        }];
        let out = render_tool_catalogue(TOOLS);
        assert!(out.contains("1. calculate_bmi: Body mass index"));
        assert!(out.contains("height_cm (required)"));
    }

    #[test]
    fn action_prompt_lists_rules_and_documents() {
        let p = action_prompt(InsuranceProfile::Life, "uploads/j1/a.pdf", "LAB_REPORT", "{}");
        assert!(p.contains("uploads/j1/a.pdf"));
        assert!(p.contains("sanctioned entity match"));
        assert!(p.contains("DEFAULT:"));
        assert!(p.contains("exactly one tool"));
    }
}
