//! Action: an agent-style wrapper that takes one follow-up step.
//!
//! The model sees the analysis, the profile's ineligibility rules and a
//! catalogue of [`ActionTool`]s, and answers with a single `<tool_call>`.
//! The chosen tool writes a text artifact under `agent_outputs/` in the
//! object store (standing in for the notice or e-mail it would send) and
//! returns a confirmation line. The tool name, its arguments, the
//! confirmation and the raw response are recorded on the job.

use super::llm::{ModelRequest, Turn};
use super::parse::{tool_calls, ToolCall};
use super::{Stage, StageContext};
use crate::error::UnderwriteError;
use crate::job::{JobId, JobUpdate};
use crate::output::ActionOutcome;
use crate::profile::OTHER_LABEL;
use crate::prompts::{self, ToolParam, ToolSpec};
use serde_json::{Map, Value};
use tracing::{info, warn};

const BOT_SENDER: &str = "underwriting-bot@example.com";
const DEFAULT_RECIPIENT: &str = "underwriting-dept@example.com";

/// The tools available to the action agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionTool {
    SendIneligibilityNotice,
    RequestSupportingDocuments,
    FlagForManualReview,
}

/// What a tool produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolArtifact {
    pub key: String,
    pub body: String,
    pub confirmation: String,
}

const DOCUMENT_IDENTIFIER: ToolParam = ToolParam {
    name: "document_identifier",
    description: "Identifier of the document under review, exactly as given",
    required: true,
};

pub const ACTION_TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "send_ineligibility_notice",
        description: "Record that the application is ineligible and notify the applicant.",
        params: &[
            DOCUMENT_IDENTIFIER,
            ToolParam {
                name: "reason",
                description: "The ineligibility reason as stated in the matching rule",
                required: true,
            },
        ],
    },
    ToolSpec {
        name: "request_supporting_documents",
        description: "E-mail a request for the supporting documents needed to continue underwriting.",
        params: &[
            DOCUMENT_IDENTIFIER,
            ToolParam {
                name: "recipient_email",
                description: "Address the request is sent to",
                required: false,
            },
            ToolParam {
                name: "documents_to_request",
                description: "List of document names to request",
                required: true,
            },
            ToolParam {
                name: "email_body",
                description: "Polite e-mail body explaining what is needed and why",
                required: true,
            },
        ],
    },
    ToolSpec {
        name: "flag_for_manual_review",
        description: "Mark the application as ready for a human underwriter's review.",
        params: &[
            DOCUMENT_IDENTIFIER,
            ToolParam {
                name: "reason",
                description: "One sentence on what the underwriter should look at first",
                required: true,
            },
        ],
    },
];

impl ActionTool {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "send_ineligibility_notice" => Some(ActionTool::SendIneligibilityNotice),
            "request_supporting_documents" => Some(ActionTool::RequestSupportingDocuments),
            "flag_for_manual_review" => Some(ActionTool::FlagForManualReview),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ActionTool::SendIneligibilityNotice => "send_ineligibility_notice",
            ActionTool::RequestSupportingDocuments => "request_supporting_documents",
            ActionTool::FlagForManualReview => "flag_for_manual_review",
        }
    }

    /// Validate `args` and build the artifact. `fallback_id` is used when
    /// the model omits the document identifier.
    pub fn execute(self, args: &Map<String, Value>, fallback_id: &str) -> Result<ToolArtifact, UnderwriteError> {
        let document_id = optional_str(args, "document_identifier").unwrap_or(fallback_id);
        let safe_id = safe_identifier(document_id);

        match self {
            ActionTool::SendIneligibilityNotice => {
                let reason = required_str(self, args, "reason")?;
                Ok(ToolArtifact {
                    key: format!("agent_outputs/{safe_id}_ineligible.txt"),
                    body: format!(
                        "Document Identifier: {document_id}\nStatus: Ineligible\nReason: {reason}\n"
                    ),
                    confirmation: format!(
                        "Ineligibility notice recorded for {document_id}: {reason}"
                    ),
                })
            }
            ActionTool::RequestSupportingDocuments => {
                let recipient = optional_str(args, "recipient_email").unwrap_or(DEFAULT_RECIPIENT);
                let documents = string_list(args.get("documents_to_request"));
                if documents.is_empty() {
                    return Err(bad_argument(self, "documents_to_request"));
                }
                let email_body = required_str(self, args, "email_body")?;
                let mut body = format!(
                    "To: {recipient}\nFrom: {BOT_SENDER}\n\
                     Subject: Supporting documents required for {document_id}\n\n{email_body}\n\n\
                     Requested documents:\n"
                );
                for doc in &documents {
                    body.push_str(&format!("- {doc}\n"));
                }
                Ok(ToolArtifact {
                    key: format!("agent_outputs/{safe_id}_document_request.txt"),
                    body,
                    confirmation: format!(
                        "Requested {} supporting document(s) from {recipient} for {document_id}",
                        documents.len()
                    ),
                })
            }
            ActionTool::FlagForManualReview => {
                let reason = required_str(self, args, "reason")?;
                Ok(ToolArtifact {
                    key: format!("agent_outputs/{safe_id}_manual_review.txt"),
                    body: format!(
                        "Document Identifier: {document_id}\nStatus: Manual Review\nReason: {reason}\n"
                    ),
                    confirmation: format!("Flagged {document_id} for manual review: {reason}"),
                })
            }
        }
    }
}

/// Decide on and perform the job's follow-up action.
pub async fn act(ctx: &StageContext, job_id: &JobId) -> Result<ActionOutcome, UnderwriteError> {
    let job = ctx.jobs.get(job_id).await?;
    let profile = job.insurance_type;
    let analysis = job.analysis.as_ref().ok_or_else(|| {
        UnderwriteError::Internal(format!("job {} reached the action stage without an analysis", job_id))
    })?;
    let classification = job.classification.as_deref().unwrap_or(OTHER_LABEL);
    let analysis_json = serde_json::to_string_pretty(analysis)?;

    let request = ModelRequest::new(Stage::Act, prompts::action_system(profile, ACTION_TOOLS)).turn(
        Turn::user(prompts::action_prompt(
            profile,
            &job.object_key,
            classification,
            &analysis_json,
        )),
    );
    let reply = ctx.model.converse(request).await?;

    let call = single_call(tool_calls(&reply.text))?;
    let tool = ActionTool::from_name(&call.tool).ok_or_else(|| UnderwriteError::ToolFailed {
        tool: call.tool.clone(),
        detail: "no such tool".to_string(),
    })?;
    let artifact = tool.execute(&call.arguments, &job.object_key)?;

    ctx.objects
        .put(&artifact.key, artifact.body.clone().into_bytes())
        .await?;

    let outcome = ActionOutcome {
        tool: tool.name().to_string(),
        arguments: Value::Object(call.arguments),
        confirmation: artifact.confirmation,
        artifact_key: artifact.key,
        raw_response: reply.text,
    };
    ctx.jobs
        .apply(job_id, JobUpdate::Action(outcome.clone()))
        .await?;

    info!(job_id = %job_id, tool = %outcome.tool, "Action taken: {}", outcome.confirmation);
    Ok(outcome)
}

fn single_call(mut calls: Vec<ToolCall>) -> Result<ToolCall, UnderwriteError> {
    if calls.is_empty() {
        return Err(UnderwriteError::ToolFailed {
            tool: "none".to_string(),
            detail: "response contains no <tool_call> block".to_string(),
        });
    }
    if calls.len() > 1 {
        warn!("Model requested {} tool calls; using the first", calls.len());
    }
    Ok(calls.swap_remove(0))
}

/// Identifier made safe for use inside an object key.
fn safe_identifier(id: &str) -> String {
    let safe: String = id
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();
    if safe.is_empty() || safe.chars().all(|c| c == '.') {
        "document".to_string()
    } else {
        safe
    }
}

fn optional_str<'a>(args: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn required_str<'a>(
    tool: ActionTool,
    args: &'a Map<String, Value>,
    key: &'static str,
) -> Result<&'a str, UnderwriteError> {
    optional_str(args, key).ok_or_else(|| bad_argument(tool, key))
}

fn bad_argument(tool: ActionTool, key: &str) -> UnderwriteError {
    UnderwriteError::ToolFailed {
        tool: tool.name().to_string(),
        detail: format!("missing or empty argument '{key}'"),
    }
}

/// A list argument given as a JSON array or a comma-separated string.
fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn catalogue_and_registry_agree() {
        for entry in ACTION_TOOLS {
            let tool = ActionTool::from_name(entry.name).expect("registered");
            assert_eq!(tool.name(), entry.name);
        }
        assert!(ActionTool::from_name("delete_everything").is_none());
    }

    #[test]
    fn ineligibility_notice_artifact() {
        let a = ActionTool::SendIneligibilityNotice
            .execute(
                &args(json!({"document_identifier": "uploads/j1/app.pdf", "reason": "sanctioned entity match"})),
                "fallback",
            )
            .unwrap();
        assert_eq!(a.key, "agent_outputs/uploads_j1_app.pdf_ineligible.txt");
        assert!(a.body.contains("Status: Ineligible"));
        assert!(a.body.contains("Reason: sanctioned entity match"));
    }

    #[test]
    fn document_request_defaults_recipient() {
        let a = ActionTool::RequestSupportingDocuments
            .execute(
                &args(json!({
                    "documents_to_request": "Loss runs, Inspection report",
                    "email_body": "Please send the following."
                })),
                "uploads/j2/b.pdf",
            )
            .unwrap();
        assert_eq!(a.key, "agent_outputs/uploads_j2_b.pdf_document_request.txt");
        assert!(a.body.starts_with("To: underwriting-dept@example.com\nFrom: underwriting-bot@example.com"));
        assert!(a.body.contains("- Loss runs\n- Inspection report"));
    }

    #[test]
    fn bad_arguments_fail() {
        let err = ActionTool::FlagForManualReview
            .execute(&args(json!({"reason": "   "})), "x")
            .unwrap_err();
        assert!(matches!(err, UnderwriteError::ToolFailed { .. }));
        assert!(ActionTool::RequestSupportingDocuments
            .execute(&args(json!({"email_body": "hi", "documents_to_request": []})), "x")
            .is_err());
    }

    #[test]
    fn safe_ids() {
        assert_eq!(safe_identifier("a/b:c"), "a_b_c");
        assert_eq!(safe_identifier(".."), "document");
        assert_eq!(safe_identifier(""), "document");
    }
}
