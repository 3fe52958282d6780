//! Chat: answer questions about a completed job.
//!
//! Stateless. The caller sends the whole message history on every request;
//! the job's extraction and analysis are the only other context. Chat is
//! refused for any job that is not COMPLETE, so answers are never made up
//! from partial results.
//!
//! The model may call the profile's calculators with the same
//! `<tool_call>` protocol the action stage uses. Each result is appended to
//! the answer and returned in `tool_calls`.

use super::analyze::load_extraction_set;
use super::llm::{ModelRequest, Turn};
use super::parse::{link_page_mentions, strip_tool_calls, tool_calls, ToolCall};
use super::{Stage, StageContext};
use crate::error::UnderwriteError;
use crate::job::{JobId, JobStatus};
use crate::output::{ChatReply, ChatRole, ChatTurn, ToolInvocation};
use crate::profile::InsuranceProfile;
use crate::prompts::{self, ToolParam, ToolSpec};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

const CHAT_MAX_TOKENS: usize = 2048;

/// Calculators the chat assistant may call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calculator {
    Bmi,
    MortalityRisk,
    PropertyPremium,
}

const BMI_SPEC: ToolSpec = ToolSpec {
    name: "calculate_bmi",
    description: "Body mass index from height and weight, with its interpretation.",
    params: &[
        ToolParam {
            name: "height_cm",
            description: "Height in centimetres",
            required: true,
        },
        ToolParam {
            name: "weight_kg",
            description: "Weight in kilograms",
            required: true,
        },
    ],
};

const MORTALITY_SPEC: ToolSpec = ToolSpec {
    name: "calculate_mortality_risk",
    description: "Simplified relative mortality risk score from 0 to 10.",
    params: &[
        ToolParam {
            name: "age",
            description: "Age in years",
            required: true,
        },
        ToolParam {
            name: "gender",
            description: "\"male\" or \"female\"",
            required: true,
        },
        ToolParam {
            name: "smoker",
            description: "true if the applicant smokes",
            required: false,
        },
        ToolParam {
            name: "bmi",
            description: "Body mass index, if known",
            required: false,
        },
    ],
};

const PREMIUM_SPEC: ToolSpec = ToolSpec {
    name: "calculate_property_premium",
    description: "Estimated annual premium for a property.",
    params: &[
        ToolParam {
            name: "property_value",
            description: "Insured value in dollars",
            required: true,
        },
        ToolParam {
            name: "construction_type",
            description: "\"wood frame\", \"masonry\", \"fire resistive\" or \"mixed\"",
            required: true,
        },
        ToolParam {
            name: "protection_class",
            description: "Fire protection class 1-10 (default 5)",
            required: false,
        },
        ToolParam {
            name: "deductible",
            description: "Deductible in dollars (default 1000)",
            required: false,
        },
    ],
};

const LIFE_TOOLS: &[ToolSpec] = &[BMI_SPEC, MORTALITY_SPEC];
const PC_TOOLS: &[ToolSpec] = &[BMI_SPEC, PREMIUM_SPEC];

/// Calculator catalogue of a profile.
pub fn chat_tools(profile: InsuranceProfile) -> &'static [ToolSpec] {
    match profile {
        InsuranceProfile::Life => LIFE_TOOLS,
        InsuranceProfile::PropertyCasualty => PC_TOOLS,
    }
}

impl Calculator {
    /// Resolve `name` among the calculators available to `profile`.
    pub fn for_profile(profile: InsuranceProfile, name: &str) -> Option<Self> {
        if !chat_tools(profile).iter().any(|t| t.name == name) {
            return None;
        }
        match name {
            "calculate_bmi" => Some(Calculator::Bmi),
            "calculate_mortality_risk" => Some(Calculator::MortalityRisk),
            "calculate_property_premium" => Some(Calculator::PropertyPremium),
            _ => None,
        }
    }

    /// Compute the result. Returns the structured output and the line
    /// appended to the answer.
    pub fn run(self, args: &Map<String, Value>) -> Result<(Value, String), String> {
        match self {
            Calculator::Bmi => {
                let height_cm = positive(args, "height_cm")?;
                let weight_kg = positive(args, "weight_kg")?;
                let bmi = calculate_bmi(height_cm, weight_kg);
                let interpretation = bmi_band(bmi);
                Ok((
                    json!({"bmi": bmi, "interpretation": interpretation}),
                    format!("\n\nBMI Calculation: {bmi:.1} ({interpretation})"),
                ))
            }
            Calculator::MortalityRisk => {
                let age = positive(args, "age")?;
                let gender = string_arg(args, "gender").ok_or("missing argument 'gender'")?;
                let smoker = bool_arg(args, "smoker");
                let bmi = number(args, "bmi");
                let score = mortality_risk_score(age, &gender, smoker, bmi);
                let interpretation = mortality_band(score);
                Ok((
                    json!({"risk_score": score, "interpretation": interpretation}),
                    format!("\n\nMortality Risk Assessment: {score:.1}/10 ({interpretation})"),
                ))
            }
            Calculator::PropertyPremium => {
                let value = positive(args, "property_value")?;
                let construction = string_arg(args, "construction_type").unwrap_or_default();
                let protection_class = number(args, "protection_class").unwrap_or(5.0);
                let deductible = match number(args, "deductible") {
                    Some(d) if d > 0.0 => d,
                    Some(_) => return Err("deductible must be positive".to_string()),
                    None => 1000.0,
                };
                let premium = property_premium(value, &construction, protection_class, deductible);
                Ok((
                    json!({"annual_premium": premium}),
                    format!("\n\nEstimated Annual Premium: ${premium:.2}"),
                ))
            }
        }
    }
}

/// BMI rounded to one decimal.
pub fn calculate_bmi(height_cm: f64, weight_kg: f64) -> f64 {
    let metres = height_cm / 100.0;
    round_to(weight_kg / (metres * metres), 1)
}

pub fn bmi_band(bmi: f64) -> &'static str {
    if bmi < 18.5 {
        "Underweight"
    } else if bmi < 25.0 {
        "Normal weight"
    } else if bmi < 30.0 {
        "Overweight"
    } else {
        "Obese"
    }
}

/// Relative mortality score in 0–10, rounded to one decimal.
pub fn mortality_risk_score(age: f64, gender: &str, smoker: bool, bmi: Option<f64>) -> f64 {
    let base = age / 100.0;
    let gender_factor = if gender.trim().eq_ignore_ascii_case("male") {
        1.0
    } else {
        0.85
    };
    let smoking_factor = if smoker { 1.8 } else { 1.0 };
    let bmi_factor = match bmi {
        Some(b) if b < 18.5 => 1.2,
        Some(b) if (25.0..30.0).contains(&b) => 1.1,
        Some(b) if (30.0..35.0).contains(&b) => 1.3,
        Some(b) if b >= 35.0 => 1.6,
        _ => 1.0,
    };
    let score = (base * gender_factor * smoking_factor * bmi_factor * 10.0).min(10.0);
    round_to(score, 1)
}

pub fn mortality_band(score: f64) -> &'static str {
    if score < 3.0 {
        "Low risk"
    } else if score < 6.0 {
        "Moderate risk"
    } else if score < 8.0 {
        "High risk"
    } else {
        "Very high risk"
    }
}

/// Estimated annual premium in dollars, rounded to cents.
pub fn property_premium(value: f64, construction_type: &str, protection_class: f64, deductible: f64) -> f64 {
    const BASE_RATE: f64 = 3.5;
    let construction_factor = match construction_type.trim().to_ascii_lowercase().as_str() {
        "wood frame" | "wood_frame" | "frame" => 1.2,
        "masonry" => 0.9,
        "fire resistive" | "fire_resistive" => 0.7,
        _ => 1.0,
    };
    let protection_factor = 0.7 + (protection_class - 1.0) * 0.1;
    let deductible_factor = 1.0 - (deductible / 500.0).ln() * 0.05;
    let premium =
        value / 1000.0 * BASE_RATE * construction_factor * protection_factor * deductible_factor;
    round_to(premium, 2)
}

fn round_to(x: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (x * scale).round() / scale
}

fn number(args: &Map<String, Value>, key: &str) -> Option<f64> {
    match args.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn positive(args: &Map<String, Value>, key: &str) -> Result<f64, String> {
    match number(args, key) {
        Some(v) if v > 0.0 && v.is_finite() => Ok(v),
        Some(_) => Err(format!("argument '{key}' must be a positive number")),
        None => Err(format!("missing argument '{key}'")),
    }
}

fn string_arg(args: &Map<String, Value>, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn bool_arg(args: &Map<String, Value>, key: &str) -> bool {
    match args.get(key) {
        Some(Value::Bool(b)) => *b,
        Some(Value::String(s)) => matches!(s.trim().to_ascii_lowercase().as_str(), "true" | "yes" | "y"),
        _ => false,
    }
}

/// Answer the last user message of `messages` about a completed job.
pub async fn chat(
    ctx: &StageContext,
    job_id: &JobId,
    messages: &[ChatTurn],
) -> Result<ChatReply, UnderwriteError> {
    let job = ctx.jobs.get(job_id).await?;
    if job.status != JobStatus::Complete {
        return Err(UnderwriteError::JobNotReady {
            job_id: job_id.clone(),
            status: job.status,
        });
    }
    match messages.last() {
        None => return Err(UnderwriteError::MissingField("messages")),
        Some(last) if last.role != ChatRole::User || last.text.trim().is_empty() => {
            return Err(UnderwriteError::InvalidField {
                field: "messages",
                value: "the last message must be a non-empty user message".to_string(),
            });
        }
        Some(_) => {}
    }

    let profile = job.insurance_type;
    let set = load_extraction_set(ctx, &job).await?;
    let extraction_json = serde_json::to_string_pretty(&set.to_prompt_json())?;
    let analysis_json = match &job.analysis {
        Some(a) => serde_json::to_string_pretty(a)?,
        None => "{}".to_string(),
    };

    let system = prompts::chat_system(
        profile,
        chat_tools(profile),
        &extraction_json,
        &analysis_json,
        set.total_pages(),
    );
    let mut request = ModelRequest::new(Stage::Chat, system)
        .temperature(ctx.config.chat_temperature)
        .max_tokens(CHAT_MAX_TOKENS.min(ctx.config.max_tokens));
    for turn in messages {
        request = request.turn(match turn.role {
            ChatRole::User => Turn::user(turn.text.as_str()),
            ChatRole::Assistant => Turn::assistant(turn.text.as_str()),
        });
    }

    let reply = ctx.model.converse(request).await?;
    debug!(job_id = %job_id, "Chat reply: {} chars", reply.text.len());

    let mut response = strip_tool_calls(&reply.text);
    let mut invocations = Vec::new();
    for call in tool_calls(&reply.text) {
        let invocation = run_tool(profile, call);
        if let Some(text) = invocation
            .output
            .as_ref()
            .and_then(|o| o.get("text"))
            .and_then(Value::as_str)
        {
            response.push_str(text);
        }
        invocations.push(invocation);
    }

    info!(
        job_id = %job_id,
        turns = messages.len(),
        tools = invocations.len(),
        "Chat answered"
    );
    Ok(ChatReply {
        job_id: job_id.clone(),
        response: link_page_mentions(&response),
        tool_calls: invocations,
    })
}

fn run_tool(profile: InsuranceProfile, call: ToolCall) -> ToolInvocation {
    let input = Value::Object(call.arguments.clone());
    match Calculator::for_profile(profile, &call.tool) {
        None => ToolInvocation {
            name: call.tool,
            input,
            output: None,
            error: Some("unknown tool".to_string()),
        },
        Some(calc) => match calc.run(&call.arguments) {
            Ok((result, text)) => ToolInvocation {
                name: call.tool,
                input,
                output: Some(json!({"result": result, "text": text})),
                error: None,
            },
            Err(e) => ToolInvocation {
                name: call.tool,
                input,
                output: None,
                error: Some(e),
            },
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(v: Value) -> Map<String, Value> {
        match v {
            Value::Object(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn bmi_formula_and_bands() {
        assert_eq!(calculate_bmi(180.0, 81.0), 25.0);
        assert_eq!(bmi_band(25.0), "Overweight");
        assert_eq!(bmi_band(18.4), "Underweight");
        assert_eq!(bmi_band(22.0), "Normal weight");
        assert_eq!(bmi_band(31.0), "Obese");
    }

    #[test]
    fn mortality_formula() {
        // 0.5 * 1.0 * 1.8 * 1.3 * 10 = 11.7 → capped
        assert_eq!(mortality_risk_score(50.0, "male", true, Some(32.0)), 10.0);
        // 0.4 * 0.85 * 1.0 * 1.0 * 10 = 3.4
        assert_eq!(mortality_risk_score(40.0, "female", false, None), 3.4);
        assert_eq!(mortality_band(3.4), "Moderate risk");
        assert_eq!(mortality_band(2.9), "Low risk");
        assert_eq!(mortality_band(10.0), "Very high risk");
    }

    #[test]
    fn premium_formula() {
        // 500k, masonry, class 5, deductible 500: 500 * 3.5 * 0.9 * 1.1 * 1.0
        assert_eq!(property_premium(500_000.0, "Masonry", 5.0, 500.0), 1732.5);
        let with_default_deductible = property_premium(500_000.0, "masonry", 5.0, 1000.0);
        assert!(with_default_deductible < 1732.5);
    }

    #[test]
    fn calculators_respect_profile() {
        assert_eq!(
            Calculator::for_profile(InsuranceProfile::Life, "calculate_mortality_risk"),
            Some(Calculator::MortalityRisk)
        );
        assert_eq!(
            Calculator::for_profile(InsuranceProfile::PropertyCasualty, "calculate_mortality_risk"),
            None
        );
        assert_eq!(
            Calculator::for_profile(InsuranceProfile::PropertyCasualty, "calculate_bmi"),
            Some(Calculator::Bmi)
        );
    }

    #[test]
    fn calculator_text_and_errors() {
        let (out, text) = Calculator::Bmi
            .run(&args(json!({"height_cm": "180", "weight_kg": 81})))
            .unwrap();
        assert_eq!(out["interpretation"], json!("Overweight"));
        assert_eq!(text, "\n\nBMI Calculation: 25.0 (Overweight)");
        assert!(Calculator::Bmi.run(&args(json!({"height_cm": 0}))).is_err());
        let (_, text) = Calculator::PropertyPremium
            .run(&args(json!({"property_value": 500000, "construction_type": "masonry", "deductible": 500})))
            .unwrap();
        assert_eq!(text, "\n\nEstimated Annual Premium: $1732.50");
    }

    #[test]
    fn unknown_tool_is_reported_not_fatal() {
        let inv = run_tool(
            InsuranceProfile::Life,
            ToolCall {
                tool: "calculate_property_premium".into(),
                arguments: Map::new(),
            },
        );
        assert_eq!(inv.error.as_deref(), Some("unknown tool"));
        assert!(inv.output.is_none());
    }
}
