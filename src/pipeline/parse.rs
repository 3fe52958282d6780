//! Defensive extraction of structured payloads from model output.
//!
//! Model responses are untrusted text. The prompts ask for payloads wrapped
//! in markers (`<output>`, `<output page="N">`, `<tool_call>`), but models
//! add prose, fences and reasoning around them. Everything here locates a
//! payload and returns `None` (or an empty list) when it cannot; the stages
//! turn that into an explicit failure instead of storing garbled data.
//!
//! Every regex is compiled once via `once_cell::sync::Lazy`.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};

/// Largest page range accepted inside a single reference like `"3-5"`.
const MAX_REFERENCE_SPAN: u32 = 500;

/// One `<output page="N">` block of an extraction response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBlock {
    pub page: u32,
    pub page_type: Option<String>,
    pub content: Option<String>,
    /// Block body with surrounding whitespace trimmed.
    pub raw: String,
}

/// A tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCall {
    pub tool: String,
    pub arguments: Map<String, Value>,
}

static RE_PAGE_BLOCK: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?is)<output\s+page\s*=\s*["']?\s*(\d+)\s*["']?\s*>(.*?)</output\s*>"#)
        .expect("valid regex")
});

static RE_PAGE_TYPE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<page_type>(.*?)</page_type>").expect("valid regex"));

static RE_PAGE_CONTENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<page_content>(.*?)</page_content>").expect("valid regex"));

static RE_OUTPUT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<output>(.*?)</output\s*>").expect("valid regex"));

static RE_JSON_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)```(?:json)?\s*\n(.*?)```").expect("valid regex"));

static RE_TOOL_CALL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<tool_call>(.*?)</tool_call\s*>").expect("valid regex"));

static RE_THINKING: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<thinking>.*?</thinking\s*>").expect("valid regex"));

static RE_PAGE_MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\[pg \d+\]\(/page/\d+\))|\b(?i:pg|page)\.?\s+(\d+)\b").expect("valid regex")
});

static RE_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("valid regex"));

static RE_RANGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*(\d+)\s*[-–]\s*(\d+)\s*$").expect("valid regex"));

/// All `<output page="N">` blocks, in response order. Blocks inside a
/// `<thinking>` section are ignored.
pub fn page_blocks(text: &str) -> Vec<PageBlock> {
    let text = RE_THINKING.replace_all(text, "");
    RE_PAGE_BLOCK
        .captures_iter(&text)
        .filter_map(|caps| {
            let page = caps.get(1)?.as_str().parse::<u32>().ok()?;
            let body = caps.get(2).map(|m| m.as_str()).unwrap_or("");
            let tag = |re: &Regex| {
                re.captures(body)
                    .and_then(|c| c.get(1))
                    .map(|m| m.as_str().trim().to_string())
                    .filter(|s| !s.is_empty())
            };
            Some(PageBlock {
                page,
                page_type: tag(&RE_PAGE_TYPE),
                content: tag(&RE_PAGE_CONTENT),
                raw: body.trim().to_string(),
            })
        })
        .collect()
}

/// Locate the JSON object a response carries.
///
/// Preference order: the last `<output>` block, the last fenced block, then
/// the outermost `{…}` of the whole text.
pub fn json_object(text: &str) -> Option<Map<String, Value>> {
    let text = RE_THINKING.replace_all(text, "");

    if let Some(body) = RE_OUTPUT
        .captures_iter(&text)
        .filter_map(|c| c.get(1))
        .last()
    {
        if let Some(obj) = object_in(body.as_str()) {
            return Some(obj);
        }
    }

    if let Some(body) = RE_JSON_FENCE
        .captures_iter(&text)
        .filter_map(|c| c.get(1))
        .last()
    {
        if let Some(obj) = object_in(body.as_str()) {
            return Some(obj);
        }
    }

    object_in(&text)
}

/// Parse `s` as a JSON object, falling back to the outermost braces in it.
fn object_in(s: &str) -> Option<Map<String, Value>> {
    let trimmed = s.trim();
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
        return Some(obj);
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str::<Value>(&trimmed[start..=end]) {
        Ok(Value::Object(obj)) => Some(obj),
        _ => None,
    }
}

/// Every well-formed `<tool_call>` block, in order.
///
/// A block is `{"tool": "<name>", "arguments": {…}}`; `name` and `input`
/// are accepted as aliases. Malformed blocks are skipped.
pub fn tool_calls(text: &str) -> Vec<ToolCall> {
    RE_TOOL_CALL
        .captures_iter(text)
        .filter_map(|c| c.get(1))
        .filter_map(|body| {
            let obj = object_in(body.as_str())?;
            let tool = obj
                .get("tool")
                .or_else(|| obj.get("name"))
                .and_then(Value::as_str)?
                .trim()
                .to_string();
            if tool.is_empty() {
                return None;
            }
            let arguments = match obj.get("arguments").or_else(|| obj.get("input")) {
                Some(Value::Object(args)) => args.clone(),
                Some(Value::String(s)) => match serde_json::from_str::<Value>(s) {
                    Ok(Value::Object(args)) => args,
                    _ => return None,
                },
                None | Some(Value::Null) => Map::new(),
                Some(_) => return None,
            };
            Some(ToolCall { tool, arguments })
        })
        .collect()
}

/// Response text with every `<tool_call>` block removed.
pub fn strip_tool_calls(text: &str) -> String {
    RE_TOOL_CALL.replace_all(text, "").trim().to_string()
}

/// Page numbers cited by a `page_references` value.
///
/// Accepts integers, numeric strings, `"pg 3"`, ranges `"3-5"`, comma lists
/// and arrays of any of these. `"N/A"` and other non-numeric text yield
/// nothing. The result is sorted and deduplicated; no bound check is done
/// here.
pub fn page_references(value: &Value) -> Vec<u32> {
    let mut pages = Vec::new();
    collect_references(value, &mut pages);
    pages.sort_unstable();
    pages.dedup();
    pages
}

fn collect_references(value: &Value, out: &mut Vec<u32>) {
    match value {
        Value::Number(n) => {
            if let Some(p) = n.as_u64().and_then(|p| u32::try_from(p).ok()) {
                out.push(p);
            }
        }
        Value::String(s) => {
            for part in s.split(',') {
                if let Some(caps) = RE_RANGE.captures(part) {
                    let a = caps[1].parse::<u32>().ok();
                    let b = caps[2].parse::<u32>().ok();
                    if let (Some(a), Some(b)) = (a, b) {
                        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
                        if hi - lo <= MAX_REFERENCE_SPAN {
                            out.extend(lo..=hi);
                        }
                    }
                    continue;
                }
                if let Some(m) = RE_NUMBER.find(part) {
                    if let Ok(p) = m.as_str().parse::<u32>() {
                        out.push(p);
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, out);
            }
        }
        _ => {}
    }
}

/// Rewrite plain page mentions ("pg 3", "page 12") as `[pg N](/page/N)`
/// links. Existing links are left alone.
pub fn link_page_mentions(text: &str) -> String {
    RE_PAGE_MENTION
        .replace_all(text, |caps: &regex::Captures| {
            if let Some(existing) = caps.get(1) {
                return existing.as_str().to_string();
            }
            let n = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            format!("[pg {n}](/page/{n})")
        })
        .into_owned()
}
