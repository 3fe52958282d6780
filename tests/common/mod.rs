//! Shared fakes for the integration tests.
//!
//! `ScriptedModel` answers each stage from a script instead of calling an
//! LLM, and `FakeRenderer` pretends every document has a fixed page count,
//! so the whole pipeline runs without pdfium or network access.

#![allow(dead_code)]

use async_trait::async_trait;
use edgequake_underwrite::pipeline::llm::{ModelClient, ModelReply, ModelRequest};
use edgequake_underwrite::pipeline::render::{PageRenderer, RenderedPage};
use edgequake_underwrite::store::{JobStore, MemoryJobStore, MemoryObjectStore, ObjectStore};
use edgequake_underwrite::{PageRange, PipelineConfig, Stage, StageContext, UnderwriteError};
use image::DynamicImage;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Smallest byte string that passes the PDF magic check.
pub const PDF_BYTES: &[u8] = b"%PDF-1.7\n%fake\n";

pub const CLASSIFY_REPLY: &str = r#"{"document_type": "LIFE_INSURANCE_APPLICATION"}"#;

pub const LIFE_ANALYSIS_REPLY: &str = r#"<thinking>checking pages</thinking>
<output>
{
  "SUMMARY": "Term life application, 45 year old non-smoker.",
  "RISK_ASSESSMENT": [
    {"description": "Elevated blood pressure", "severity": "Medium", "page_references": ["2"]},
    {"description": "Prior surgery", "severity": "Low", "page_references": [1, 99]}
  ],
  "DISCREPANCIES": [],
  "MEDICAL_TIMELINE": "- 2020: hypertension diagnosed (pg 2)",
  "FINAL_RECOMMENDATION": "Proceed with standard rating pending APS.",
  "CONFIDENCE_SCORE": 0.7
}
</output>"#;

pub const PC_ANALYSIS_REPLY: &str = r#"<output>
{
  "RISK_ASSESSMENT": [{"description": "Frame construction", "severity": "High", "page_references": "pg 1"}],
  "DISCREPANCIES": [],
  "PROPERTY_ASSESSMENT": "Wood frame warehouse, protection class 6.",
  "FINAL_RECOMMENDATION": "Request inspection report."
}
</output>"#;

pub const ACT_REPLY: &str = r#"The file is complete enough for a human.
<tool_call>{"tool": "flag_for_manual_review", "arguments": {"reason": "Blood pressure readings need review"}}</tool_call>"#;

pub const CHAT_REPLY: &str = "Blood pressure is noted on pg 2.";

/// One scripted answer.
#[derive(Clone)]
pub enum Reply {
    Text(String),
    Fail(String),
}

/// A `ModelClient` that answers from a script.
///
/// Extraction replies are generated per batch (one well-formed block per
/// page) unless a batch is scripted to fail.
pub struct ScriptedModel {
    replies: Mutex<HashMap<Stage, Reply>>,
    failing_batches: Mutex<HashMap<PageRange, String>>,
    delays: Mutex<HashMap<Stage, Duration>>,
    calls: Mutex<Vec<(Stage, Option<PageRange>, usize)>>,
}

impl ScriptedModel {
    pub fn new() -> Self {
        let mut replies = HashMap::new();
        replies.insert(Stage::Classify, Reply::Text(CLASSIFY_REPLY.into()));
        replies.insert(Stage::Analyze, Reply::Text(LIFE_ANALYSIS_REPLY.into()));
        replies.insert(Stage::Act, Reply::Text(ACT_REPLY.into()));
        replies.insert(Stage::Chat, Reply::Text(CHAT_REPLY.into()));
        Self {
            replies: Mutex::new(replies),
            failing_batches: Mutex::new(HashMap::new()),
            delays: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn reply(self, stage: Stage, text: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(stage, Reply::Text(text.into()));
        self
    }

    pub fn fail(self, stage: Stage, detail: &str) -> Self {
        self.replies
            .lock()
            .unwrap()
            .insert(stage, Reply::Fail(detail.into()));
        self
    }

    pub fn fail_batch(self, range: PageRange, detail: &str) -> Self {
        self.failing_batches
            .lock()
            .unwrap()
            .insert(range, detail.into());
        self
    }

    pub fn delay(self, stage: Stage, by: Duration) -> Self {
        self.delays.lock().unwrap().insert(stage, by);
        self
    }

    /// Stages called, in call order.
    pub fn stages(&self) -> Vec<Stage> {
        self.calls.lock().unwrap().iter().map(|c| c.0).collect()
    }

    /// Ranges of the extraction calls, sorted.
    pub fn extracted_ranges(&self) -> Vec<PageRange> {
        let mut ranges: Vec<PageRange> = self
            .calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.0 == Stage::Extract)
            .filter_map(|c| c.1)
            .collect();
        ranges.sort();
        ranges
    }

    /// Images attached to every extraction call, in call order.
    pub fn extraction_image_counts(&self) -> Vec<usize> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.0 == Stage::Extract)
            .map(|c| c.2)
            .collect()
    }

    pub fn extraction_block(range: PageRange) -> String {
        range
            .pages()
            .map(|p| {
                let kind = if p == range.start { "Application" } else { "Application-Continued" };
                format!(
                    "<output page=\"{p}\"><page_type>{kind}</page_type>\
                     <page_content>Content of page {p}</page_content></output>"
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn converse(&self, request: ModelRequest) -> Result<ModelReply, UnderwriteError> {
        self.calls
            .lock()
            .unwrap()
            .push((request.stage, request.range, request.image_count()));

        let delay = self.delays.lock().unwrap().get(&request.stage).copied();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }

        let failure = |detail: String| UnderwriteError::ModelCallFailed {
            stage: request.stage,
            retries: 0,
            detail,
        };

        if request.stage == Stage::Extract {
            let range = request.range.expect("extraction carries its range");
            if let Some(detail) = self.failing_batches.lock().unwrap().get(&range).cloned() {
                return Err(failure(detail));
            }
            return Ok(ModelReply::text(Self::extraction_block(range)));
        }

        let reply = self.replies.lock().unwrap().get(&request.stage).cloned();
        match reply {
            Some(Reply::Text(text)) => Ok(ModelReply::text(text)),
            Some(Reply::Fail(detail)) => Err(failure(detail)),
            None => Err(failure("no scripted reply".into())),
        }
    }
}

/// A renderer whose documents all have `pages` blank pages.
pub struct FakeRenderer {
    pub pages: u32,
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn page_count(&self, _pdf: Arc<Vec<u8>>) -> Result<u32, UnderwriteError> {
        Ok(self.pages)
    }

    async fn render(
        &self,
        _pdf: Arc<Vec<u8>>,
        range: PageRange,
    ) -> Result<Vec<RenderedPage>, UnderwriteError> {
        range
            .pages()
            .map(|page| {
                if page > self.pages {
                    return Err(UnderwriteError::RasterisationFailed {
                        page,
                        detail: "page out of range".into(),
                    });
                }
                Ok(RenderedPage {
                    page,
                    image: DynamicImage::new_rgb8(16, 16),
                })
            })
            .collect()
    }
}

pub struct Harness {
    pub ctx: StageContext,
    pub model: Arc<ScriptedModel>,
    pub jobs: Arc<MemoryJobStore>,
    pub objects: Arc<MemoryObjectStore>,
}

pub fn harness(config: PipelineConfig, pages: u32, model: ScriptedModel) -> Harness {
    let model = Arc::new(model);
    let jobs = Arc::new(MemoryJobStore::new());
    let objects = Arc::new(MemoryObjectStore::new());
    let ctx = StageContext {
        config: Arc::new(config),
        jobs: Arc::clone(&jobs) as Arc<dyn JobStore>,
        objects: Arc::clone(&objects) as Arc<dyn ObjectStore>,
        model: Arc::clone(&model) as Arc<dyn ModelClient>,
        renderer: Arc::new(FakeRenderer { pages }),
    };
    Harness {
        ctx,
        model,
        jobs,
        objects,
    }
}

pub fn config(batch_size: u32) -> PipelineConfig {
    PipelineConfig::builder()
        .batch_size(batch_size)
        .retry_backoff_ms(1)
        .build()
        .expect("valid config")
}
