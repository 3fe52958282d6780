//! Pipeline integration tests.
//!
//! Every test drives the real orchestrator and stages against in-memory
//! stores, a scripted model and a fake renderer (see `common`).

mod common;

use common::*;
use edgequake_underwrite::store::{JobStore, ObjectStore};
use edgequake_underwrite::{
    chat, BroadcastObserver, ChatRole, ChatTurn, InsuranceProfile, JobId, JobStatus, ObjectCreated,
    Orchestrator, PageRange, PipelineConfig, PipelineEvent, Stage, TriggerDispatcher,
    UnderwriteError,
};
use std::sync::Arc;
use std::time::Duration;

fn range(start: u32, end: u32) -> PageRange {
    PageRange::new(start, end).unwrap()
}

fn user(text: &str) -> ChatTurn {
    ChatTurn {
        role: ChatRole::User,
        text: text.into(),
    }
}

// ── Concrete scenarios ───────────────────────────────────────────────────────

#[tokio::test]
async fn three_pages_run_as_one_batch() {
    let h = harness(config(3), 3, ScriptedModel::new());
    let orchestrator = Orchestrator::new(h.ctx.clone());

    let job = orchestrator
        .submit("application.pdf", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap();
    let job = orchestrator.run(&job.job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Complete, "error: {:?}", job.error_message);
    assert_eq!(h.model.extracted_ranges(), vec![range(1, 3)]);
    assert_eq!(h.model.extraction_image_counts(), vec![3]);
    assert_eq!(job.classification.as_deref(), Some("LIFE_INSURANCE_APPLICATION"));
    assert_eq!(job.page_count, Some(3));
    assert_eq!(job.extraction.keys().copied().collect::<Vec<_>>(), vec![1, 2, 3]);
    assert_eq!(job.extraction[&2].page_type, "Application-Continued");

    let analysis = job.analysis.as_ref().unwrap();
    assert_eq!(analysis.risks.len(), 2);
    // Page 99 does not exist in a 3-page document.
    assert_eq!(analysis.risks[1].page_references, vec![1]);

    let action = job.action.as_ref().unwrap();
    assert_eq!(action.tool, "flag_for_manual_review");
    let artifact = h.objects.get(&action.artifact_key).await.unwrap();
    let artifact = String::from_utf8(artifact).unwrap();
    assert!(artifact.contains(&job.object_key));
    assert!(artifact.contains("Blood pressure readings need review"));
}

#[tokio::test]
async fn seven_pages_run_as_three_batches() {
    let cfg = PipelineConfig::builder()
        .batch_size(3)
        .extraction_concurrency(3)
        .build()
        .unwrap();
    let h = harness(cfg, 7, ScriptedModel::new());
    let orchestrator = Orchestrator::new(h.ctx.clone());

    let job = orchestrator
        .submit("bundle.pdf", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap();
    let job = orchestrator.run(&job.job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Complete);
    assert_eq!(
        h.model.extracted_ranges(),
        vec![range(1, 3), range(4, 6), range(7, 7)]
    );
    assert_eq!(job.extraction.len(), 7);
    assert_eq!(
        job.extraction.keys().copied().collect::<Vec<_>>(),
        (1..=7).collect::<Vec<_>>()
    );

    let chunks = h
        .objects
        .list(&format!("extracted/{}/", job.job_id))
        .await
        .unwrap();
    assert_eq!(chunks.len(), 3);

    // Every cited page is inside the document.
    assert!(job
        .analysis
        .as_ref()
        .unwrap()
        .cited_pages()
        .all(|p| (1..=7).contains(&p)));
}

#[tokio::test]
async fn failed_batch_fails_job_and_skips_analysis() {
    let cfg = PipelineConfig::builder()
        .batch_size(3)
        .extraction_concurrency(2)
        .retry_backoff_ms(1)
        .build()
        .unwrap();
    let model = ScriptedModel::new().fail_batch(range(4, 6), "model unavailable");
    let h = harness(cfg, 7, model);
    let orchestrator = Orchestrator::new(h.ctx.clone());

    let job = orchestrator
        .submit("bundle.pdf", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap();
    let job = orchestrator.run(&job.job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    let message = job.error_message.as_deref().unwrap();
    assert!(message.contains("4-6"), "got: {message}");
    assert!(message.contains("model unavailable"), "got: {message}");

    // Every batch was attempted, analysis never ran.
    assert_eq!(h.model.extracted_ranges().len(), 3);
    assert!(!h.model.stages().contains(&Stage::Analyze));
    assert!(job.analysis.is_none());
    assert!(job.action.is_none());

    // Sibling batches' writes remain in storage.
    let chunks = h
        .objects
        .list(&format!("extracted/{}/", job.job_id))
        .await
        .unwrap();
    assert_eq!(chunks.len(), 2);
    assert!(chunks.iter().any(|k| k.ends_with("1-3.json")));
    assert!(chunks.iter().any(|k| k.ends_with("7-7.json")));
    assert_eq!(job.extraction.len(), 4);
}

#[tokio::test]
async fn earliest_failed_batch_names_the_error() {
    let model = ScriptedModel::new()
        .fail_batch(range(7, 9), "late failure")
        .fail_batch(range(4, 6), "early failure");
    let h = harness(config(3), 9, model);
    let orchestrator = Orchestrator::new(h.ctx.clone());

    let job = orchestrator
        .submit("a.pdf", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap();
    let job = orchestrator.run(&job.job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.unwrap().contains("early failure"));
}

#[tokio::test]
async fn storage_failure_inside_a_batch_ends_in_error() {
    let h = harness(config(3), 3, ScriptedModel::new());
    let orchestrator = Orchestrator::new(h.ctx.clone());

    let job = orchestrator
        .submit("a.pdf", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap();
    h.objects
        .put(&format!("extracted/{}/1-3.json", job.job_id), b"{}".to_vec())
        .await
        .unwrap();
    let job = orchestrator.run(&job.job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Error);
    let message = job.error_message.as_deref().unwrap();
    assert!(message.contains("already exists"), "got: {message}");
    assert!(!h.model.stages().contains(&Stage::Analyze));
}

#[tokio::test]
async fn duplicate_run_leaves_the_first_one_alone() {
    let model = ScriptedModel::new().delay(Stage::Classify, Duration::from_millis(50));
    let h = harness(config(3), 3, model);
    let orchestrator = Orchestrator::new(h.ctx.clone());

    let job = orchestrator
        .submit("a.pdf", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap();
    let (first, second) = tokio::join!(orchestrator.run(&job.job_id), orchestrator.run(&job.job_id));

    let outcomes = [&first, &second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    for result in outcomes {
        match result {
            Ok(job) => assert_eq!(job.status, JobStatus::Complete),
            Err(e) => assert!(
                matches!(
                    e,
                    UnderwriteError::IllegalTransition { .. }
                        | UnderwriteError::RevisionConflict { .. }
                ),
                "got: {e}"
            ),
        }
    }

    let stored = h.jobs.get(&job.job_id).await.unwrap();
    assert_eq!(stored.status, JobStatus::Complete);
    assert!(stored.error_message.is_none());
    assert_eq!(
        h.model.stages().iter().filter(|s| **s == Stage::Classify).count(),
        1
    );
}

#[tokio::test]
async fn chat_on_extracting_job_is_not_ready() {
    let h = harness(config(3), 3, ScriptedModel::new());
    let orchestrator = Orchestrator::new(h.ctx.clone());
    let job = orchestrator
        .submit("a.pdf", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap();
    let job = h
        .jobs
        .transition(&job.job_id, 0, JobStatus::Classifying, None)
        .await
        .unwrap();
    h.jobs
        .transition(&job.job_id, job.revision, JobStatus::Extracting, None)
        .await
        .unwrap();

    let err = chat(&h.ctx, &job.job_id, &[user("Any risks?")])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        UnderwriteError::JobNotReady {
            status: JobStatus::Extracting,
            ..
        }
    ));
    assert!(!h.model.stages().contains(&Stage::Chat));
}

#[tokio::test]
async fn unparseable_classification_fails_before_planning() {
    let model = ScriptedModel::new().reply(Stage::Classify, "Looks like some kind of form to me.");
    let h = harness(config(3), 5, model);
    let orchestrator = Orchestrator::new(h.ctx.clone());

    let job = orchestrator
        .submit("a.pdf", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap();
    let job = orchestrator.run(&job.job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert!(job.error_message.as_deref().unwrap().contains("classify"));
    assert_eq!(h.model.stages(), vec![Stage::Classify]);
    assert!(job.extraction.is_empty());
    let history: Vec<JobStatus> = job.history.iter().map(|c| c.status).collect();
    assert_eq!(
        history,
        vec![JobStatus::Created, JobStatus::Classifying, JobStatus::Failed]
    );
}

#[tokio::test]
async fn jobs_in_one_batch_are_tracked_separately() {
    let model = ScriptedModel::new().reply(Stage::Analyze, PC_ANALYSIS_REPLY);
    let h = harness(config(3), 4, model);
    let orchestrator = Orchestrator::new(h.ctx.clone());

    let first = orchestrator
        .submit("a.pdf", PDF_BYTES.to_vec(), InsuranceProfile::PropertyCasualty, Some("B1".into()))
        .await
        .unwrap();
    let second = orchestrator
        .submit("b.pdf", PDF_BYTES.to_vec(), InsuranceProfile::PropertyCasualty, Some("B1".into()))
        .await
        .unwrap();
    orchestrator
        .submit("c.pdf", PDF_BYTES.to_vec(), InsuranceProfile::PropertyCasualty, Some("B2".into()))
        .await
        .unwrap();

    orchestrator.run(&first.job_id).await.unwrap();

    let batch = h.jobs.list_by_batch("B1").await.unwrap();
    assert_eq!(batch.len(), 2);
    let status_of = |id: &JobId| batch.iter().find(|s| &s.job_id == id).unwrap().status;
    assert_eq!(status_of(&first.job_id), JobStatus::Complete);
    assert_eq!(status_of(&second.job_id), JobStatus::Created);

    let done = orchestrator.run(&second.job_id).await.unwrap();
    assert_eq!(done.status, JobStatus::Complete);
    // The classifier label is outside the P&C set.
    assert_eq!(done.classification.as_deref(), Some("OTHER"));
    assert_eq!(
        done.analysis.unwrap().domain_section.text,
        "Wood frame warehouse, protection class 6."
    );
}

// ── Properties ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn timeout_ends_in_error() {
    let cfg = PipelineConfig::builder()
        .api_timeout_secs(1)
        .pipeline_timeout_secs(1)
        .build()
        .unwrap();
    let model = ScriptedModel::new().delay(Stage::Analyze, Duration::from_secs(3));
    let h = harness(cfg, 2, model);
    let orchestrator = Orchestrator::new(h.ctx.clone());

    let job = orchestrator
        .submit("a.pdf", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap();
    let job = orchestrator.run(&job.job_id).await.unwrap();

    assert_eq!(job.status, JobStatus::Error);
    assert!(job.error_message.unwrap().contains("timeout"));
    assert!(job.analysis.is_none());
}

#[tokio::test]
async fn history_is_the_forward_sequence() {
    let h = harness(config(2), 5, ScriptedModel::new());
    let orchestrator = Orchestrator::new(h.ctx.clone());
    let job = orchestrator
        .submit("a.pdf", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap();
    let job = orchestrator.run(&job.job_id).await.unwrap();

    let history: Vec<JobStatus> = job.history.iter().map(|c| c.status).collect();
    assert_eq!(history, JobStatus::SEQUENCE.to_vec());
    assert_eq!(job.revision, 5);
    assert!(job.history.windows(2).all(|w| w[0].at <= w[1].at));

    // Terminal: neither a rerun nor a transition can move it.
    assert!(orchestrator.run(&job.job_id).await.is_err());
    let err = h
        .jobs
        .transition(&job.job_id, job.revision, JobStatus::Error, None)
        .await
        .unwrap_err();
    assert!(matches!(err, UnderwriteError::JobTerminal { .. }));
}

#[tokio::test]
async fn reads_of_a_completed_job_are_identical() {
    let h = harness(config(3), 3, ScriptedModel::new());
    let orchestrator = Orchestrator::new(h.ctx.clone());
    let job = orchestrator
        .submit("a.pdf", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap();
    orchestrator.run(&job.job_id).await.unwrap();

    let a = h.jobs.get(&job.job_id).await.unwrap();
    let b = h.jobs.get(&job.job_id).await.unwrap();
    assert_eq!(a, b);
    assert_eq!(
        serde_json::to_string(&a).unwrap(),
        serde_json::to_string(&b).unwrap()
    );
}

#[tokio::test]
async fn submit_rejects_bad_input_without_creating_a_job() {
    let h = harness(config(3), 3, ScriptedModel::new());
    let orchestrator = Orchestrator::new(h.ctx.clone());

    let err = orchestrator
        .submit("notes.docx", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap_err();
    assert!(matches!(err, UnderwriteError::UnsupportedFileType { .. }));

    let err = orchestrator
        .submit("a.pdf", b"PK\x03\x04 zip".to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap_err();
    assert!(matches!(err, UnderwriteError::NotAPdf { .. }));

    assert!(h.jobs.list().await.unwrap().is_empty());
}

// ── Chat ─────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn chat_answers_with_links_and_calculator_results() {
    let model = ScriptedModel::new().reply(
        Stage::Chat,
        r#"The applicant's BMI is borderline, see pg 2.
<tool_call>{"tool": "calculate_bmi", "arguments": {"height_cm": 180, "weight_kg": 81}}</tool_call>"#,
    );
    let h = harness(config(3), 3, model);
    let orchestrator = Orchestrator::new(h.ctx.clone());
    let job = orchestrator
        .submit("a.pdf", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap();
    orchestrator.run(&job.job_id).await.unwrap();

    let history = [
        user("Summarise the medical history."),
        ChatTurn {
            role: ChatRole::Assistant,
            text: "Hypertension since 2020.".into(),
        },
        user("What is the BMI?"),
    ];
    let reply = chat(&h.ctx, &job.job_id, &history).await.unwrap();

    assert_eq!(reply.job_id, job.job_id);
    assert!(reply.response.contains("[pg 2](/page/2)"), "got: {}", reply.response);
    assert!(reply.response.contains("BMI Calculation: 25.0 (Overweight)"));
    assert!(!reply.response.contains("<tool_call>"));
    assert_eq!(reply.tool_calls.len(), 1);
    assert_eq!(reply.tool_calls[0].name, "calculate_bmi");
    assert_eq!(reply.tool_calls[0].output.as_ref().unwrap()["result"]["bmi"], 25.0);

    // Chat is a read: the job is unchanged.
    let after = h.jobs.get(&job.job_id).await.unwrap();
    assert_eq!(after.revision, 5);
}

// ── Observer and trigger ─────────────────────────────────────────────────────

#[tokio::test]
async fn observer_sees_every_batch_and_the_finish() {
    let h = harness(config(3), 7, ScriptedModel::new());
    let events = BroadcastObserver::new(64);
    let mut rx = events.subscribe();
    let orchestrator = Orchestrator::new(h.ctx.clone()).with_observer(Arc::new(events));

    let job = orchestrator
        .submit("a.pdf", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap();
    orchestrator.run(&job.job_id).await.unwrap();

    let mut seen = Vec::new();
    while let Ok(event) = rx.try_recv() {
        seen.push(event);
    }
    let batches = seen
        .iter()
        .filter(|e| matches!(e, PipelineEvent::BatchComplete { .. }))
        .count();
    assert_eq!(batches, 3);
    assert!(matches!(
        seen.iter().find(|e| matches!(e, PipelineEvent::BatchesPlanned { .. })),
        Some(PipelineEvent::BatchesPlanned { ranges, .. }) if ranges.len() == 3
    ));
    assert!(matches!(
        seen.last(),
        Some(PipelineEvent::Finished {
            status: JobStatus::Complete,
            ..
        })
    ));
}

#[tokio::test]
async fn upload_event_starts_the_pipeline() {
    let h = harness(config(3), 3, ScriptedModel::new());
    let orchestrator = Orchestrator::new(h.ctx.clone());
    let (trigger, _loop) = TriggerDispatcher::start(orchestrator.clone(), 8);

    let job = orchestrator
        .submit("a.pdf", PDF_BYTES.to_vec(), InsuranceProfile::Life, None)
        .await
        .unwrap();
    // Objects outside uploads/ are ignored.
    trigger
        .notify(ObjectCreated::new("agent_outputs/x.txt"))
        .await
        .unwrap();
    trigger
        .notify(ObjectCreated::new(job.object_key.clone()))
        .await
        .unwrap();

    let mut status = JobStatus::Created;
    for _ in 0..200 {
        status = h.jobs.get(&job.job_id).await.unwrap().status;
        if status.is_terminal() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(status, JobStatus::Complete);
}
