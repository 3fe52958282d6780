//! Request handlers.

use super::error::ApiError;
use super::AppState;
use crate::job::{Job, JobId, JobStatus, JobSummary};
use crate::output::{ChatReply, ChatTurn};
use crate::pipeline::chat as chat_stage;
use crate::pipeline::input::{check_pdf_magic, validate_upload_filename};
use crate::profile::InsuranceProfile;
use crate::progress::PipelineEvent;
use crate::trigger::ObjectCreated;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::info;

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

// ── Upload ───────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadRequest {
    pub filename: Option<String>,
    pub insurance_type: Option<String>,
    pub batch_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadTicket {
    pub job_id: JobId,
    pub upload_url: String,
    pub object_key: String,
    pub status: JobStatus,
    pub insurance_type: InsuranceProfile,
    pub expires_at: DateTime<Utc>,
}

/// Create the job and hand back a temporary upload link.
pub async fn create_upload(
    State(state): State<AppState>,
    Json(req): Json<UploadRequest>,
) -> Result<(StatusCode, Json<UploadTicket>), ApiError> {
    let filename = validate_upload_filename(req.filename.as_deref().unwrap_or_default())?;
    let profile = InsuranceProfile::resolve(req.insurance_type.as_deref())?;
    let batch_id = req
        .batch_id
        .map(|b| b.trim().to_string())
        .filter(|b| !b.is_empty());

    let job = Job::new(JobId::generate(), filename, profile, batch_id);
    let job = state.context().jobs.create(job).await?;
    let grant = state
        .grants
        .issue_upload(job.job_id.clone(), job.object_key.clone());

    info!(job_id = %job.job_id, profile = profile.as_str(), "Upload requested");
    Ok((
        StatusCode::CREATED,
        Json(UploadTicket {
            job_id: job.job_id,
            upload_url: format!("/api/uploads/{}", grant.token),
            object_key: job.object_key,
            status: job.status,
            insurance_type: job.insurance_type,
            expires_at: grant.expires_at,
        }),
    ))
}

/// Receive the document bytes for an upload grant.
pub async fn put_upload(
    State(state): State<AppState>,
    Path(token): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<serde_json::Value>), ApiError> {
    let (job_id, key) = state
        .grants
        .upload_target(&token)
        .ok_or(ApiError::GrantNotFound)?;
    check_pdf_magic(&body)?;

    state.context().objects.put(&key, body.to_vec()).await?;
    state.grants.revoke(&token);
    info!(job_id = %job_id, key = %key, bytes = body.len(), "Document stored");

    state.trigger.notify(ObjectCreated::new(key.clone())).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "jobId": job_id, "objectKey": key })),
    ))
}

// ── Jobs ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub batch_id: Option<String>,
}

pub async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<JobSummary>>, ApiError> {
    let jobs = &state.context().jobs;
    let summaries = match query.batch_id.as_deref().map(str::trim) {
        Some(batch) if !batch.is_empty() => jobs.list_by_batch(batch).await?,
        _ => jobs.list().await?,
    };
    Ok(Json(summaries))
}

pub async fn batch_jobs(
    State(state): State<AppState>,
    Path(batch_id): Path<String>,
) -> Result<Json<Vec<JobSummary>>, ApiError> {
    Ok(Json(state.context().jobs.list_by_batch(&batch_id).await?))
}

pub async fn get_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Job>, ApiError> {
    let job_id = JobId::parse(&job_id)?;
    Ok(Json(state.context().jobs.get(&job_id).await?))
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentUrl {
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

/// Temporary read link for the job's document.
pub async fn document_url(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<DocumentUrl>, ApiError> {
    let job_id = JobId::parse(&job_id)?;
    let job = state.context().jobs.get(&job_id).await?;
    if !state.context().objects.exists(&job.object_key).await? {
        return Err(crate::error::UnderwriteError::ObjectNotFound {
            key: job.object_key,
        }
        .into());
    }
    let grant = state.grants.issue_read(job.object_key);
    Ok(Json(DocumentUrl {
        url: format!("/api/documents/{}", grant.token),
        expires_at: grant.expires_at,
    }))
}

pub async fn document(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let key = state
        .grants
        .read_target(&token)
        .ok_or(ApiError::GrantNotFound)?;
    let bytes = state.context().objects.get(&key).await?;
    Ok(([(header::CONTENT_TYPE, "application/pdf")], bytes))
}

/// Server-sent events for one job: its current status first, then every
/// status change and batch outcome as it happens.
pub async fn job_events(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let job_id = JobId::parse(&job_id)?;
    // Subscribe before reading so no change between the two is missed.
    let rx = state.events.subscribe();
    let job = state.context().jobs.get(&job_id).await?;

    let current = PipelineEvent::Status {
        job_id: job.job_id.clone(),
        status: job.status,
    };
    let live = BroadcastStream::new(rx).filter_map(move |msg| match msg {
        Ok(event) if event.job_id() == &job_id => Some(event),
        _ => None,
    });

    let stream = tokio_stream::once(current).chain(live).map(|event| {
        Ok::<_, Infallible>(Event::default()
            .event(event.name())
            .json_data(&event)
            .unwrap_or_else(|_| Event::default().event("error")))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

// ── Chat ─────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub messages: Vec<ChatTurn>,
}

pub async fn chat(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatReply>, ApiError> {
    let job_id = JobId::parse(&job_id)?;
    let reply = chat_stage::chat(state.context(), &job_id, &req.messages).await?;
    Ok(Json(reply))
}
