//! Route table.
//!
//! Path params use `:param` syntax (axum 0.7).

use super::handlers;
use super::AppState;
use axum::routing::{get, post, put};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Uploaded documents larger than this are refused.
pub const MAX_UPLOAD_BYTES: usize = 100 * 1024 * 1024;

pub fn api_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/documents/upload", post(handlers::create_upload))
        .route(
            "/uploads/:token",
            put(handlers::put_upload).layer(axum::extract::DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/documents/:token", get(handlers::document))
        .route("/jobs", get(handlers::list_jobs))
        .route("/jobs/:job_id", get(handlers::get_job))
        .route("/jobs/:job_id/document-url", get(handlers::document_url))
        .route("/jobs/:job_id/events", get(handlers::job_events))
        .route("/batches/:batch_id/jobs", get(handlers::batch_jobs))
        .route("/chat/:job_id", post(handlers::chat));

    Router::new()
        .route("/health", get(handlers::health))
        .nest("/api", api)
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
