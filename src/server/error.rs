//! API error type with structured JSON responses.

use crate::error::UnderwriteError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// `{ "error": { "code": ..., "message": ... } }`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Underwrite(#[from] UnderwriteError),
    #[error("Link is unknown or has expired")]
    GrantNotFound,
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str) {
        use UnderwriteError as E;
        match self {
            ApiError::GrantNotFound => (StatusCode::NOT_FOUND, "LINK_EXPIRED"),
            ApiError::Underwrite(e) if e.is_validation() => {
                let code = match e {
                    E::UnsupportedFileType { .. } => "UNSUPPORTED_FILE_TYPE",
                    E::NotAPdf { .. } => "NOT_A_PDF",
                    E::MissingField(_) => "MISSING_FIELD",
                    _ => "INVALID_FIELD",
                };
                (StatusCode::BAD_REQUEST, code)
            }
            ApiError::Underwrite(e) => match e {
                E::JobNotFound { .. } => (StatusCode::NOT_FOUND, "JOB_NOT_FOUND"),
                E::ObjectNotFound { .. } => (StatusCode::NOT_FOUND, "OBJECT_NOT_FOUND"),
                E::JobNotReady { .. } => (StatusCode::CONFLICT, "NOT_READY"),
                E::ObjectExists { .. } => (StatusCode::CONFLICT, "ALREADY_UPLOADED"),
                E::JobAlreadyExists { .. }
                | E::RevisionConflict { .. }
                | E::IllegalTransition { .. }
                | E::JobTerminal { .. } => (StatusCode::CONFLICT, "CONFLICT"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.parts();
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(detail = %self, "API internal error");
            "An internal error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = ErrorBody {
            error: ErrorDetail { code, message },
        };
        (status, Json(body)).into_response()
    }
}
