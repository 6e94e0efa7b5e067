//! API error types with structured JSON responses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::compile::CompilerLog;
use crate::error::{CompileError, HistoryError, SessionError};
use crate::pipeline::{EditError, SubmitError, TransitionError};

/// Structured error response body.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

#[derive(Debug, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler_log: Option<CompilerLog>,
}

/// API-level errors with HTTP status mapping.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Invalid request: {0}")]
    BadRequest(String),
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Service unavailable: {0}")]
    Unavailable(String),
    #[error("Internal error: {0}")]
    Internal(String),
    #[error("Compilation failed: {}", .0.summary())]
    CompilationFailed(CompilerLog),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut compiler_log = None;
        let (status, code, message) = match self {
            ApiError::NotFound(detail) => (StatusCode::NOT_FOUND, "NOT_FOUND", detail),
            ApiError::BadRequest(detail) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", detail),
            ApiError::UnsupportedFileType(detail) => (
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "UNSUPPORTED_FILE_TYPE",
                detail,
            ),
            ApiError::PayloadTooLarge(detail) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "PAYLOAD_TOO_LARGE", detail)
            }
            ApiError::Conflict(detail) => (StatusCode::CONFLICT, "CONFLICT", detail),
            ApiError::Unavailable(detail) => {
                (StatusCode::SERVICE_UNAVAILABLE, "UNAVAILABLE", detail)
            }
            ApiError::Internal(detail) => {
                tracing::error!(detail, "API internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL",
                    "An internal error occurred".to_string(),
                )
            }
            ApiError::CompilationFailed(log) => {
                let summary = log.summary();
                compiler_log = Some(log);
                (StatusCode::UNPROCESSABLE_ENTITY, "COMPILATION_FAILED", summary)
            }
        };

        let body = ErrorBody {
            error: ErrorPayload {
                code,
                message,
                compiler_log,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => ApiError::NotFound(err.to_string()),
            SessionError::InvalidId(_) | SessionError::UnknownRole(_) => {
                ApiError::BadRequest(err.to_string())
            }
            SessionError::UnsupportedFileType(_) => ApiError::UnsupportedFileType(err.to_string()),
            SessionError::TooLarge { .. } => ApiError::PayloadTooLarge(err.to_string()),
            SessionError::Io(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<HistoryError> for ApiError {
    fn from(err: HistoryError) -> Self {
        match err {
            HistoryError::NotFound(_) => ApiError::NotFound(err.to_string()),
            HistoryError::Io(_) | HistoryError::Json(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<SubmitError> for ApiError {
    fn from(err: SubmitError) -> Self {
        match err {
            SubmitError::Session(e) => e.into(),
            SubmitError::Credentials(_) | SubmitError::EmptyInstruction => {
                ApiError::BadRequest(err.to_string())
            }
            SubmitError::NothingToModify(_) => ApiError::Conflict(err.to_string()),
        }
    }
}

impl From<TransitionError> for ApiError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::UnknownTask(_) => ApiError::NotFound(err.to_string()),
            TransitionError::Terminal(_)
            | TransitionError::Running(_)
            | TransitionError::Finalizing => ApiError::Conflict(err.to_string()),
            TransitionError::Invalid { .. } | TransitionError::RetryLimit(_) => {
                ApiError::Internal(err.to_string())
            }
        }
    }
}

impl From<EditError> for ApiError {
    fn from(err: EditError) -> Self {
        match err {
            EditError::Session(e) => e.into(),
            EditError::History(e) => e.into(),
            EditError::EmptySource => ApiError::BadRequest(err.to_string()),
            EditError::NothingToEdit(_) | EditError::Busy(_) => ApiError::Conflict(err.to_string()),
            EditError::Compile(CompileError::Unavailable(_)) => ApiError::Unavailable(err.to_string()),
            EditError::Compile(_) => ApiError::Internal(err.to_string()),
        }
    }
}
