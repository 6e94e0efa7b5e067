//! Error types for labforge operations.
//!
//! Each subsystem has its own error enum:
//! - Model endpoint calls (`LlmError`)
//! - Text and table extraction (`ExtractionError`)
//! - Content synthesis (`SynthesisError`)
//! - Document compilation infrastructure (`CompileError`)
//! - Session storage (`SessionError`)
//! - Report history (`HistoryError`)
//!
//! Failures that end a task are collapsed into an [`ErrorDetail`], which
//! carries the user-facing [`ErrorKind`] and a message.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::compile::CompilerLog;

/// Errors that can occur while talking to a chat-completions endpoint.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("Invalid endpoint configuration: {0}")]
    InvalidConfig(String),
}

impl LlmError {
    /// Whether the failure is on the transport side and worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            LlmError::RequestFailed(_) | LlmError::Timeout(_) | LlmError::RateLimited(_) => true,
            LlmError::ApiError { code, .. } => *code >= 500,
            LlmError::ParseError(_) | LlmError::InvalidConfig(_) => false,
        }
    }
}

/// Errors that can occur while turning uploads into text and tables.
#[derive(Debug, Error)]
pub enum ExtractionError {
    #[error("No table-like structure found in the data sheets")]
    NoTableDetected,

    #[error("Unsupported file type for text extraction: {0}")]
    UnsupportedFormat(String),

    #[error("Text extraction failed for '{path}': {message}")]
    SourceFailed { path: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while synthesizing report content.
#[derive(Debug, Error)]
pub enum SynthesisError {
    #[error("Generation endpoint unavailable after {attempts} attempt(s): {message}")]
    Unavailable { attempts: u32, message: String },

    #[error("Malformed model output: {reason}")]
    Malformed { reason: String, raw: String },
}

/// Infrastructure errors raised while preparing or running the compiler.
///
/// Compiler diagnostics are not errors; they come back as a [`CompilerLog`].
#[derive(Debug, Error)]
pub enum CompileError {
    #[error("Template rendering failed: {0}")]
    Template(#[from] tera::Error),

    #[error("Compiler unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during session operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session '{0}' not found")]
    NotFound(String),

    #[error("Invalid session id '{0}'")]
    InvalidId(String),

    #[error("Unknown upload role '{0}': expected guide, data_sheet or preview_report")]
    UnknownRole(String),

    #[error("File type not allowed: {0}")]
    UnsupportedFileType(String),

    #[error("File '{name}' is {size} bytes, limit is {limit}")]
    TooLarge { name: String, size: u64, limit: u64 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur during history operations.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("History record '{0}' not found")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// User-facing classification of a task failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    ExtractionFailed,
    SynthesisUnavailable,
    SynthesisMalformed,
    PlottingFailed,
    #[serde(rename = "CompilationFailed-ContentFixable")]
    CompilationContentFixable,
    #[serde(rename = "CompilationFailed-Terminal")]
    CompilationTerminal,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ExtractionFailed => "ExtractionFailed",
            ErrorKind::SynthesisUnavailable => "SynthesisUnavailable",
            ErrorKind::SynthesisMalformed => "SynthesisMalformed",
            ErrorKind::PlottingFailed => "PlottingFailed",
            ErrorKind::CompilationContentFixable => "CompilationFailed-ContentFixable",
            ErrorKind::CompilationTerminal => "CompilationFailed-Terminal",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure recorded on a task when it enters the `failed` state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub kind: ErrorKind,
    pub message: String,
    /// Raw model output for malformed synthesis, kept verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    /// Structured compiler log for compilation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compiler_log: Option<CompilerLog>,
}

impl ErrorDetail {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            raw_output: None,
            compiler_log: None,
        }
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "Task cancelled")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Failure for a compiler log that could not be (or may no longer be) fixed.
    pub fn from_compiler_log(log: CompilerLog) -> Self {
        let kind = if log.is_content_fixable() {
            ErrorKind::CompilationContentFixable
        } else {
            ErrorKind::CompilationTerminal
        };
        let message = log.summary();
        Self {
            kind,
            message,
            raw_output: None,
            compiler_log: Some(log),
        }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl From<ExtractionError> for ErrorDetail {
    fn from(err: ExtractionError) -> Self {
        ErrorDetail::new(ErrorKind::ExtractionFailed, err.to_string())
    }
}

impl From<SynthesisError> for ErrorDetail {
    fn from(err: SynthesisError) -> Self {
        match err {
            SynthesisError::Unavailable { .. } => {
                ErrorDetail::new(ErrorKind::SynthesisUnavailable, err.to_string())
            }
            SynthesisError::Malformed { reason, raw } => {
                let mut detail = ErrorDetail::new(
                    ErrorKind::SynthesisMalformed,
                    format!("Malformed model output: {}", reason),
                );
                detail.raw_output = Some(raw);
                detail
            }
        }
    }
}

impl From<LlmError> for ErrorDetail {
    fn from(err: LlmError) -> Self {
        ErrorDetail::new(ErrorKind::SynthesisUnavailable, err.to_string())
    }
}

impl From<CompileError> for ErrorDetail {
    fn from(err: CompileError) -> Self {
        match err {
            CompileError::Unavailable(_) => {
                ErrorDetail::new(ErrorKind::CompilationTerminal, err.to_string())
            }
            CompileError::Template(_) | CompileError::Io(_) => {
                ErrorDetail::internal(err.to_string())
            }
        }
    }
}

impl From<SessionError> for ErrorDetail {
    fn from(err: SessionError) -> Self {
        ErrorDetail::internal(err.to_string())
    }
}

impl From<HistoryError> for ErrorDetail {
    fn from(err: HistoryError) -> Self {
        ErrorDetail::internal(err.to_string())
    }
}

impl From<std::io::Error> for ErrorDetail {
    fn from(err: std::io::Error) -> Self {
        ErrorDetail::internal(format!("IO error: {}", err))
    }
}
