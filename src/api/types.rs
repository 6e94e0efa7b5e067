//! Shared types for the HTTP API.

use serde::{Deserialize, Serialize};

use crate::history::HistoryRecord;
use crate::llm::Credentials;
use crate::metadata::ReportMetadata;
use crate::pipeline::{Scheduler, TaskStatus};
use crate::session::UploadedArtifact;

/// Shared context for all API routes.
#[derive(Clone)]
pub struct ApiContext {
    pub scheduler: Scheduler,
}

impl ApiContext {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub session_id: String,
    pub files: Vec<UploadedArtifact>,
}

/// `POST /api/generate` body: session, metadata and credentials side by side.
#[derive(Debug, Deserialize)]
pub struct GenerateBody {
    pub session_id: String,
    #[serde(flatten)]
    pub metadata: ReportMetadata,
    #[serde(flatten)]
    pub credentials: Credentials,
}

#[derive(Debug, Deserialize)]
pub struct ModifyBody {
    pub session_id: String,
    pub modification: String,
    #[serde(flatten)]
    pub credentials: Credentials,
}

#[derive(Debug, Deserialize)]
pub struct UpdateSourceBody {
    pub session_id: String,
    pub source: String,
}

#[derive(Debug, Serialize)]
pub struct TaskCreated {
    pub task_id: String,
    pub status: TaskStatus,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

#[derive(Debug, Serialize)]
pub struct HistoryList {
    pub records: Vec<HistoryRecord>,
}

#[derive(Debug, Serialize)]
pub struct HistoryDetail {
    #[serde(flatten)]
    pub record: HistoryRecord,
    pub document_url: String,
    pub source_url: String,
}

impl From<HistoryRecord> for HistoryDetail {
    fn from(record: HistoryRecord) -> Self {
        Self {
            document_url: format!("/api/files/{}/document", record.id),
            source_url: format!("/api/files/{}/source", record.id),
            record,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Deleted {
    pub id: String,
    pub deleted: bool,
}

#[derive(Debug, Serialize)]
pub struct CompilerHealth {
    pub installed: bool,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct EndpointHealth {
    pub reachable: bool,
    pub model: String,
    pub message: String,
}
