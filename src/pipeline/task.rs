//! Task records and the status state machine.
//!
//! A task moves strictly forward through the stages, except for the
//! corrective edge `compiling -> synthesizing`. Every transition updates
//! status, progress and message under one write lock, so readers always see
//! a consistent triple.

use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::error::ErrorDetail;
use crate::extract::ExtractedTable;
use crate::figure::FigureArtifact;

/// Status of a report task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Extracting,
    Synthesizing,
    Plotting,
    Assembling,
    Compiling,
    Completed,
    Failed,
}

impl TaskStatus {
    /// Progress reported when the stage starts.
    pub fn base_progress(&self) -> u8 {
        match self {
            TaskStatus::Queued => 0,
            TaskStatus::Extracting => 10,
            TaskStatus::Synthesizing => 25,
            TaskStatus::Plotting => 55,
            TaskStatus::Assembling => 75,
            TaskStatus::Compiling => 85,
            TaskStatus::Completed => 100,
            TaskStatus::Failed => 100,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Completed | Failed, _) => false,
            (_, Failed) => true,
            (Queued, Extracting) => true,
            // Modification rounds skip extraction.
            (Queued, Synthesizing) => true,
            (Extracting, Synthesizing) => true,
            (Synthesizing, Plotting) => true,
            (Plotting, Assembling) => true,
            (Assembling, Compiling) => true,
            (Compiling, Completed) => true,
            (Compiling, Synthesizing) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Extracting => "extracting",
            TaskStatus::Synthesizing => "synthesizing",
            TaskStatus::Plotting => "plotting",
            TaskStatus::Assembling => "assembling",
            TaskStatus::Compiling => "compiling",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What started the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Generate,
    Modify,
}

/// One entry of a task's transition history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionEvent {
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// References to a finished report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskResult {
    pub history_id: String,
    pub document_url: String,
    pub source_url: String,
    pub figure_count: usize,
    pub fallback_count: usize,
    pub placeholder_count: usize,
}

impl TaskResult {
    pub fn new(history_id: impl Into<String>) -> Self {
        let history_id = history_id.into();
        Self {
            document_url: format!("/api/files/{}/document", history_id),
            source_url: format!("/api/files/{}/source", history_id),
            history_id,
            figure_count: 0,
            fallback_count: 0,
            placeholder_count: 0,
        }
    }
}

/// Artifacts kept inspectable after a later stage fails.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PartialArtifacts {
    pub tables: Vec<ExtractedTable>,
    pub figures: Vec<FigureArtifact>,
}

/// State of one task as seen by pollers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub session_id: String,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: u8,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    pub corrective_retries: u32,
    pub history: Vec<TransitionEvent>,
    pub partial: PartialArtifacts,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set while a compiled result is being persisted; cancellation is
    /// refused from then on.
    #[serde(skip)]
    pub finalizing: bool,
}

impl TaskRecord {
    fn new(session_id: &str, kind: TaskKind) -> Self {
        let now = Utc::now();
        let message = "Waiting to start".to_string();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.to_string(),
            kind,
            status: TaskStatus::Queued,
            progress: 0,
            message: message.clone(),
            result: None,
            error: None,
            corrective_retries: 0,
            history: vec![TransitionEvent {
                status: TaskStatus::Queued,
                progress: 0,
                message,
                at: now,
            }],
            partial: PartialArtifacts::default(),
            created_at: now,
            updated_at: now,
            finalizing: false,
        }
    }

    fn record(&mut self, status: TaskStatus, progress: u8, message: String) {
        let now = Utc::now();
        self.status = status;
        self.progress = progress;
        self.message = message.clone();
        self.updated_at = now;
        self.history.push(TransitionEvent {
            status,
            progress,
            message,
            at: now,
        });
    }
}

/// Errors that can occur when updating a task record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Task '{0}' not found")]
    UnknownTask(String),

    #[error("Task is already {0}")]
    Terminal(TaskStatus),

    #[error("Invalid transition {from} -> {to}")]
    Invalid { from: TaskStatus, to: TaskStatus },

    #[error("Corrective retry limit of {0} reached")]
    RetryLimit(u32),

    #[error("Task is still {0}")]
    Running(TaskStatus),

    #[error("Task is saving its result and can no longer be cancelled")]
    Finalizing,
}

/// All task records of the process.
///
/// Poll reads take the read lock; updates from workers take the write lock
/// for the duration of a single transition.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, TaskRecord>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, TaskRecord>> {
        self.tasks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, TaskRecord>> {
        self.tasks.write().unwrap_or_else(|e| e.into_inner())
    }

    fn update<T>(
        &self,
        id: &str,
        f: impl FnOnce(&mut TaskRecord) -> Result<T, TransitionError>,
    ) -> Result<T, TransitionError> {
        let mut tasks = self.write();
        let record = tasks
            .get_mut(id)
            .ok_or_else(|| TransitionError::UnknownTask(id.to_string()))?;
        f(record)
    }

    /// Registers a queued task and returns its id.
    pub fn create(&self, session_id: &str, kind: TaskKind) -> String {
        let record = TaskRecord::new(session_id, kind);
        let id = record.id.clone();
        self.write().insert(id.clone(), record);
        id
    }

    pub fn get(&self, id: &str) -> Option<TaskRecord> {
        self.read().get(id).cloned()
    }

    pub fn status(&self, id: &str) -> Option<TaskStatus> {
        self.read().get(id).map(|r| r.status)
    }

    /// Moves a task to the next stage.
    ///
    /// The corrective edge is refused once `retry_limit` retries were taken.
    pub fn transition(
        &self,
        id: &str,
        next: TaskStatus,
        message: impl Into<String>,
        retry_limit: u32,
    ) -> Result<(), TransitionError> {
        self.update(id, |record| {
            let from = record.status;
            if from.is_terminal() {
                return Err(TransitionError::Terminal(from));
            }
            if !from.can_transition_to(next) || next.is_terminal() {
                return Err(TransitionError::Invalid { from, to: next });
            }
            if from == TaskStatus::Compiling && next == TaskStatus::Synthesizing {
                if record.corrective_retries >= retry_limit {
                    return Err(TransitionError::RetryLimit(retry_limit));
                }
                record.corrective_retries += 1;
            }
            record.record(next, next.base_progress(), message.into());
            Ok(())
        })
    }

    /// Advances progress within the current stage. Never moves backwards or
    /// past the next stage's starting point.
    pub fn advance(&self, id: &str, progress: u8, message: impl Into<String>) -> Result<(), TransitionError> {
        self.update(id, |record| {
            if record.status.is_terminal() {
                return Err(TransitionError::Terminal(record.status));
            }
            let ceiling = match record.status {
                TaskStatus::Queued => TaskStatus::Extracting.base_progress(),
                TaskStatus::Extracting => TaskStatus::Synthesizing.base_progress(),
                TaskStatus::Synthesizing => TaskStatus::Plotting.base_progress(),
                TaskStatus::Plotting => TaskStatus::Assembling.base_progress(),
                TaskStatus::Assembling => TaskStatus::Compiling.base_progress(),
                _ => 99,
            }
            .saturating_sub(1);
            let progress = progress.clamp(record.progress, ceiling.max(record.progress));
            let message = message.into();
            record.progress = progress;
            record.message = message;
            record.updated_at = Utc::now();
            Ok(())
        })
    }

    /// Enters `completed` from `compiling`.
    pub fn complete(&self, id: &str, result: TaskResult) -> Result<(), TransitionError> {
        self.update(id, |record| {
            let from = record.status;
            if from.is_terminal() {
                return Err(TransitionError::Terminal(from));
            }
            if !from.can_transition_to(TaskStatus::Completed) {
                return Err(TransitionError::Invalid {
                    from,
                    to: TaskStatus::Completed,
                });
            }
            let message = if record.corrective_retries == 0 {
                "Report ready".to_string()
            } else {
                format!(
                    "Report ready after {} corrective retr{}",
                    record.corrective_retries,
                    if record.corrective_retries == 1 { "y" } else { "ies" }
                )
            };
            record.result = Some(result);
            record.record(TaskStatus::Completed, 100, message);
            Ok(())
        })
    }

    /// Marks a compiling task as persisting its result.
    ///
    /// Fails with `Terminal` when the task was cancelled first; after this
    /// succeeds, [`TaskRegistry::cancel`] is refused.
    pub fn begin_finalize(&self, id: &str) -> Result<(), TransitionError> {
        self.update(id, |record| {
            if record.status.is_terminal() {
                return Err(TransitionError::Terminal(record.status));
            }
            if record.status != TaskStatus::Compiling {
                return Err(TransitionError::Invalid {
                    from: record.status,
                    to: TaskStatus::Completed,
                });
            }
            record.finalizing = true;
            Ok(())
        })
    }

    /// Enters `failed`. Progress stays where the failing stage left it.
    pub fn fail(&self, id: &str, error: ErrorDetail) -> Result<(), TransitionError> {
        self.update(id, |record| {
            if record.status.is_terminal() {
                return Err(TransitionError::Terminal(record.status));
            }
            let message = error.message.clone();
            let progress = record.progress;
            record.error = Some(error);
            record.finalizing = false;
            record.record(TaskStatus::Failed, progress, message);
            Ok(())
        })
    }

    /// Fails a task on user request. Refused once the result is being saved.
    pub fn cancel(&self, id: &str) -> Result<(), TransitionError> {
        self.update(id, |record| {
            if record.status.is_terminal() {
                return Err(TransitionError::Terminal(record.status));
            }
            if record.finalizing {
                return Err(TransitionError::Finalizing);
            }
            let error = ErrorDetail::cancelled();
            let message = error.message.clone();
            let progress = record.progress;
            record.error = Some(error);
            record.record(TaskStatus::Failed, progress, message);
            Ok(())
        })
    }

    pub fn record_tables(&self, id: &str, tables: &[ExtractedTable]) {
        let _ = self.update(id, |record| {
            record.partial.tables = tables.to_vec();
            Ok(())
        });
    }

    pub fn record_figures(&self, id: &str, figures: Vec<FigureArtifact>) {
        let _ = self.update(id, |record| {
            record.partial.figures = figures;
            Ok(())
        });
    }

    /// Removes a terminal task. Running tasks cannot be removed.
    pub fn remove(&self, id: &str) -> Result<TaskRecord, TransitionError> {
        let mut tasks = self.write();
        match tasks.get(id).map(|r| r.status) {
            None => Err(TransitionError::UnknownTask(id.to_string())),
            Some(status) if !status.is_terminal() => Err(TransitionError::Running(status)),
            Some(_) => tasks
                .remove(id)
                .ok_or_else(|| TransitionError::UnknownTask(id.to_string())),
        }
    }

    /// Whether the session has a task that has not reached a terminal state.
    pub fn has_active(&self, session_id: &str) -> bool {
        self.read()
            .values()
            .any(|r| r.session_id == session_id && !r.status.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    fn drive(registry: &TaskRegistry, id: &str, stages: &[TaskStatus]) {
        for stage in stages {
            registry.transition(id, *stage, stage.as_str(), 2).unwrap();
        }
    }

    #[test]
    fn test_status_edges() {
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::Extracting));
        assert!(TaskStatus::Compiling.can_transition_to(TaskStatus::Synthesizing));
        assert!(TaskStatus::Plotting.can_transition_to(TaskStatus::Failed));
        assert!(!TaskStatus::Plotting.can_transition_to(TaskStatus::Synthesizing));
        assert!(!TaskStatus::Extracting.can_transition_to(TaskStatus::Compiling));
        assert!(!TaskStatus::Completed.can_transition_to(TaskStatus::Failed));
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&TaskStatus::Synthesizing).unwrap(),
            "\"synthesizing\""
        );
        assert_eq!(TaskStatus::Compiling.to_string(), "compiling");
    }

    #[test]
    fn test_full_run_records_history() {
        let registry = TaskRegistry::new();
        let id = registry.create("s1", TaskKind::Generate);
        drive(
            &registry,
            &id,
            &[
                TaskStatus::Extracting,
                TaskStatus::Synthesizing,
                TaskStatus::Plotting,
                TaskStatus::Assembling,
                TaskStatus::Compiling,
            ],
        );
        registry.complete(&id, TaskResult::new("h1")).unwrap();

        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(record.progress, 100);
        assert_eq!(record.history.len(), 7);
        assert_eq!(
            record.result.unwrap().document_url,
            "/api/files/h1/document"
        );
        let progress: Vec<u8> = record.history.iter().map(|e| e.progress).collect();
        assert!(progress.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let registry = TaskRegistry::new();
        let id = registry.create("s1", TaskKind::Generate);
        let err = registry
            .transition(&id, TaskStatus::Compiling, "skip", 2)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::Invalid {
                from: TaskStatus::Queued,
                to: TaskStatus::Compiling
            }
        );
        assert_eq!(registry.status(&id), Some(TaskStatus::Queued));
    }

    #[test]
    fn test_corrective_edge_is_bounded() {
        let registry = TaskRegistry::new();
        let id = registry.create("s1", TaskKind::Generate);
        drive(
            &registry,
            &id,
            &[
                TaskStatus::Extracting,
                TaskStatus::Synthesizing,
                TaskStatus::Plotting,
                TaskStatus::Assembling,
                TaskStatus::Compiling,
            ],
        );

        registry.transition(&id, TaskStatus::Synthesizing, "retry", 1).unwrap();
        assert_eq!(registry.get(&id).unwrap().corrective_retries, 1);
        drive(
            &registry,
            &id,
            &[TaskStatus::Plotting, TaskStatus::Assembling, TaskStatus::Compiling],
        );
        assert_eq!(
            registry.transition(&id, TaskStatus::Synthesizing, "retry", 1),
            Err(TransitionError::RetryLimit(1))
        );
    }

    #[test]
    fn test_terminal_records_are_immutable() {
        let registry = TaskRegistry::new();
        let id = registry.create("s1", TaskKind::Generate);
        registry.transition(&id, TaskStatus::Extracting, "x", 2).unwrap();
        registry.fail(&id, ErrorDetail::cancelled()).unwrap();

        let record = registry.get(&id).unwrap();
        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(record.progress, 10);
        assert_eq!(record.error.as_ref().unwrap().kind, ErrorKind::Cancelled);

        assert_eq!(
            registry.fail(&id, ErrorDetail::internal("late")),
            Err(TransitionError::Terminal(TaskStatus::Failed))
        );
        assert!(registry.advance(&id, 50, "late").is_err());
        assert_eq!(registry.get(&id).unwrap().error.unwrap().kind, ErrorKind::Cancelled);
    }

    #[test]
    fn test_advance_stays_inside_stage() {
        let registry = TaskRegistry::new();
        let id = registry.create("s1", TaskKind::Generate);
        drive(
            &registry,
            &id,
            &[TaskStatus::Extracting, TaskStatus::Synthesizing, TaskStatus::Plotting],
        );

        registry.advance(&id, 65, "1/2 figures").unwrap();
        assert_eq!(registry.get(&id).unwrap().progress, 65);
        registry.advance(&id, 60, "stale").unwrap();
        assert_eq!(registry.get(&id).unwrap().progress, 65);
        registry.advance(&id, 99, "overshoot").unwrap();
        assert_eq!(registry.get(&id).unwrap().progress, 74);
    }

    #[test]
    fn test_modification_skips_extraction() {
        let registry = TaskRegistry::new();
        let id = registry.create("s1", TaskKind::Modify);
        registry
            .transition(&id, TaskStatus::Synthesizing, "Applying changes", 2)
            .unwrap();
        assert_eq!(registry.get(&id).unwrap().kind, TaskKind::Modify);
    }

    #[test]
    fn test_remove_only_terminal() {
        let registry = TaskRegistry::new();
        let id = registry.create("s1", TaskKind::Generate);
        assert_eq!(
            registry.remove(&id),
            Err(TransitionError::Running(TaskStatus::Queued))
        );
        assert!(registry.has_active("s1"));
        registry.fail(&id, ErrorDetail::internal("boom")).unwrap();
        assert!(!registry.has_active("s1"));
        assert!(registry.remove(&id).is_ok());
        assert!(registry.is_empty());
        assert_eq!(
            registry.remove(&id),
            Err(TransitionError::UnknownTask(id.clone()))
        );
    }

    #[test]
    fn test_cancel_refused_while_finalizing() {
        let registry = TaskRegistry::new();
        let id = registry.create("s1", TaskKind::Generate);
        assert!(registry.begin_finalize(&id).is_err());
        drive(
            &registry,
            &id,
            &[
                TaskStatus::Extracting,
                TaskStatus::Synthesizing,
                TaskStatus::Plotting,
                TaskStatus::Assembling,
                TaskStatus::Compiling,
            ],
        );
        registry.begin_finalize(&id).unwrap();
        assert_eq!(registry.cancel(&id), Err(TransitionError::Finalizing));
        assert_eq!(registry.status(&id), Some(TaskStatus::Compiling));

        registry.complete(&id, TaskResult::new("h1")).unwrap();
        assert_eq!(registry.status(&id), Some(TaskStatus::Completed));
    }

    #[test]
    fn test_cancel_before_finalizing_wins() {
        let registry = TaskRegistry::new();
        let id = registry.create("s1", TaskKind::Generate);
        drive(
            &registry,
            &id,
            &[
                TaskStatus::Extracting,
                TaskStatus::Synthesizing,
                TaskStatus::Plotting,
                TaskStatus::Assembling,
                TaskStatus::Compiling,
            ],
        );
        registry.cancel(&id).unwrap();
        assert_eq!(
            registry.begin_finalize(&id),
            Err(TransitionError::Terminal(TaskStatus::Failed))
        );
        assert_eq!(
            registry.get(&id).unwrap().error.unwrap().kind,
            ErrorKind::Cancelled
        );
        assert_eq!(
            registry.cancel(&id),
            Err(TransitionError::Terminal(TaskStatus::Failed))
        );
    }
}
