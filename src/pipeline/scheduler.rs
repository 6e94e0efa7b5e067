//! Background execution of report tasks.
//!
//! `Scheduler::submit` validates a request, registers a queued task and
//! spawns one worker per task. The worker drives extraction, synthesis,
//! plotting, assembly and compilation, taking the corrective edge back to
//! synthesis when the compiler reports a content error. Pollers read the
//! [`TaskRegistry`]; cancellation fails the task and drops the worker's
//! future, which kills any subprocess it was waiting on.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, Utc};
use thiserror::Error;
use tokio::sync::{watch, Mutex as AsyncMutex, Notify};
use tokio::task::JoinHandle;

use super::config::PipelineConfig;
use super::task::{TaskKind, TaskRecord, TaskRegistry, TaskResult, TaskStatus, TransitionError};
use crate::assemble::assemble;
use crate::compile::{
    render_document, AppendixImage, CompiledResult, CompilerLog, DocumentCompiler,
    LatexCompiler, LatexSource,
};
use crate::error::{CompileError, ErrorDetail, ErrorKind, HistoryError, LlmError, SessionError};
use crate::extract::{CommandTextSource, Extraction, Extractor};
use crate::figure::{
    execute_all, FigureArtifact, FigureOutcome, FigureRunner, SubprocessFigureRunner,
};
use crate::history::{HistoryRecord, HistoryStore};
use crate::llm::{Credentials, HttpProviderFactory, LlmProvider, ProviderFactory};
use crate::metadata::ReportMetadata;
use crate::session::{ArtifactRole, ResultBundle, Session, SessionStore};
use crate::synth::{
    figure_requests, Feedback, FigureRequest, PromptInput, SynthesisPolicy, Synthesizer,
};

/// Directory inside a task workspace holding figure working directories.
const FIGURE_DIR: &str = "Fig";

/// Image extensions the compiler can include in the appendix.
const APPENDIX_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "pdf"];

/// Errors raised before a task is queued.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Invalid credentials: {0}")]
    Credentials(#[from] LlmError),

    #[error("Session '{0}' has no finished report to modify")]
    NothingToModify(String),

    #[error("Modification instruction is empty")]
    EmptyInstruction,
}

/// Errors raised by a manual edit of a report source.
#[derive(Debug, Error)]
pub enum EditError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Session '{0}' has no finished report to edit")]
    NothingToEdit(String),

    #[error("Session '{0}' has a task in progress")]
    Busy(String),

    #[error("Edited source is empty")]
    EmptySource,

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    History(#[from] HistoryError),
}

/// Result of recompiling an edited source.
#[derive(Debug, Clone)]
pub enum EditOutcome {
    /// The edit compiled; the session and history now point at it.
    Compiled(TaskResult),
    /// The edit did not compile; the previous document and source are back.
    Rejected(CompilerLog),
}

/// Collaborators the workers use.
pub struct PipelineDeps {
    pub extractor: Extractor,
    pub providers: Arc<dyn ProviderFactory>,
    pub figures: Arc<dyn FigureRunner>,
    pub compiler: Arc<dyn DocumentCompiler>,
    pub sessions: Arc<SessionStore>,
    pub history: Arc<HistoryStore>,
}

impl PipelineDeps {
    /// Production collaborators: external extraction commands, HTTP
    /// endpoints, subprocess plotting and the configured TeX engine.
    pub async fn from_config(config: &PipelineConfig) -> Result<Self, HistoryError> {
        let source = CommandTextSource::new(
            &config.pdf_text_command,
            &config.ocr_command,
            config.extract_timeout,
        );
        if config.sandbox_wrapper.is_empty() {
            if config.allow_unisolated_plotting {
                tracing::warn!("Plotting scripts run without process isolation");
            } else {
                tracing::warn!("No sandbox wrapper configured; every figure will fall back to a notice");
            }
        }
        let figures = SubprocessFigureRunner::new(
            &config.python_path,
            config.plot_timeout,
            config.allowed_imports.clone(),
        )
        .with_wrapper(config.sandbox_wrapper.clone())
        .with_limits(config.sandbox_limits())
        .allow_unisolated(config.allow_unisolated_plotting);
        let compiler = LatexCompiler::new(
            &config.compiler_path,
            config.compiler_passes,
            config.compile_timeout,
        )
        .with_fonts_dir(config.fonts_dir.clone());

        Ok(Self {
            extractor: Extractor::new(Arc::new(source), config.guide_text_limit),
            providers: Arc::new(HttpProviderFactory::new(config.synthesis_timeout)),
            figures: Arc::new(figures),
            compiler: Arc::new(compiler),
            sessions: Arc::new(SessionStore::new(config.sessions_dir(), config.max_upload_bytes)),
            history: Arc::new(HistoryStore::open(config.history_path(), config.history_capacity).await?),
        })
    }
}

/// A request to generate a report from a session's uploads.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub session_id: String,
    pub metadata: ReportMetadata,
    pub credentials: Credentials,
}

/// A request to revise the latest report of a session.
#[derive(Debug, Clone)]
pub struct ModifyRequest {
    pub session_id: String,
    pub instruction: String,
    pub credentials: Credentials,
}

enum JobKind {
    Generate { metadata: ReportMetadata },
    Modify { instruction: String, bundle: Box<ResultBundle> },
}

struct Job {
    task_id: String,
    session_id: String,
    provider: Arc<dyn LlmProvider>,
    model: String,
    kind: JobKind,
}

/// Runs report tasks in the background and answers polls.
#[derive(Clone)]
pub struct Scheduler {
    config: Arc<PipelineConfig>,
    deps: Arc<PipelineDeps>,
    tasks: Arc<TaskRegistry>,
    running: Arc<Mutex<HashMap<String, watch::Sender<bool>>>>,
    finished: Arc<Notify>,
    edits: Arc<AsyncMutex<()>>,
}

impl Scheduler {
    pub fn new(config: PipelineConfig, deps: PipelineDeps) -> Self {
        Self {
            config: Arc::new(config),
            deps: Arc::new(deps),
            tasks: Arc::new(TaskRegistry::new()),
            running: Arc::new(Mutex::new(HashMap::new())),
            finished: Arc::new(Notify::new()),
            edits: Arc::new(AsyncMutex::new(())),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.deps.sessions
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.deps.history
    }

    pub fn compiler(&self) -> &Arc<dyn DocumentCompiler> {
        &self.deps.compiler
    }

    pub fn providers(&self) -> &Arc<dyn ProviderFactory> {
        &self.deps.providers
    }

    pub fn tasks(&self) -> &TaskRegistry {
        &self.tasks
    }

    /// Queues a generation task. Returns its id without waiting for any stage.
    pub async fn submit(&self, request: GenerateRequest) -> Result<String, SubmitError> {
        request.credentials.validate()?;
        let provider = self.deps.providers.create(&request.credentials)?;
        self.deps.sessions.snapshot(&request.session_id).await?;

        let task_id = self.tasks.create(&request.session_id, TaskKind::Generate);
        tracing::info!(task_id = %task_id, session_id = %request.session_id, "Queued generation task");
        self.spawn(Job {
            task_id: task_id.clone(),
            session_id: request.session_id,
            provider,
            model: request.credentials.model,
            kind: JobKind::Generate {
                metadata: request.metadata,
            },
        });
        Ok(task_id)
    }

    /// Queues a modification of the session's latest report.
    pub async fn modify(&self, request: ModifyRequest) -> Result<String, SubmitError> {
        let instruction = request.instruction.trim().to_string();
        if instruction.is_empty() {
            return Err(SubmitError::EmptyInstruction);
        }
        request.credentials.validate()?;
        let provider = self.deps.providers.create(&request.credentials)?;
        let session = self.deps.sessions.snapshot(&request.session_id).await?;
        let bundle = session
            .latest
            .ok_or_else(|| SubmitError::NothingToModify(request.session_id.clone()))?;

        let task_id = self.tasks.create(&request.session_id, TaskKind::Modify);
        tracing::info!(task_id = %task_id, session_id = %request.session_id, "Queued modification task");
        self.spawn(Job {
            task_id: task_id.clone(),
            session_id: request.session_id,
            provider,
            model: request.credentials.model,
            kind: JobKind::Modify {
                instruction,
                bundle: Box::new(bundle),
            },
        });
        Ok(task_id)
    }

    pub fn poll(&self, task_id: &str) -> Option<TaskRecord> {
        self.tasks.get(task_id)
    }

    /// Fails a running task with `Cancelled` and stops its worker.
    ///
    /// Refused once the worker has started saving a compiled result.
    pub fn cancel(&self, task_id: &str) -> Result<(), TransitionError> {
        self.tasks.cancel(task_id)?;
        let sender = self.lock_running().remove(task_id);
        if let Some(sender) = sender {
            let _ = sender.send(true);
        }
        self.finished.notify_waiters();
        tracing::info!(task_id = %task_id, "Cancelled task");
        Ok(())
    }

    /// Forgets a finished task.
    ///
    /// A failed task's workspace goes with it unless a history record still
    /// points there.
    pub async fn delete_task(&self, task_id: &str) -> Result<TaskRecord, TransitionError> {
        let record = self.tasks.remove(task_id)?;
        if record.status == TaskStatus::Failed {
            let workspace = self.config.outputs_dir().join(task_id);
            let referenced = match self.deps.history.get(&record.session_id).await {
                Ok(entry) => entry.work_dir == workspace,
                Err(_) => false,
            };
            if !referenced && workspace.exists() {
                if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
                    tracing::warn!(task_id = %task_id, error = %e, "Could not remove task workspace");
                }
            }
        }
        tracing::info!(task_id = %task_id, status = %record.status, "Deleted task");
        Ok(record)
    }

    /// Recompiles a hand-edited source for the session's latest report.
    ///
    /// On success the session and its history record point at the new
    /// document. On a compile failure the previous document and source are
    /// restored and the log is returned.
    pub async fn update_source(&self, session_id: &str, text: String) -> Result<EditOutcome, EditError> {
        if text.trim().is_empty() {
            return Err(EditError::EmptySource);
        }
        let _edit = self.edits.lock().await;
        if self.tasks.has_active(session_id) {
            return Err(EditError::Busy(session_id.to_string()));
        }
        let session = self.deps.sessions.snapshot(session_id).await?;
        let mut bundle = session
            .latest
            .ok_or_else(|| EditError::NothingToEdit(session_id.to_string()))?;

        let backup = OutputBackup::take(&[bundle.document_path.as_path(), bundle.source_path.as_path()])
            .await
            .map_err(CompileError::Io)?;
        let outcome = match self
            .deps
            .compiler
            .compile(&LatexSource::raw(text), &bundle.workspace)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                backup.restore().await;
                return Err(e.into());
            }
        };

        let compiled = match outcome {
            CompiledResult::Success(compiled) => compiled,
            CompiledResult::Failure(log) => {
                tracing::warn!(session_id = %session_id, error = %log.summary(), "Edited source failed to compile");
                backup.restore().await;
                return Ok(EditOutcome::Rejected(log));
            }
        };
        backup.discard().await;

        bundle.document_path = compiled.pdf_path;
        bundle.source_path = compiled.source_path;
        let record = match self.deps.history.get(&bundle.history_id).await {
            Ok(mut record) => {
                record.document_path = bundle.document_path.clone();
                record.source_path = bundle.source_path.clone();
                record
            }
            Err(HistoryError::NotFound(_)) => history_record(session_id, &bundle, 0, 0, 0),
            Err(e) => return Err(e.into()),
        };
        let record = self.deps.history.upsert(record).await?;
        self.deps.sessions.set_latest(session_id, bundle.clone()).await?;

        let mut result = TaskResult::new(bundle.history_id.clone());
        result.figure_count = record.figure_count;
        result.fallback_count = record.fallback_count;
        tracing::info!(session_id = %session_id, history_id = %bundle.history_id, "Recompiled edited source");
        Ok(EditOutcome::Compiled(result))
    }

    /// Waits until the task reaches a terminal state.
    pub async fn wait(&self, task_id: &str) -> Option<TaskRecord> {
        loop {
            let notified = self.finished.notified();
            let record = self.tasks.get(task_id)?;
            if record.status.is_terminal() {
                return Some(record);
            }
            notified.await;
        }
    }

    /// Periodically removes idle sessions.
    pub fn spawn_session_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let sessions = self.deps.sessions.clone();
        let retention = self.config.session_retention;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let removed = sessions.sweep_expired(retention).await;
                if removed > 0 {
                    tracing::info!(removed, "Swept expired sessions");
                }
            }
        })
    }

    fn lock_running(&self) -> std::sync::MutexGuard<'_, HashMap<String, watch::Sender<bool>>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn spawn(&self, job: Job) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.lock_running().insert(job.task_id.clone(), cancel_tx);

        let scheduler = self.clone();
        tokio::spawn(async move {
            let task_id = job.task_id.clone();
            let outcome = tokio::select! {
                outcome = scheduler.drive(&job) => outcome,
                _ = cancelled(cancel_rx) => Err(ErrorDetail::cancelled()),
            };

            if let Err(detail) = outcome {
                match detail.kind {
                    ErrorKind::Internal => {
                        tracing::error!(task_id = %task_id, error = %detail, "Task failed")
                    }
                    _ => tracing::warn!(task_id = %task_id, error = %detail, "Task failed"),
                }
                // Already terminal when cancelled concurrently.
                let _ = scheduler.tasks.fail(&task_id, detail);
            }

            scheduler.lock_running().remove(&task_id);
            scheduler.finished.notify_waiters();
        });
    }

    fn stage(&self, task_id: &str, status: TaskStatus, message: impl Into<String>) -> Result<(), ErrorDetail> {
        let message = message.into();
        match self
            .tasks
            .transition(task_id, status, message.clone(), self.config.max_corrective_retries)
        {
            Ok(()) => {
                tracing::info!(task_id = %task_id, stage = %status, "{}", message);
                Ok(())
            }
            Err(TransitionError::Terminal(_)) => Err(ErrorDetail::cancelled()),
            Err(e) => Err(ErrorDetail::internal(e.to_string())),
        }
    }

    async fn drive(&self, job: &Job) -> Result<(), ErrorDetail> {
        let task_id = job.task_id.as_str();
        let workspace = self.config.outputs_dir().join(task_id);
        tokio::fs::create_dir_all(&workspace).await?;

        let (metadata, extraction, mut previous, mut feedback) = match &job.kind {
            JobKind::Generate { metadata } => {
                self.stage(task_id, TaskStatus::Extracting, "Extracting text and tables")?;
                let session = self.deps.sessions.snapshot(&job.session_id).await?;
                let extraction = self
                    .deps
                    .extractor
                    .extract(
                        &session.paths(ArtifactRole::Guide),
                        &session.paths(ArtifactRole::DataSheet),
                    )
                    .await?;
                self.tasks.record_tables(task_id, &extraction.tables);
                (metadata.clone(), extraction, None, None)
            }
            JobKind::Modify { instruction, bundle } => {
                self.tasks.record_tables(task_id, &bundle.tables);
                let extraction = Extraction {
                    guide_text: bundle.guide_text.clone(),
                    guide_parts: bundle.guide_parts.clone(),
                    tables: bundle.tables.clone(),
                };
                let feedback = Feedback::Modification {
                    text: instruction.clone(),
                };
                (
                    bundle.metadata.clone(),
                    extraction,
                    Some(bundle.sections.clone()),
                    Some(feedback),
                )
            }
        };

        let session = self.deps.sessions.snapshot(&job.session_id).await?;
        let appendix = appendix_images(&session);
        let synthesizer = Synthesizer::new(
            job.provider.clone(),
            job.model.clone(),
            SynthesisPolicy::from_config(&self.config),
        );
        let fig_root = workspace.join(FIGURE_DIR);
        let mut retries = 0u32;

        loop {
            let message = match (&feedback, retries) {
                (Some(Feedback::CompilerLog(_)), n) => {
                    format!("Correcting report after compile error (retry {})", n)
                }
                (Some(Feedback::Modification { .. }), _) => "Applying requested changes".to_string(),
                (None, _) => "Generating report content".to_string(),
            };
            self.stage(task_id, TaskStatus::Synthesizing, message)?;

            let input = PromptInput {
                metadata: &metadata,
                guide_text: &extraction.guide_text,
                guide_parts: &extraction.guide_parts,
                tables: &extraction.tables,
                previous: previous.as_deref(),
                feedback: feedback.as_ref(),
            };
            let sections = synthesizer.synthesize(&input).await?;

            let requests: Vec<FigureRequest> = figure_requests(&sections)
                .into_iter()
                .map(|(_, request)| request.clone())
                .collect();
            self.stage(
                task_id,
                TaskStatus::Plotting,
                format!("Rendering {} figure(s)", requests.len()),
            )?;
            let artifacts = self.plot(task_id, &requests, &extraction, &fig_root).await;

            self.stage(task_id, TaskStatus::Assembling, "Assembling document")?;
            let document = assemble(&sections, &artifacts);
            document
                .check_adjacency(&sections, &artifacts)
                .map_err(ErrorDetail::internal)?;
            let source = render_document(
                &document,
                &extraction.tables,
                &metadata,
                &appendix,
                &workspace,
                Local::now().date_naive(),
            )?;

            self.stage(task_id, TaskStatus::Compiling, "Compiling document")?;
            match self.deps.compiler.compile(&source, &workspace).await? {
                CompiledResult::Success(compiled) => {
                    let mut result = TaskResult::new(job.session_id.clone());
                    result.figure_count = document.figure_count();
                    result.fallback_count = document.fallback_count();
                    result.placeholder_count = document.placeholder_count();

                    let bundle = ResultBundle {
                        task_id: task_id.to_string(),
                        history_id: result.history_id.clone(),
                        metadata: metadata.clone(),
                        guide_text: extraction.guide_text.clone(),
                        guide_parts: extraction.guide_parts.clone(),
                        tables: extraction.tables.clone(),
                        sections,
                        source_path: compiled.source_path,
                        document_path: compiled.pdf_path,
                        workspace: workspace.clone(),
                    };
                    self.persist(job, &bundle, &result, retries).await?;
                    return match self.tasks.complete(task_id, result) {
                        Ok(()) => {
                            tracing::info!(task_id = %task_id, corrective_retries = retries, "Task completed");
                            Ok(())
                        }
                        Err(TransitionError::Terminal(_)) => Err(ErrorDetail::cancelled()),
                        Err(e) => Err(ErrorDetail::internal(e.to_string())),
                    };
                }
                CompiledResult::Failure(log) => {
                    if log.is_content_fixable() && retries < self.config.max_corrective_retries {
                        retries += 1;
                        tracing::warn!(
                            task_id = %task_id,
                            attempt = retries,
                            error = %log.summary(),
                            "Content error in compiled document, regenerating"
                        );
                        previous = Some(sections);
                        feedback = Some(Feedback::CompilerLog(log));
                        continue;
                    }

                    let mut detail = ErrorDetail::from_compiler_log(log);
                    if detail.kind == ErrorKind::CompilationContentFixable {
                        detail.kind = ErrorKind::CompilationTerminal;
                        detail.message = format!(
                            "{} (still failing after {} corrective retr{})",
                            detail.message,
                            retries,
                            if retries == 1 { "y" } else { "ies" }
                        );
                    }
                    return Err(detail);
                }
            }
        }
    }

    async fn plot(
        &self,
        task_id: &str,
        requests: &[FigureRequest],
        extraction: &Extraction,
        fig_root: &Path,
    ) -> BTreeMap<String, FigureArtifact> {
        let start = TaskStatus::Plotting.base_progress() as usize;
        let span = (TaskStatus::Assembling.base_progress() - TaskStatus::Plotting.base_progress()) as usize;
        let tasks = &self.tasks;

        let artifacts = execute_all(
            self.deps.figures.as_ref(),
            requests,
            &extraction.tables,
            fig_root,
            self.config.figure_concurrency,
            |done, total| {
                let progress = start + span * done / total.max(1);
                let _ = tasks.advance(
                    task_id,
                    progress.min(u8::MAX as usize) as u8,
                    format!("Rendered {}/{} figure(s)", done, total),
                );
            },
        )
        .await;

        for artifact in artifacts.values() {
            if let FigureOutcome::Failed { reason } = &artifact.outcome {
                tracing::warn!(
                    task_id = %task_id,
                    figure_id = %artifact.request_id,
                    reason = %reason,
                    "Figure failed, using fallback notice"
                );
            }
        }
        self.tasks
            .record_figures(task_id, artifacts.values().cloned().collect());
        artifacts
    }

    async fn persist(
        &self,
        job: &Job,
        bundle: &ResultBundle,
        result: &TaskResult,
        retries: u32,
    ) -> Result<(), ErrorDetail> {
        match self.tasks.begin_finalize(&job.task_id) {
            Ok(()) => {}
            Err(TransitionError::Terminal(_)) => return Err(ErrorDetail::cancelled()),
            Err(e) => return Err(ErrorDetail::internal(e.to_string())),
        }

        let record = history_record(
            &job.session_id,
            bundle,
            retries,
            result.figure_count,
            result.fallback_count,
        );
        self.deps.history.upsert(record).await?;

        if let Err(e) = self
            .deps
            .sessions
            .set_latest(&job.session_id, bundle.clone())
            .await
        {
            tracing::warn!(session_id = %job.session_id, error = %e, "Could not attach result to session");
        }
        Ok(())
    }
}

fn history_record(
    session_id: &str,
    bundle: &ResultBundle,
    retries: u32,
    figure_count: usize,
    fallback_count: usize,
) -> HistoryRecord {
    HistoryRecord {
        id: bundle.history_id.clone(),
        session_id: session_id.to_string(),
        task_id: bundle.task_id.clone(),
        experiment_name: bundle.metadata.experiment_name.clone(),
        student_name: bundle.metadata.name.clone(),
        created_at: Utc::now(),
        updated_at: None,
        document_path: bundle.document_path.clone(),
        source_path: bundle.source_path.clone(),
        work_dir: bundle.workspace.clone(),
        metadata: bundle.metadata.clone(),
        corrective_retries: retries,
        figure_count,
        fallback_count,
    }
}

/// Copies of output files taken before a recompilation overwrites them.
struct OutputBackup {
    saved: Vec<(PathBuf, PathBuf)>,
}

impl OutputBackup {
    async fn take(paths: &[&Path]) -> std::io::Result<Self> {
        let mut saved = Vec::new();
        for path in paths {
            if !path.exists() {
                continue;
            }
            let mut name = path.as_os_str().to_os_string();
            name.push(".bak");
            let copy = PathBuf::from(name);
            tokio::fs::copy(path, &copy).await?;
            saved.push((path.to_path_buf(), copy));
        }
        Ok(Self { saved })
    }

    async fn restore(self) {
        for (original, copy) in self.saved {
            if let Err(e) = tokio::fs::rename(&copy, &original).await {
                tracing::warn!(path = %original.display(), error = %e, "Could not restore output file");
            }
        }
    }

    async fn discard(self) {
        for (_, copy) in self.saved {
            let _ = tokio::fs::remove_file(&copy).await;
        }
    }
}

/// Resolves once cancellation is requested. Never resolves if the sender is
/// dropped without cancelling.
async fn cancelled(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Preview report pages first, then data sheet photographs.
fn appendix_images(session: &Session) -> Vec<AppendixImage> {
    let mut images = Vec::new();
    for (role, caption) in [
        (ArtifactRole::PreviewReport, "Preview report"),
        (ArtifactRole::DataSheet, "Original data record"),
    ] {
        for path in session.paths(role) {
            if is_appendix_image(&path) {
                images.push(AppendixImage::new(&absolute(&path), caption));
            }
        }
    }
    images
}

fn is_appendix_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| APPENDIX_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
