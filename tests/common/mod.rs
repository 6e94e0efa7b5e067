//! Shared fixtures for pipeline and API tests.
//!
//! Every external collaborator is replaced: the model endpoint replies from
//! a script, figures are written (or failed) by id, and the compiler writes
//! placeholder files or returns scripted logs. Uploads are plain-text files,
//! so the real command-backed text source never spawns a process.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tempfile::TempDir;

use labforge::compile::{
    CompiledDocument, CompiledResult, CompilerLog, DocumentCompiler, Fixability, LatexSource,
    LogEntry, LogErrorKind, SOURCE_FILE,
};
use labforge::error::{CompileError, LlmError};
use labforge::extract::{CommandTextSource, ExtractedTable, Extractor};
use labforge::figure::{FigureArtifact, FigureOutcome, FigureRunner};
use labforge::history::HistoryStore;
use labforge::llm::{
    Credentials, GenerationRequest, GenerationResponse, LlmProvider, ProviderFactory,
};
use labforge::metadata::ReportMetadata;
use labforge::pipeline::{GenerateRequest, PipelineConfig, PipelineDeps, Scheduler};
use labforge::session::{ArtifactRole, IncomingFile, SessionStore};
use labforge::synth::FigureRequest;

pub const DATA_SHEET: &str = "U (V),I (mA)\n1.0,2.0\n2.0,4.1\n3.0,6.0\n4.0,8.1\n";
pub const GUIDE: &str = "Purpose\nVerify Ohm's law.\nPrinciple\nU = IR.\nProcedure\nSweep the voltage and record the current.";

/// One scripted endpoint reply.
pub enum Reply {
    Text(String),
    Error(LlmError),
    /// Never answers; the synthesis timeout fires.
    Hang,
}

/// Provider answering from a queue. An empty queue is a client error.
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<GenerationRequest>>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        })
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// User prompts of every request, in order.
    pub fn user_prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.messages.iter().find(|m| m.role == "user"))
            .map(|m| m.content.clone())
            .collect()
    }
}

#[async_trait]
impl LlmProvider for ScriptedProvider {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let model = request.model.clone();
        self.requests.lock().unwrap().push(request);
        let reply = self.replies.lock().unwrap().pop_front();
        match reply {
            Some(Reply::Text(text)) => Ok(GenerationResponse::from_text(model, text)),
            Some(Reply::Error(err)) => Err(err),
            Some(Reply::Hang) => std::future::pending().await,
            None => Err(LlmError::ApiError {
                code: 400,
                message: "script exhausted".to_string(),
            }),
        }
    }
}

/// Hands out the same scripted provider for every credential set.
pub struct ScriptedFactory(pub Arc<ScriptedProvider>);

impl ProviderFactory for ScriptedFactory {
    fn create(&self, credentials: &Credentials) -> Result<Arc<dyn LlmProvider>, LlmError> {
        credentials.validate()?;
        Ok(self.0.clone())
    }
}

/// Writes a tiny PNG for every figure except ids starting with `bad`.
pub struct StubFigureRunner {
    pub delay: Duration,
}

#[async_trait]
impl FigureRunner for StubFigureRunner {
    async fn run(
        &self,
        request: &FigureRequest,
        _tables: &[ExtractedTable],
        workdir: &Path,
    ) -> FigureArtifact {
        tokio::time::sleep(self.delay).await;
        if request.id.starts_with("bad") {
            return FigureArtifact::failed(&request.id, "script raised ValueError");
        }
        if let Err(e) = tokio::fs::create_dir_all(workdir).await {
            return FigureArtifact::failed(&request.id, e.to_string());
        }
        let path = workdir.join("figure.png");
        if let Err(e) = tokio::fs::write(&path, b"\x89PNG\r\n\x1a\n").await {
            return FigureArtifact::failed(&request.id, e.to_string());
        }
        FigureArtifact::new(&request.id, FigureOutcome::Image { path }, self.delay)
    }
}

/// One scripted compiler outcome.
#[derive(Clone)]
pub enum CompileStep {
    Success,
    Fixable,
    Terminal,
}

/// Compiler replaying a script; succeeds once the script runs out.
pub struct ScriptedCompiler {
    steps: Mutex<VecDeque<CompileStep>>,
    sources: Mutex<Vec<String>>,
}

impl ScriptedCompiler {
    pub fn new(steps: Vec<CompileStep>) -> Arc<Self> {
        Arc::new(Self {
            steps: Mutex::new(steps.into()),
            sources: Mutex::new(Vec::new()),
        })
    }

    pub fn compiled_sources(&self) -> Vec<String> {
        self.sources.lock().unwrap().clone()
    }
}

pub fn fixable_log() -> CompilerLog {
    let mut entry = LogEntry::new(LogErrorKind::UndefinedControlSequence, "Undefined control sequence");
    entry.line = Some(42);
    entry.context = "\\badmacro".to_string();
    CompilerLog {
        fixability: Fixability::ContentFixable,
        entries: vec![entry],
        excerpt: "! Undefined control sequence.\nl.42 \\badmacro".to_string(),
    }
}

#[async_trait]
impl DocumentCompiler for ScriptedCompiler {
    async fn compile(
        &self,
        source: &LatexSource,
        workspace: &Path,
    ) -> Result<CompiledResult, CompileError> {
        self.sources.lock().unwrap().push(source.text.clone());
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(CompileStep::Success);

        match step {
            CompileStep::Success => {
                let source_path = workspace.join(SOURCE_FILE);
                let pdf_path = workspace.join("main.pdf");
                tokio::fs::write(&source_path, &source.text).await?;
                tokio::fs::write(&pdf_path, b"%PDF-1.5\n%%EOF\n").await?;
                Ok(CompiledResult::Success(CompiledDocument {
                    pdf_path,
                    source_path,
                }))
            }
            CompileStep::Fixable => Ok(CompiledResult::Failure(fixable_log())),
            CompileStep::Terminal => Ok(CompiledResult::Failure(CompilerLog::terminal(
                LogErrorKind::MissingFont,
                "fontspec error: font \"SimSun\" cannot be found",
            ))),
        }
    }

    async fn version(&self) -> Result<String, CompileError> {
        Ok("XeTeX 3.141592653-2.6-0.999995 (scripted)".to_string())
    }
}

/// A scheduler wired to scripted collaborators in a temporary data dir.
pub struct Harness {
    pub scheduler: Scheduler,
    pub provider: Arc<ScriptedProvider>,
    pub compiler: Arc<ScriptedCompiler>,
    pub dir: TempDir,
}

pub struct HarnessBuilder {
    replies: Vec<Reply>,
    steps: Vec<CompileStep>,
    figure_delay: Duration,
    synthesis_timeout: Duration,
    max_corrective_retries: u32,
}

impl HarnessBuilder {
    pub fn new(replies: Vec<Reply>) -> Self {
        Self {
            replies,
            steps: Vec::new(),
            figure_delay: Duration::ZERO,
            synthesis_timeout: Duration::from_secs(5),
            max_corrective_retries: 2,
        }
    }

    pub fn compile_steps(mut self, steps: Vec<CompileStep>) -> Self {
        self.steps = steps;
        self
    }

    pub fn figure_delay(mut self, delay: Duration) -> Self {
        self.figure_delay = delay;
        self
    }

    pub fn synthesis_timeout(mut self, timeout: Duration) -> Self {
        self.synthesis_timeout = timeout;
        self
    }

    pub fn max_corrective_retries(mut self, retries: u32) -> Self {
        self.max_corrective_retries = retries;
        self
    }

    pub async fn build(self) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::new()
            .with_data_dir(dir.path())
            .with_synthesis_timeout(self.synthesis_timeout)
            .with_transport_retries(2, Duration::from_millis(5))
            .with_max_corrective_retries(self.max_corrective_retries)
            .with_figure_concurrency(2);

        let provider = ScriptedProvider::new(self.replies);
        let compiler = ScriptedCompiler::new(self.steps);
        let source = CommandTextSource::new("pdftotext", "tesseract", Duration::from_secs(5));
        let deps = PipelineDeps {
            extractor: Extractor::new(Arc::new(source), config.guide_text_limit),
            providers: Arc::new(ScriptedFactory(provider.clone())),
            figures: Arc::new(StubFigureRunner {
                delay: self.figure_delay,
            }),
            compiler: compiler.clone(),
            sessions: Arc::new(SessionStore::new(config.sessions_dir(), config.max_upload_bytes)),
            history: Arc::new(
                HistoryStore::open(config.history_path(), config.history_capacity)
                    .await
                    .unwrap(),
            ),
        };

        Harness {
            scheduler: Scheduler::new(config, deps),
            provider,
            compiler,
            dir,
        }
    }
}

impl Harness {
    /// Uploads a guide and a data sheet, returning the new session id.
    pub async fn upload_defaults(&self) -> String {
        self.upload_sheet(DATA_SHEET).await
    }

    pub async fn upload_sheet(&self, sheet: &str) -> String {
        let sessions = self.scheduler.sessions();
        let (id, _) = sessions
            .upload(
                None,
                ArtifactRole::Guide,
                vec![IncomingFile {
                    name: "guide.txt".into(),
                    data: GUIDE.as_bytes().to_vec(),
                }],
            )
            .await
            .unwrap();
        sessions
            .upload(
                Some(&id),
                ArtifactRole::DataSheet,
                vec![IncomingFile {
                    name: "ohm.csv".into(),
                    data: sheet.as_bytes().to_vec(),
                }],
            )
            .await
            .unwrap();
        id
    }

    pub fn generate_request(&self, session_id: &str) -> GenerateRequest {
        GenerateRequest {
            session_id: session_id.to_string(),
            metadata: metadata(),
            credentials: credentials(),
        }
    }
}

pub fn credentials() -> Credentials {
    Credentials::new("http://model.invalid/v1", "sk-test", "test-model")
}

pub fn metadata() -> ReportMetadata {
    ReportMetadata {
        experiment_name: "Ohm's Law".to_string(),
        name: "Alex Doe".to_string(),
        student_id: "2024001".to_string(),
        date: "2024-05-06".to_string(),
        ..Default::default()
    }
}

/// Model output with one table reference and the given figure ids, all
/// reading table 0.
pub fn report_json(figures: &[&str]) -> String {
    let mut results = vec![
        json!({"type": "prose", "text": "The measured current grows linearly with voltage."}),
        json!({"type": "table_ref", "table": 0, "caption": "Measured U and I"}),
    ];
    for id in figures {
        results.push(json!({
            "type": "figure_request",
            "id": id,
            "tables": [0],
            "caption": format!("Plot {}", id),
            "script": "plt.plot([1, 2], [2, 4])\nplt.savefig('figure.png', dpi=200)",
        }));
    }

    json!({
        "sections": [
            {
                "title": "Purpose",
                "blocks": [{"type": "prose", "text": "Verify Ohm's law."}]
            },
            {
                "title": "Results and Data Processing",
                "blocks": results
            },
            {
                "title": "Summary",
                "blocks": [{"type": "equation", "latex": "R = U / I"}]
            }
        ]
    })
    .to_string()
}
