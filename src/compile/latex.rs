//! Document compiler invocation.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;

use super::log::{classify, excerpt, parse_log, CompilerLog, LogErrorKind};
use super::template::LatexSource;
use crate::error::CompileError;

/// Name of the source file written into the workspace.
pub const SOURCE_FILE: &str = "main.tex";
const PDF_FILE: &str = "main.pdf";
const LOG_FILE: &str = "main.log";
const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// A successfully compiled document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledDocument {
    pub pdf_path: PathBuf,
    pub source_path: PathBuf,
}

/// Outcome of a compilation.
#[derive(Debug, Clone, PartialEq)]
pub enum CompiledResult {
    Success(CompiledDocument),
    Failure(CompilerLog),
}

/// Turns a LaTeX source into a document.
///
/// Diagnostics come back as [`CompiledResult::Failure`]; `Err` is reserved
/// for problems preparing the workspace.
#[async_trait]
pub trait DocumentCompiler: Send + Sync {
    async fn compile(
        &self,
        source: &LatexSource,
        workspace: &Path,
    ) -> Result<CompiledResult, CompileError>;

    /// First line of the compiler's version output.
    async fn version(&self) -> Result<String, CompileError>;
}

/// Runs a TeX engine such as `xelatex`.
#[derive(Debug, Clone)]
pub struct LatexCompiler {
    program: String,
    passes: u32,
    timeout: Duration,
    fonts_dir: Option<PathBuf>,
}

impl LatexCompiler {
    pub fn new(program: impl Into<String>, passes: u32, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            passes: passes.max(1),
            timeout,
            fonts_dir: None,
        }
    }

    pub fn with_fonts_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.fonts_dir = dir;
        self
    }

    async fn copy_fonts(&self, workspace: &Path) -> Result<(), CompileError> {
        let Some(dir) = &self.fonts_dir else {
            return Ok(());
        };
        if !dir.is_dir() {
            tracing::warn!(fonts_dir = %dir.display(), "Fonts directory does not exist");
            return Ok(());
        }
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_font = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("ttf") || e.eq_ignore_ascii_case("otf"))
                .unwrap_or(false);
            if !is_font {
                continue;
            }
            let target = workspace.join(entry.file_name());
            if !target.exists() {
                tokio::fs::copy(&path, &target).await?;
            }
        }
        Ok(())
    }

    /// Runs one compiler pass over `main.tex`.
    async fn run_pass(&self, workspace: &Path) -> Result<PassOutcome, CompileError> {
        let child = Command::new(&self.program)
            .arg("-interaction=nonstopmode")
            .arg("-file-line-error")
            .arg("-halt-on-error")
            .arg(format!("-output-directory={}", workspace.display()))
            .arg(SOURCE_FILE)
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let child = match child {
            Ok(child) => child,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(PassOutcome::Terminal(CompilerLog::terminal(
                    LogErrorKind::CompilerMissing,
                    format!("compiler '{}' not found", self.program),
                )));
            }
            Err(e) => return Err(e.into()),
        };

        match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Err(_) => Ok(PassOutcome::Terminal(CompilerLog::terminal(
                LogErrorKind::Timeout,
                format!("compiler timed out after {}s", self.timeout.as_secs()),
            ))),
            Ok(output) => {
                let output = output?;
                if output.status.success() {
                    Ok(PassOutcome::Clean)
                } else {
                    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
                    text.push_str(&String::from_utf8_lossy(&output.stderr));
                    Ok(PassOutcome::Failed(text))
                }
            }
        }
    }
}

enum PassOutcome {
    Clean,
    Failed(String),
    Terminal(CompilerLog),
}

#[async_trait]
impl DocumentCompiler for LatexCompiler {
    async fn compile(
        &self,
        source: &LatexSource,
        workspace: &Path,
    ) -> Result<CompiledResult, CompileError> {
        tokio::fs::create_dir_all(workspace).await?;
        self.copy_fonts(workspace).await?;

        let source_path = workspace.join(SOURCE_FILE);
        let pdf_path = workspace.join(PDF_FILE);
        tokio::fs::write(&source_path, &source.text).await?;
        if pdf_path.exists() {
            tokio::fs::remove_file(&pdf_path).await?;
        }

        for pass in 1..=self.passes {
            tracing::debug!(pass, program = %self.program, "Running compiler pass");
            match self.run_pass(workspace).await? {
                PassOutcome::Clean => {}
                PassOutcome::Terminal(log) => return Ok(CompiledResult::Failure(log)),
                PassOutcome::Failed(output) => {
                    let log_text = tokio::fs::read_to_string(workspace.join(LOG_FILE))
                        .await
                        .unwrap_or(output);
                    let entries = parse_log(&log_text);
                    let log = classify(entries, source, excerpt(&log_text));
                    return Ok(CompiledResult::Failure(log));
                }
            }
        }

        if !pdf_path.exists() {
            return Ok(CompiledResult::Failure(CompilerLog::terminal(
                LogErrorKind::Other,
                "compiler exited cleanly but produced no document",
            )));
        }

        Ok(CompiledResult::Success(CompiledDocument {
            pdf_path,
            source_path,
        }))
    }

    async fn version(&self) -> Result<String, CompileError> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("--version").stdin(Stdio::null()).kill_on_drop(true);

        let output = tokio::time::timeout(VERSION_TIMEOUT, cmd.output())
            .await
            .map_err(|_| CompileError::Unavailable(format!("'{}' did not answer", self.program)))?
            .map_err(|e| CompileError::Unavailable(format!("'{}': {}", self.program, e)))?;

        if !output.status.success() {
            return Err(CompileError::Unavailable(format!(
                "'{}' exited with {}",
                self.program, output.status
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        stdout
            .lines()
            .next()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .ok_or_else(|| CompileError::Unavailable("empty version output".to_string()))
    }
}
