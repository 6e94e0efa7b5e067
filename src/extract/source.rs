//! Text sources: turn an uploaded file into plain text.
//!
//! Plain text and CSV are read directly. PDFs and scanned images go through
//! external command-line tools (`pdftotext`, `tesseract` by default).

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::ExtractionError;

/// Converts a file into plain text.
#[async_trait]
pub trait TextSource: Send + Sync {
    async fn read_text(&self, path: &Path) -> Result<String, ExtractionError>;
}

/// How a file's text is obtained, decided from its extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    PlainText,
    Pdf,
    Image,
}

impl SourceKind {
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        match ext.as_str() {
            "txt" | "csv" | "tsv" | "md" => Some(SourceKind::PlainText),
            "pdf" => Some(SourceKind::Pdf),
            "png" | "jpg" | "jpeg" | "gif" | "bmp" | "tif" | "tiff" => Some(SourceKind::Image),
            _ => None,
        }
    }
}

/// Text source backed by external extraction commands.
#[derive(Debug, Clone)]
pub struct CommandTextSource {
    pdf_command: String,
    ocr_command: String,
    timeout: Duration,
}

impl CommandTextSource {
    pub fn new(pdf_command: impl Into<String>, ocr_command: impl Into<String>, timeout: Duration) -> Self {
        Self {
            pdf_command: pdf_command.into(),
            ocr_command: ocr_command.into(),
            timeout,
        }
    }

    async fn run(&self, program: &str, args: &[&str], path: &Path) -> Result<String, ExtractionError> {
        let display = path.display().to_string();
        let child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExtractionError::SourceFailed {
                path: display.clone(),
                message: format!("failed to start '{}': {}", program, e),
            })?;

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| ExtractionError::SourceFailed {
                path: display.clone(),
                message: format!("'{}' timed out after {:?}", program, self.timeout),
            })??;

        if !output.status.success() {
            return Err(ExtractionError::SourceFailed {
                path: display,
                message: format!(
                    "'{}' exited with {}: {}",
                    program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl TextSource for CommandTextSource {
    async fn read_text(&self, path: &Path) -> Result<String, ExtractionError> {
        let kind = SourceKind::from_path(path)
            .ok_or_else(|| ExtractionError::UnsupportedFormat(path.display().to_string()))?;
        let path_str = path.to_string_lossy().into_owned();

        match kind {
            SourceKind::PlainText => {
                let bytes = tokio::fs::read(path).await?;
                Ok(String::from_utf8_lossy(&bytes).into_owned())
            }
            SourceKind::Pdf => {
                self.run(&self.pdf_command, &["-layout", &path_str, "-"], path)
                    .await
            }
            SourceKind::Image => self.run(&self.ocr_command, &[&path_str, "stdout"], path).await,
        }
    }
}
