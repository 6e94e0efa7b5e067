//! Extraction of guide text and data tables from uploaded artifacts.
//!
//! `Extractor::extract` reads every guide and data sheet through a
//! [`TextSource`], truncates the guide text, and detects tables in the data
//! sheets. A data sheet set with no recoverable table is an error rather
//! than an empty result.

pub mod guide;
pub mod source;
pub mod table;

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use guide::{split_guide, truncate_chars, GuideSection};
pub use source::{CommandTextSource, SourceKind, TextSource};
pub use table::{detect_tables, Cell, ExtractedTable};

use crate::error::ExtractionError;

/// Output of the extraction stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Extraction {
    /// Concatenated guide text, truncated to the configured limit.
    pub guide_text: String,
    /// Recognised parts of the guide, in order of first appearance.
    pub guide_parts: Vec<(GuideSection, String)>,
    /// Tables from all data sheets, numbered in upload order.
    pub tables: Vec<ExtractedTable>,
}

/// Converts uploaded guides and data sheets into text and tables.
#[derive(Clone)]
pub struct Extractor {
    source: Arc<dyn TextSource>,
    guide_limit: usize,
}

impl Extractor {
    pub fn new(source: Arc<dyn TextSource>, guide_limit: usize) -> Self {
        Self {
            source,
            guide_limit,
        }
    }

    /// Extracts guide text and tables.
    ///
    /// # Errors
    ///
    /// Returns `ExtractionError::NoTableDetected` when the data sheets hold
    /// no table, and a source error when any file cannot be read.
    pub async fn extract(
        &self,
        guides: &[PathBuf],
        data_sheets: &[PathBuf],
    ) -> Result<Extraction, ExtractionError> {
        let mut guide_text = String::new();
        for path in guides {
            let text = self.source.read_text(path).await?;
            if !guide_text.is_empty() {
                guide_text.push_str("\n\n");
            }
            guide_text.push_str(text.trim());
        }
        let guide_text = truncate_chars(&guide_text, self.guide_limit);

        let mut tables = Vec::new();
        for path in data_sheets {
            let text = self.source.read_text(path).await?;
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            for mut table in detect_tables(&text, &name) {
                table.index = tables.len();
                tables.push(table);
            }
            tracing::debug!(file = %name, total_tables = tables.len(), "Scanned data sheet");
        }

        if tables.is_empty() {
            return Err(ExtractionError::NoTableDetected);
        }

        Ok(Extraction {
            guide_parts: split_guide(&guide_text),
            guide_text,
            tables,
        })
    }
}
