//! Figure rendering.
//!
//! Every figure request is executed in isolation and yields exactly one
//! [`FigureArtifact`]. Failures never escape this module; they become
//! [`FigureOutcome::Failed`] and are turned into fallback notices during
//! assembly.

pub mod executor;
pub mod runner;
pub mod sandbox;

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use executor::execute_all;
pub use runner::{find_images, FigureRunner, SubprocessFigureRunner};
pub use sandbox::{check_script, imported_modules, SandboxLimits};

/// Result of running one figure request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FigureOutcome {
    Image { path: PathBuf },
    Failed { reason: String },
}

/// The outcome of one figure request, keyed by its id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureArtifact {
    pub request_id: String,
    pub outcome: FigureOutcome,
    pub duration_ms: u64,
}

impl FigureArtifact {
    pub fn new(request_id: impl Into<String>, outcome: FigureOutcome, elapsed: Duration) -> Self {
        Self {
            request_id: request_id.into(),
            outcome,
            duration_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn failed(request_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            request_id,
            FigureOutcome::Failed {
                reason: reason.into(),
            },
            Duration::ZERO,
        )
    }

    pub fn image_path(&self) -> Option<&PathBuf> {
        match &self.outcome {
            FigureOutcome::Image { path } => Some(path),
            FigureOutcome::Failed { .. } => None,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, FigureOutcome::Failed { .. })
    }
}
