//! Report generation pipeline.
//!
//! # Architecture
//!
//! - **Config**: service and stage settings ([`PipelineConfig`])
//! - **Task**: task records and the status state machine ([`TaskRegistry`])
//! - **Scheduler**: one background worker per task ([`Scheduler`])
//!
//! # Pipeline Flow
//!
//! 1. **Extracting**: guide text and data tables are read from the session's uploads
//! 2. **Synthesizing**: the generation endpoint writes typed report sections
//! 3. **Plotting**: figure scripts run concurrently in sandboxed subprocesses
//! 4. **Assembling**: tables and figures are interleaved into one document body
//! 5. **Compiling**: the document is compiled; content errors go back to step 2
//!    a bounded number of times
//!
//! Modification requests start at step 2 with the previous sections and the
//! requested change.
//!
//! # Example
//!
//! ```rust,ignore
//! use labforge::pipeline::{GenerateRequest, PipelineConfig, PipelineDeps, Scheduler};
//!
//! let config = PipelineConfig::from_env()?;
//! let deps = PipelineDeps::from_config(&config).await?;
//! let scheduler = Scheduler::new(config, deps);
//!
//! let task_id = scheduler.submit(GenerateRequest { session_id, metadata, credentials }).await?;
//! let record = scheduler.wait(&task_id).await;
//! ```

pub mod config;
pub mod scheduler;
pub mod task;

pub use config::{ConfigError, PipelineConfig, DEFAULT_ALLOWED_IMPORTS};
pub use scheduler::{
    EditError, EditOutcome, GenerateRequest, ModifyRequest, PipelineDeps, Scheduler, SubmitError,
};
pub use task::{
    PartialArtifacts, TaskKind, TaskRecord, TaskRegistry, TaskResult, TaskStatus,
    TransitionError, TransitionEvent,
};
