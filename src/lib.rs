//! labforge: lab report generation from experiment data sheets.
//!
//! Uploaded guides and data sheets are turned into a typeset report:
//! measured tables are extracted, a chat-completions endpoint writes the
//! content, requested plots are rendered in a sandboxed Python process, and
//! the document is compiled with XeLaTeX. Compilation failures that stem
//! from the generated content are fed back to the model for correction.

// Core modules
pub mod assemble;
pub mod cli;
pub mod compile;
pub mod error;
pub mod extract;
pub mod figure;
pub mod history;
pub mod latex;
pub mod llm;
pub mod metadata;
pub mod pipeline;
pub mod session;
pub mod synth;
pub mod utils;

// HTTP surface
pub mod api;

// Re-export commonly used error types
pub use error::{
    CompileError, ErrorDetail, ErrorKind, ExtractionError, HistoryError, LlmError, SessionError,
    SynthesisError,
};
