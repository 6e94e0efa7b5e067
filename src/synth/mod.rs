//! Report content synthesis.
//!
//! Extracted guide text, tables and metadata go to the generation endpoint;
//! the response is parsed into typed [`ReportSection`]s. Corrective rounds
//! carry the compiler log as [`Feedback`], modification rounds carry the
//! user's request.

pub mod parse;
pub mod prompt;
pub mod synthesizer;
pub mod types;

pub use parse::{parse_sections, repair_escapes, validate_sections};
pub use prompt::{build_messages, Feedback, PromptInput, SYNTHESIS_SYSTEM_PROMPT};
pub use synthesizer::{SynthesisPolicy, Synthesizer};
pub use types::{figure_requests, Block, BlockOrigin, FigureRequest, ReportSection};
