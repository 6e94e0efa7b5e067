//! Document compilation.
//!
//! An assembled document is rendered into a full LaTeX source through the
//! report template, compiled, and on failure the compiler log is parsed into
//! a [`CompilerLog`] that says whether regenerating content can fix it.

pub mod latex;
pub mod log;
pub mod template;

pub use latex::{CompiledDocument, CompiledResult, DocumentCompiler, LatexCompiler, SOURCE_FILE};
pub use log::{
    classify, parse_log, BodyLocation, CompilerLog, Fixability, LogEntry, LogErrorKind,
};
pub use template::{render_document, AppendixImage, LatexSource, REPORT_TEMPLATE};
