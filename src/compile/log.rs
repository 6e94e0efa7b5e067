//! Compiler log parsing and error classification.
//!
//! Errors are read from the `.log` file (both `! message` and
//! `file:line: message` styles), mapped back to the body block that
//! produced the offending line, and classified as content-fixable or
//! terminal.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::template::LatexSource;
use crate::synth::BlockOrigin;

/// Maximum number of log entries kept.
const MAX_ENTRIES: usize = 20;
/// Lines scanned after a `!` error for its `l.N` line marker.
const LINE_MARKER_LOOKAHEAD: usize = 12;
/// Lines kept in the raw excerpt.
const EXCERPT_LINES: usize = 40;

/// Whether a failed compilation can be fixed by regenerating content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fixability {
    ContentFixable,
    Terminal,
}

/// Recognised compiler error categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogErrorKind {
    UndefinedControlSequence,
    MissingMathDelimiter,
    UnbalancedBraces,
    MisplacedAlignment,
    EnvironmentMismatch,
    RunawayArgument,
    DoubleScript,
    MissingFile,
    MissingFont,
    CompilerMissing,
    Timeout,
    Other,
}

impl LogErrorKind {
    pub fn from_message(message: &str) -> Self {
        let m = message.to_lowercase();
        if m.contains("fontspec") && m.contains("cannot be found") {
            LogErrorKind::MissingFont
        } else if m.contains("not found") && m.contains("file") {
            LogErrorKind::MissingFile
        } else if m.contains("undefined control sequence") {
            LogErrorKind::UndefinedControlSequence
        } else if m.contains("missing $ inserted") || m.contains("display math should end") {
            LogErrorKind::MissingMathDelimiter
        } else if m.contains("missing } inserted")
            || m.contains("missing { inserted")
            || m.contains("extra }")
            || m.contains("too many }")
        {
            LogErrorKind::UnbalancedBraces
        } else if m.contains("misplaced alignment tab") || m.contains("extra alignment tab") {
            LogErrorKind::MisplacedAlignment
        } else if m.contains("ended by \\end") || (m.contains("environment") && m.contains("undefined")) {
            LogErrorKind::EnvironmentMismatch
        } else if m.contains("runaway argument") || m.contains("paragraph ended before") {
            LogErrorKind::RunawayArgument
        } else if m.contains("double subscript") || m.contains("double superscript") {
            LogErrorKind::DoubleScript
        } else {
            LogErrorKind::Other
        }
    }

    /// Errors caused by the document text itself.
    pub fn is_syntactic(&self) -> bool {
        matches!(
            self,
            LogErrorKind::UndefinedControlSequence
                | LogErrorKind::MissingMathDelimiter
                | LogErrorKind::UnbalancedBraces
                | LogErrorKind::MisplacedAlignment
                | LogErrorKind::EnvironmentMismatch
                | LogErrorKind::RunawayArgument
                | LogErrorKind::DoubleScript
        )
    }
}

/// Where in the generated body an error sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BodyLocation {
    /// 1-based line within the rendered body.
    pub body_line: usize,
    /// Block that rendered the line, if the line belongs to one.
    pub origin: Option<BlockOrigin>,
}

/// One compiler error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub kind: LogErrorKind,
    pub message: String,
    /// 1-based line in the full source file.
    pub line: Option<usize>,
    /// Source text the compiler showed at the error.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub context: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<BodyLocation>,
}

impl LogEntry {
    pub fn new(kind: LogErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            line: None,
            context: String::new(),
            location: None,
        }
    }
}

/// Structured result of a failed compilation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerLog {
    pub fixability: Fixability,
    pub entries: Vec<LogEntry>,
    /// Tail of the raw log or compiler output.
    pub excerpt: String,
}

impl CompilerLog {
    /// A terminal failure with a single entry.
    pub fn terminal(kind: LogErrorKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            fixability: Fixability::Terminal,
            entries: vec![LogEntry::new(kind, message.clone())],
            excerpt: message,
        }
    }

    pub fn is_content_fixable(&self) -> bool {
        self.fixability == Fixability::ContentFixable
    }

    /// One-line description of the first error.
    pub fn summary(&self) -> String {
        match self.entries.first() {
            Some(entry) => {
                let mut text = entry.message.clone();
                if let Some(line) = entry.line {
                    text.push_str(&format!(" (line {})", line));
                }
                if self.entries.len() > 1 {
                    text.push_str(&format!(" and {} more error(s)", self.entries.len() - 1));
                }
                text
            }
            None => "compilation failed without a diagnostic".to_string(),
        }
    }

    /// Renders the errors as corrective instructions for the model.
    pub fn to_feedback(&self) -> String {
        let mut out = String::from(
            "The previous report failed to compile. Fix these errors in the generated content:\n",
        );
        for entry in &self.entries {
            out.push_str("- ");
            out.push_str(&entry.message);
            match entry.location.and_then(|l| l.origin) {
                Some(origin) => out.push_str(&format!(" [in {}]", origin)),
                None => {
                    if let Some(line) = entry.line {
                        out.push_str(&format!(" [source line {}]", line));
                    }
                }
            }
            if !entry.context.is_empty() {
                out.push_str(&format!(": `{}`", entry.context));
            }
            out.push('\n');
        }
        out
    }
}

fn file_line_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:.*[/\\])?[^/\\:\s]+\.tex:(\d+):\s*(.+)$").ok())
        .as_ref()
}

fn line_marker_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^l\.(\d+)\s?(.*)$").ok()).as_ref()
}

fn is_consequential(message: &str) -> bool {
    let m = message.trim();
    m.starts_with("Emergency stop")
        || m.starts_with("==> Fatal error")
        || m.starts_with("Fatal error occurred")
        || m.starts_with("Job aborted")
}

/// Extracts error entries from a compiler log, in order of appearance.
pub fn parse_log(log: &str) -> Vec<LogEntry> {
    let (Some(file_line), Some(marker)) = (file_line_regex(), line_marker_regex()) else {
        return Vec::new();
    };
    let lines: Vec<&str> = log.lines().collect();
    let mut entries: Vec<LogEntry> = Vec::new();

    for (i, line) in lines.iter().enumerate() {
        let (message, mut line_no) = if let Some(caps) = file_line.captures(line) {
            let line_no = caps.get(1).and_then(|m| m.as_str().parse().ok());
            (caps.get(2).map(|m| m.as_str().trim().to_string()), line_no)
        } else if let Some(rest) = line.strip_prefix('!') {
            (Some(rest.trim().to_string()), None)
        } else {
            (None, None)
        };

        let Some(message) = message else { continue };
        if message.is_empty() || is_consequential(&message) {
            continue;
        }

        let mut context = String::new();
        for follow in lines.iter().skip(i + 1).take(LINE_MARKER_LOOKAHEAD) {
            if follow.starts_with('!') || file_line.is_match(follow) {
                break;
            }
            if let Some(caps) = marker.captures(follow) {
                if line_no.is_none() {
                    line_no = caps.get(1).and_then(|m| m.as_str().parse().ok());
                }
                context = caps
                    .get(2)
                    .map(|m| m.as_str().trim().to_string())
                    .unwrap_or_default();
                break;
            }
        }

        let duplicate = entries
            .iter()
            .any(|e| e.line == line_no && e.message == message);
        if duplicate {
            continue;
        }

        entries.push(LogEntry {
            kind: LogErrorKind::from_message(&message),
            message,
            line: line_no,
            context,
            location: None,
        });
        if entries.len() >= MAX_ENTRIES {
            break;
        }
    }

    entries
}

/// Locates entries in the body and decides fixability.
///
/// A log is content-fixable only when every entry is a syntax error whose
/// line falls inside the generated body.
pub fn classify(mut entries: Vec<LogEntry>, source: &LatexSource, excerpt: String) -> CompilerLog {
    for entry in entries.iter_mut() {
        if let Some(line) = entry.line {
            entry.location = source.locate(line);
        }
    }

    let fixable = !entries.is_empty()
        && entries
            .iter()
            .all(|e| e.kind.is_syntactic() && e.location.is_some());

    if entries.is_empty() {
        entries.push(LogEntry::new(
            LogErrorKind::Other,
            "compiler failed without a recognisable error",
        ));
    }

    CompilerLog {
        fixability: if fixable {
            Fixability::ContentFixable
        } else {
            Fixability::Terminal
        },
        entries,
        excerpt,
    }
}

/// Last lines of a log, for display.
pub fn excerpt(log: &str) -> String {
    let lines: Vec<&str> = log.lines().collect();
    let start = lines.len().saturating_sub(EXCERPT_LINES);
    lines[start..].join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assemble::LineSpan;

    const CLASSIC_LOG: &str = "\
This is XeTeX, Version 3.141592653
(./main.tex
! Undefined control sequence.
l.42 The value is \\foo
                    {3}
! Missing $ inserted.
<inserted text>
                $
l.44 x_1

! Emergency stop.
";

    fn source(body_start: usize, body_lines: usize) -> LatexSource {
        LatexSource {
            text: String::new(),
            body_start_line: body_start,
            body_line_count: body_lines,
            spans: vec![
                LineSpan {
                    start: 1,
                    end: 3,
                    origin: Some(BlockOrigin { section: 0, block: 0 }),
                },
                LineSpan {
                    start: 4,
                    end: 10,
                    origin: Some(BlockOrigin { section: 1, block: 2 }),
                },
            ],
        }
    }

    #[test]
    fn test_parse_classic_log() {
        let entries = parse_log(CLASSIC_LOG);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, LogErrorKind::UndefinedControlSequence);
        assert_eq!(entries[0].line, Some(42));
        assert_eq!(entries[0].context, "The value is \\foo");
        assert_eq!(entries[1].kind, LogErrorKind::MissingMathDelimiter);
        assert_eq!(entries[1].line, Some(44));
    }

    #[test]
    fn test_parse_file_line_error_style() {
        let log = "./main.tex:7: Package fontspec Error: The font \"Nope\" cannot be found.\n\
                   ./main.tex:50: Misplaced alignment tab character &.\nl.50 a & b\n";
        let entries = parse_log(log);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].kind, LogErrorKind::MissingFont);
        assert_eq!(entries[0].line, Some(7));
        assert!(entries[0].context.is_empty());
        assert_eq!(entries[1].kind, LogErrorKind::MisplacedAlignment);
        assert_eq!(entries[1].context, "a & b");
    }

    #[test]
    fn test_classify_content_fixable_inside_body() {
        let entries = parse_log(CLASSIC_LOG);
        // Body occupies source lines 40..=49.
        let log = classify(entries, &source(40, 10), excerpt(CLASSIC_LOG));
        assert!(log.is_content_fixable());
        let first = log.entries[0].location.unwrap();
        assert_eq!(first.body_line, 3);
        assert_eq!(first.origin, Some(BlockOrigin { section: 0, block: 0 }));
        assert_eq!(
            log.entries[1].location.unwrap().origin,
            Some(BlockOrigin { section: 1, block: 2 })
        );
        assert!(log.to_feedback().contains("[in section 1 block 1]"));
    }

    #[test]
    fn test_classify_error_outside_body_is_terminal() {
        let entries = parse_log(CLASSIC_LOG);
        let log = classify(entries, &source(100, 10), String::new());
        assert_eq!(log.fixability, Fixability::Terminal);
    }

    #[test]
    fn test_classify_hand_edited_source_is_terminal() {
        let entries = parse_log(CLASSIC_LOG);
        let log = classify(entries, &LatexSource::raw("\\documentclass{article}"), String::new());
        assert_eq!(log.fixability, Fixability::Terminal);
        assert!(log.entries.iter().all(|e| e.location.is_none()));
    }

    #[test]
    fn test_classify_missing_font_is_terminal() {
        let entries = vec![LogEntry {
            kind: LogErrorKind::MissingFont,
            message: "font cannot be found".into(),
            line: Some(41),
            context: String::new(),
            location: None,
        }];
        let log = classify(entries, &source(40, 10), String::new());
        assert_eq!(log.fixability, Fixability::Terminal);
    }

    #[test]
    fn test_classify_empty_log_is_terminal() {
        let log = classify(Vec::new(), &source(1, 1), "boom".into());
        assert!(!log.is_content_fixable());
        assert_eq!(log.entries.len(), 1);
    }

    #[test]
    fn test_summary() {
        let log = CompilerLog::terminal(LogErrorKind::Timeout, "compiler timed out after 120s");
        assert_eq!(log.summary(), "compiler timed out after 120s");
        assert!(!log.is_content_fixable());
    }

    #[test]
    fn test_kind_from_message() {
        assert_eq!(
            LogErrorKind::from_message("LaTeX Error: File `siunitx.sty' not found."),
            LogErrorKind::MissingFile
        );
        assert_eq!(
            LogErrorKind::from_message("LaTeX Error: \\begin{table} on input line 3 ended by \\end{figure}."),
            LogErrorKind::EnvironmentMismatch
        );
        assert_eq!(
            LogErrorKind::from_message("Extra }, or forgotten $."),
            LogErrorKind::UnbalancedBraces
        );
        assert_eq!(LogErrorKind::from_message("Something odd"), LogErrorKind::Other);
    }
}
