//! Parsing and validation of model output into report sections.

use std::collections::HashSet;

use serde::Deserialize;

use super::types::{figure_requests, Block, ReportSection};
use crate::error::SynthesisError;
use crate::utils::{try_extract_json_from_response, JsonExtractionResult};

const MAX_FIGURE_ID_LEN: usize = 64;

#[derive(Debug, Deserialize)]
struct ReportPayload {
    sections: Vec<ReportSection>,
}

fn malformed(reason: impl Into<String>, raw: &str) -> SynthesisError {
    SynthesisError::Malformed {
        reason: reason.into(),
        raw: raw.to_string(),
    }
}

/// Parses a raw model response into validated sections.
///
/// `table_count` is the number of extracted tables; any reference outside
/// `0..table_count` is rejected.
pub fn parse_sections(raw: &str, table_count: usize) -> Result<Vec<ReportSection>, SynthesisError> {
    let repaired = repair_escapes(raw);
    let mut failure: Option<String> = None;
    let mut parsed: Option<ReportPayload> = None;

    for candidate in [raw, repaired.as_str()] {
        match try_extract_json_from_response(candidate) {
            JsonExtractionResult::Success(json) => match serde_json::from_str(&json) {
                Ok(payload) => {
                    parsed = Some(payload);
                    break;
                }
                Err(e) => failure = Some(format!("unexpected report structure: {}", e)),
            },
            JsonExtractionResult::Truncated {
                unclosed_braces, ..
            } => {
                failure = Some(format!(
                    "response was cut off ({} unclosed braces)",
                    unclosed_braces
                ))
            }
            JsonExtractionResult::NotFound => {}
        }
    }

    let payload = parsed.ok_or_else(|| {
        malformed(
            failure.unwrap_or_else(|| "no JSON object in response".to_string()),
            raw,
        )
    })?;

    let mut sections = payload.sections;
    validate_sections(&sections, table_count).map_err(|reason| malformed(reason, raw))?;
    restore_control_chars(&mut sections);
    Ok(sections)
}

/// Structural checks on parsed sections.
pub fn validate_sections(sections: &[ReportSection], table_count: usize) -> Result<(), String> {
    if sections.is_empty() {
        return Err("report has no sections".to_string());
    }

    let requests = figure_requests(sections);
    let mut ids = HashSet::new();
    for (origin, request) in &requests {
        if !is_safe_figure_id(&request.id) {
            return Err(format!("figure id '{}' at {} is not a safe name", request.id, origin));
        }
        if !ids.insert(request.id.as_str()) {
            return Err(format!("duplicate figure id '{}'", request.id));
        }
        if request.script.trim().is_empty() {
            return Err(format!("figure '{}' has an empty script", request.id));
        }
        if let Some(bad) = request.tables.iter().find(|t| **t >= table_count) {
            return Err(format!(
                "figure '{}' reads table {} but only {} table(s) were extracted",
                request.id, bad, table_count
            ));
        }
    }

    for (s, section) in sections.iter().enumerate() {
        if section.title.trim().is_empty() {
            return Err(format!("section {} has an empty title", s + 1));
        }
        for block in &section.blocks {
            if let Block::TableRef { table, figure, .. } = block {
                if *table >= table_count {
                    return Err(format!(
                        "reference to table {} but only {} table(s) were extracted",
                        table, table_count
                    ));
                }
                if let Some(id) = figure {
                    if !ids.contains(id.as_str()) {
                        return Err(format!("table {} names unknown figure '{}'", table, id));
                    }
                }
            }
        }
    }

    Ok(())
}

fn is_safe_figure_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_FIGURE_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Doubles backslashes that do not start a valid JSON escape, which is how
/// models usually leak raw LaTeX such as `\alpha` into JSON strings.
pub fn repair_escapes(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len() + 16);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c != '\\' {
            out.push(c);
            i += 1;
            continue;
        }

        match chars.get(i + 1) {
            Some('"' | '\\' | '/' | 'b' | 'f' | 'n' | 'r' | 't') => {
                out.push(c);
                out.push(chars[i + 1]);
                i += 2;
            }
            Some('u') if is_unicode_escape(&chars[i + 2..]) => {
                out.push(c);
                i += 1;
            }
            _ => {
                out.push_str("\\\\");
                i += 1;
            }
        }
    }

    out
}

fn is_unicode_escape(rest: &[char]) -> bool {
    rest.len() >= 4 && rest[..4].iter().all(|c| c.is_ascii_hexdigit())
}

/// LaTeX commands whose leading `\n` a valid JSON string decodes to a
/// newline. Prose only restores these; equations restore every letter run.
const NEWLINE_COMMANDS: &[&str] = &[
    "nabla", "natural", "nearrow", "neg", "neq", "newline", "newpage", "nexists", "ngeq",
    "ngtr", "nleq", "nless", "nmid", "noindent", "nolimits", "nonumber", "normalsize", "not",
    "notin", "nparallel", "nsubseteq", "nsupseteq", "nu", "nwarrow",
];

/// Turns control characters produced by `\f`, `\b`, `\r`, `\t` and `\n`
/// JSON escapes back into the LaTeX commands they started (`\frac`,
/// `\beta`, `\rho`, `\theta`, `\neq`). Scripts are left untouched.
fn restore_control_chars(sections: &mut [ReportSection]) {
    fn fix(text: &mut String, math: bool) {
        if text.contains(['\x0c', '\x08', '\r', '\t']) {
            *text = text
                .replace('\x0c', "\\f")
                .replace('\x08', "\\b")
                .replace('\r', "\\r")
                .replace('\t', "\\t");
        }
        if text.contains('\n') {
            *text = restore_newline_commands(text, math);
        }
    }

    for section in sections.iter_mut() {
        fix(&mut section.title, false);
        for block in section.blocks.iter_mut() {
            match block {
                Block::Prose { text } => fix(text, false),
                Block::Equation { latex } => fix(latex, true),
                Block::TableRef { caption, .. } => fix(caption, false),
                Block::FigureRequest(request) => fix(&mut request.caption, false),
            }
        }
    }
}

/// Replaces a newline followed by letters with `\n<letters>` when the
/// result is a LaTeX command. With `any_letters`, every letter run counts.
fn restore_newline_commands(text: &str, any_letters: bool) -> String {
    let mut out = String::with_capacity(text.len() + 8);
    let mut rest = text;

    while let Some(pos) = rest.find('\n') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let word_len = after
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(after.len());
        let word = &after[..word_len];
        let is_command = !word.is_empty()
            && (any_letters || NEWLINE_COMMANDS.contains(&format!("n{}", word).as_str()));
        if is_command {
            out.push_str("\\n");
        } else {
            out.push('\n');
        }
        rest = after;
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"Here is the report:
```json
{"sections": [
  {"title": "Results", "blocks": [
    {"type": "prose", "text": "Data below."},
    {"type": "table_ref", "table": 0, "caption": "Readings"},
    {"type": "figure_request", "id": "fig_ui", "tables": [0], "caption": "U-I",
     "script": "plt.plot([1,2],[3,4])\nplt.savefig('f.png')"}
  ]}
]}
```"#;

    fn malformed_reason(result: Result<Vec<ReportSection>, SynthesisError>) -> String {
        match result {
            Err(SynthesisError::Malformed { reason, .. }) => reason,
            other => panic!("expected malformed, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_fenced_response() {
        let sections = parse_sections(VALID, 1).unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].blocks.len(), 3);
    }

    #[test]
    fn test_unknown_table_is_malformed() {
        let reason = malformed_reason(parse_sections(VALID, 0));
        assert!(reason.contains("table 0"));
    }

    #[test]
    fn test_raw_output_kept_verbatim() {
        match parse_sections("I cannot help with that.", 1) {
            Err(SynthesisError::Malformed { raw, reason }) => {
                assert_eq!(raw, "I cannot help with that.");
                assert_eq!(reason, "no JSON object in response");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_truncated_response() {
        let reason = malformed_reason(parse_sections(r#"{"sections": [{"title": "A""#, 1));
        assert!(reason.contains("cut off"));
    }

    #[test]
    fn test_duplicate_figure_ids() {
        let raw = r#"{"sections": [{"title": "A", "blocks": [
            {"type": "figure_request", "id": "f", "tables": [], "script": "x=1"},
            {"type": "figure_request", "id": "f", "tables": [], "script": "x=2"}
        ]}]}"#;
        assert!(malformed_reason(parse_sections(raw, 1)).contains("duplicate"));
    }

    #[test]
    fn test_unsafe_figure_id() {
        let raw = r#"{"sections": [{"title": "A", "blocks": [
            {"type": "figure_request", "id": "../etc", "tables": [], "script": "x=1"}
        ]}]}"#;
        assert!(malformed_reason(parse_sections(raw, 1)).contains("safe name"));
    }

    #[test]
    fn test_unknown_explicit_figure() {
        let raw = r#"{"sections": [{"title": "A", "blocks": [
            {"type": "table_ref", "table": 0, "figure": "nope"}
        ]}]}"#;
        assert!(malformed_reason(parse_sections(raw, 1)).contains("unknown figure"));
    }

    #[test]
    fn test_empty_sections() {
        assert!(malformed_reason(parse_sections(r#"{"sections": []}"#, 1)).contains("no sections"));
    }

    #[test]
    fn test_raw_latex_backslashes_repaired() {
        let raw = r#"{"sections": [{"title": "Principle", "blocks": [
            {"type": "equation", "latex": "\alpha = \frac{U}{I}"},
            {"type": "prose", "text": "Angle \(\theta\)"}
        ]}]}"#;
        let sections = parse_sections(raw, 0).unwrap();
        assert_eq!(
            sections[0].blocks[0],
            Block::Equation {
                latex: "\\alpha = \\frac{U}{I}".into()
            }
        );
        assert_eq!(
            sections[0].blocks[1],
            Block::Prose {
                text: "Angle \\(\\theta\\)".into()
            }
        );
    }

    #[test]
    fn test_valid_newline_escape_restored_in_equation() {
        let raw = r#"{"sections": [{"title": "Principle", "blocks": [
            {"type": "equation", "latex": "a \neq b + \nu"},
            {"type": "equation", "latex": "x = 1\n"}
        ]}]}"#;
        let sections = parse_sections(raw, 0).unwrap();
        assert_eq!(
            sections[0].blocks[0],
            Block::Equation {
                latex: "a \\neq b + \\nu".into()
            }
        );
        assert_eq!(
            sections[0].blocks[1],
            Block::Equation {
                latex: "x = 1\n".into()
            }
        );
    }

    #[test]
    fn test_prose_keeps_paragraph_breaks() {
        let raw = r#"{"sections": [{"title": "Analysis", "blocks": [
            {"type": "prose", "text": "Frequency \\(\nu\\) rises.\nThe error \\(a \neq 0\\).\nnot shown"}
        ]}]}"#;
        let sections = parse_sections(raw, 0).unwrap();
        assert_eq!(
            sections[0].blocks[0],
            Block::Prose {
                text: "Frequency \\(\\nu\\) rises.\nThe error \\(a \\neq 0\\).\nnot shown".into()
            }
        );
    }

    #[test]
    fn test_repair_escapes() {
        assert_eq!(repair_escapes(r#""\alpha""#), r#""\\alpha""#);
        assert_eq!(repair_escapes(r#""a\"b\\c\n""#), r#""a\"b\\c\n""#);
        assert_eq!(repair_escapes(r#""é\underline""#), r#""é\\underline""#);
    }
}
