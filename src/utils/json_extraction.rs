//! JSON extraction from model responses.
//!
//! Models wrap structured output in markdown fences, preface it with prose,
//! or run out of tokens mid-object. The extraction strategies, in order:
//! 1. A ```json fenced block
//! 2. Any fenced block containing an object
//! 3. The whole response, when it starts with '{'
//! 4. The largest valid object anywhere in the response
//!
//! Only JSON objects are extracted; report payloads are always objects.

use regex::Regex;

/// Result of a JSON extraction attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonExtractionResult {
    /// A complete, parseable JSON object.
    Success(String),
    /// An object starts but never closes, usually a token-limit cut-off.
    Truncated {
        partial_json: String,
        unclosed_braces: usize,
    },
    /// No JSON-like content in the response.
    NotFound,
}

impl JsonExtractionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, JsonExtractionResult::Success(_))
    }

    pub fn json(&self) -> Option<&str> {
        match self {
            JsonExtractionResult::Success(json) => Some(json),
            _ => None,
        }
    }
}

/// Tries every strategy and reports success, truncation, or absence.
pub fn try_extract_json_from_response(content: &str) -> JsonExtractionResult {
    let trimmed = content.trim();

    if let Some(json) = extract_from_code_block(trimmed, true) {
        if is_valid(&json) {
            return JsonExtractionResult::Success(json);
        }
    }

    if let Some(json) = extract_from_code_block(trimmed, false) {
        if is_valid(&json) {
            return JsonExtractionResult::Success(json);
        }
    }

    if trimmed.starts_with('{') {
        if let Some(end) = find_matching_brace(trimmed) {
            let candidate = &trimmed[..=end];
            if is_valid(candidate) {
                return JsonExtractionResult::Success(candidate.to_string());
            }
        }
    }

    if let Some(json) = extract_largest_object(trimmed) {
        return JsonExtractionResult::Success(json);
    }

    if let Some(start) = trimmed.find('{') {
        let unclosed = unclosed_braces(&trimmed[start..]);
        if unclosed > 0 {
            return JsonExtractionResult::Truncated {
                partial_json: trimmed[start..].to_string(),
                unclosed_braces: unclosed,
            };
        }
    }

    JsonExtractionResult::NotFound
}

fn is_valid(candidate: &str) -> bool {
    serde_json::from_str::<serde_json::Value>(candidate).is_ok()
}

/// Returns the index of the '}' closing the object that starts `s`.
///
/// String literals and escapes are skipped, so braces inside LaTeX strings
/// do not confuse the depth count.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

fn unclosed_braces(s: &str) -> usize {
    let mut depth: isize = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for c in s.chars() {
        if escape_next {
            escape_next = false;
            continue;
        }
        match c {
            '\\' if in_string => escape_next = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => depth -= 1,
            _ => {}
        }
    }

    depth.max(0) as usize
}

fn extract_from_code_block(content: &str, json_only: bool) -> Option<String> {
    let pattern = if json_only {
        r"```json\s*\n?([\s\S]*?)\n?```"
    } else {
        r"```(?:\w+)?\s*\n?([\s\S]*?)\n?```"
    };
    let re = Regex::new(pattern).ok()?;
    for caps in re.captures_iter(content) {
        let block = caps.get(1)?.as_str().trim();
        if let Some(start) = block.find('{') {
            if let Some(end) = find_matching_brace(&block[start..]) {
                return Some(block[start..=start + end].to_string());
            }
        }
    }
    None
}

/// The largest valid object, preferring later ones on ties.
fn extract_largest_object(content: &str) -> Option<String> {
    content
        .char_indices()
        .filter(|(_, c)| *c == '{')
        .filter_map(|(start, _)| {
            let end = find_matching_brace(&content[start..])?;
            let candidate = &content[start..=start + end];
            is_valid(candidate).then(|| (start, candidate))
        })
        .max_by(|(pos_a, a), (pos_b, b)| a.len().cmp(&b.len()).then(pos_a.cmp(pos_b)))
        .map(|(_, json)| json.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direct_object() {
        let result = try_extract_json_from_response(r#"{"sections": []}"#);
        assert_eq!(result.json(), Some(r#"{"sections": []}"#));
    }

    #[test]
    fn test_json_code_block_with_prose() {
        let content = "Here is the report:\n```json\n{\"a\": 1}\n```\nDone.";
        let result = try_extract_json_from_response(content);
        assert_eq!(result.json(), Some("{\"a\": 1}"));
    }

    #[test]
    fn test_generic_code_block() {
        let content = "```\n{\"a\": {\"b\": 2}}\n```";
        let result = try_extract_json_from_response(content);
        assert_eq!(result.json(), Some("{\"a\": {\"b\": 2}}"));
    }

    #[test]
    fn test_braces_inside_strings() {
        let content = r#"{"latex": "\\frac{a}{b} and a lone }"}"#;
        assert_eq!(find_matching_brace(content), Some(content.len() - 1));
        assert!(try_extract_json_from_response(content).is_success());
    }

    #[test]
    fn test_prefers_largest_object() {
        let content = r#"Example: {"x": 1}. Final: {"sections": [{"title": "A"}]}"#;
        let result = try_extract_json_from_response(content);
        assert_eq!(result.json(), Some(r#"{"sections": [{"title": "A"}]}"#));
    }

    #[test]
    fn test_truncated_object() {
        let content = r#"{"sections": [{"title": "A", "blocks": ["#;
        match try_extract_json_from_response(content) {
            JsonExtractionResult::Truncated {
                unclosed_braces, ..
            } => assert_eq!(unclosed_braces, 2),
            other => panic!("expected truncation, got {:?}", other),
        }
    }

    #[test]
    fn test_not_found() {
        assert_eq!(
            try_extract_json_from_response("I cannot help with that."),
            JsonExtractionResult::NotFound
        );
        assert_eq!(try_extract_json_from_response(""), JsonExtractionResult::NotFound);
    }
}
