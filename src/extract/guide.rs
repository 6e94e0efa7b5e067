//! Instruction-guide text handling: truncation and heading-based splitting.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Well-known parts of an experiment guide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuideSection {
    Purpose,
    Equipment,
    Principle,
    Steps,
    Notes,
}

impl GuideSection {
    pub fn label(&self) -> &'static str {
        match self {
            GuideSection::Purpose => "Purpose",
            GuideSection::Equipment => "Equipment",
            GuideSection::Principle => "Principle",
            GuideSection::Steps => "Procedure",
            GuideSection::Notes => "Notes",
        }
    }

    fn from_heading(word: &str) -> Option<Self> {
        let lower = word.to_lowercase();
        let section = match lower.as_str() {
            "purpose" | "objective" | "objectives" | "aim" | "实验目的" => GuideSection::Purpose,
            "equipment" | "apparatus" | "materials" | "实验器材" | "实验仪器" => {
                GuideSection::Equipment
            }
            "principle" | "theory" | "background" | "实验原理" => GuideSection::Principle,
            "procedure" | "steps" | "method" | "实验步骤" | "实验内容" => GuideSection::Steps,
            "notes" | "precautions" | "safety" | "注意事项" => GuideSection::Notes,
            _ => return None,
        };
        Some(section)
    }
}

fn heading_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)^\s*(?:\d+[.)、]?\s*|[一二三四五六七八九十]+[、.]\s*)?(purpose|objectives?|aim|equipment|apparatus|materials|principle|theory|background|procedure|steps|method|notes|precautions|safety|实验目的|实验器材|实验仪器|实验原理|实验步骤|实验内容|注意事项)\s*[:：]?\s*$",
        )
        .ok()
    })
    .as_ref()
}

/// Truncates `text` to at most `limit` characters, on a char boundary.
pub fn truncate_chars(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Splits guide text into recognised parts.
///
/// Text before the first recognised heading is dropped; a heading that
/// appears twice has its bodies concatenated.
pub fn split_guide(text: &str) -> Vec<(GuideSection, String)> {
    let Some(re) = heading_regex() else {
        return Vec::new();
    };
    let mut parts: Vec<(GuideSection, String)> = Vec::new();
    let mut current: Option<usize> = None;

    for line in text.lines() {
        if let Some(caps) = re.captures(line) {
            if let Some(section) = caps.get(1).and_then(|m| GuideSection::from_heading(m.as_str()))
            {
                let idx = match parts.iter().position(|(s, _)| *s == section) {
                    Some(idx) => idx,
                    None => {
                        parts.push((section, String::new()));
                        parts.len() - 1
                    }
                };
                current = Some(idx);
                continue;
            }
        }
        if let Some(idx) = current {
            let body = &mut parts[idx].1;
            if !body.is_empty() {
                body.push('\n');
            }
            body.push_str(line);
        }
    }

    for (_, body) in parts.iter_mut() {
        *body = body.trim().to_string();
    }
    parts.retain(|(_, body)| !body.is_empty());
    parts
}
