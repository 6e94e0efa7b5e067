//! Prompt construction for report synthesis.
//!
//! The model is asked for one JSON document describing typed report
//! sections. Corrective and modification rounds include the previous
//! sections and the feedback that triggered the round.

use serde::{Deserialize, Serialize};

use super::types::ReportSection;
use crate::compile::CompilerLog;
use crate::extract::{ExtractedTable, GuideSection};
use crate::llm::Message;
use crate::metadata::ReportMetadata;

/// Longest slice of previous sections sent back as context.
const MAX_PREVIOUS_CHARS: usize = 15_000;

/// What a regeneration round should respond to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Feedback {
    /// A content-fixable compiler failure.
    CompilerLog(CompilerLog),
    /// A user's modification request.
    Modification { text: String },
}

impl Feedback {
    fn render(&self) -> String {
        match self {
            Feedback::CompilerLog(log) => log.to_feedback(),
            Feedback::Modification { text } => format!(
                "The user asked for these changes to the previous report:\n{}\n",
                text.trim()
            ),
        }
    }
}

/// Everything a synthesis round is built from.
#[derive(Debug, Clone, Copy)]
pub struct PromptInput<'a> {
    pub metadata: &'a ReportMetadata,
    pub guide_text: &'a str,
    pub guide_parts: &'a [(GuideSection, String)],
    pub tables: &'a [ExtractedTable],
    pub previous: Option<&'a [ReportSection]>,
    pub feedback: Option<&'a Feedback>,
}

/// System prompt for report synthesis.
pub const SYNTHESIS_SYSTEM_PROMPT: &str = r#"You are an assistant that writes university physics laboratory reports.

## OUTPUT FORMAT

Return exactly one JSON object and nothing else:

{
  "sections": [
    {
      "title": "Section title",
      "blocks": [
        {"type": "prose", "text": "LaTeX paragraph text"},
        {"type": "equation", "latex": "U = IR"},
        {"type": "table_ref", "table": 0, "caption": "Measured values", "figure": "fig_ui"},
        {"type": "figure_request", "id": "fig_ui", "tables": [0],
         "caption": "U-I characteristic", "script": "python code"}
      ]
    }
  ]
}

## SECTIONS

Write these sections in order: Purpose, Equipment, Principle, Procedure,
Results and Data Processing, Questions, Summary. Place every data table in
Results and Data Processing with a table_ref block. Tables are numbered from 0
in the order they are listed below; never reference a table that is not listed.

## LATEX RULES

- prose text is LaTeX for XeLaTeX. Escape &, %, $, #, _ outside math.
- Use inline math \( ... \) in prose. Put display equations in equation blocks,
  without \begin{equation} or $$ delimiters.
- Do not write tables or figures in prose; use table_ref and figure_request.
- Use only standard packages: amsmath, amssymb, graphicx, float.

## PLOTTING RULES

- A figure_request script is Python. matplotlib.pyplot is already imported as plt.
- The tables are available as TABLES, a list of objects with "header" (list of
  strings or null) and "rows" (list of lists of numbers or strings).
- Allowed imports: numpy, matplotlib, scipy, math, statistics and the standard
  data modules. No file access besides saving the figure, no network, no
  subprocesses, no eval or exec.
- Save exactly one image with plt.savefig("figure.png", dpi=200).
- Each figure id is unique, uses letters, digits, '-' or '_', and the figure
  belongs under the table_ref that names it (or the first table it reads).
"#;

/// Builds the chat messages for one synthesis round.
pub fn build_messages(input: &PromptInput<'_>) -> Vec<Message> {
    vec![
        Message::system(SYNTHESIS_SYSTEM_PROMPT),
        Message::user(build_user_prompt(input)),
    ]
}

fn build_user_prompt(input: &PromptInput<'_>) -> String {
    let mut prompt = String::new();

    prompt.push_str("## Report information\n");
    prompt.push_str(&input.metadata.describe());
    prompt.push_str("\n\n## Experiment guide\n");
    if input.guide_parts.is_empty() {
        if input.guide_text.trim().is_empty() {
            prompt.push_str("(no guide provided)\n");
        } else {
            prompt.push_str(input.guide_text.trim());
            prompt.push('\n');
        }
    } else {
        for (section, text) in input.guide_parts {
            prompt.push_str(&format!("### {}\n{}\n", section.label(), text.trim()));
        }
    }

    prompt.push_str("\n## Data tables\n");
    for table in input.tables {
        prompt.push_str(&table.to_prompt_text());
        prompt.push('\n');
    }

    if let Some(previous) = input.previous {
        let json = serde_json::to_string_pretty(&serde_json::json!({ "sections": previous }))
            .unwrap_or_default();
        prompt.push_str("\n## Previous report\n");
        prompt.push_str(&truncate_tail(&json, MAX_PREVIOUS_CHARS));
        prompt.push('\n');
    }

    if let Some(feedback) = input.feedback {
        prompt.push_str("\n## Required changes\n");
        prompt.push_str(&feedback.render());
        prompt.push_str("\nReturn the complete corrected report in the same JSON format.\n");
    }

    prompt
}

fn truncate_tail(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push_str("\n... (truncated)");
    out
}
