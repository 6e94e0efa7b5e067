//! LaTeX rendering of an assembled document body.

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::{AssembledDocument, DocBlock};
use crate::extract::ExtractedTable;
use crate::latex::{escape_latex, single_line};
use crate::synth::BlockOrigin;

const MAX_REASON_CHARS: usize = 200;

/// Body lines rendered from one block (1-based, inclusive, body-relative).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineSpan {
    pub start: usize,
    pub end: usize,
    pub origin: Option<BlockOrigin>,
}

/// Body text plus the line range of every block.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedBody {
    pub text: String,
    pub spans: Vec<LineSpan>,
}

impl RenderedBody {
    pub fn line_count(&self) -> usize {
        self.text.lines().count()
    }
}

impl AssembledDocument {
    /// Renders the body. Image paths are written relative to `workspace`,
    /// the directory the source is compiled in.
    pub fn render_body(&self, tables: &[ExtractedTable], workspace: &Path) -> RenderedBody {
        let mut chunks = Vec::with_capacity(self.blocks.len());
        let mut spans = Vec::with_capacity(self.blocks.len());
        let mut line = 1;

        for block in &self.blocks {
            let chunk = render_block(block, tables, workspace);
            let count = chunk.lines().count().max(1);
            spans.push(LineSpan {
                start: line,
                end: line + count - 1,
                origin: block.origin(),
            });
            // One blank separator line between blocks.
            line += count + 1;
            chunks.push(chunk);
        }

        RenderedBody {
            text: chunks.join("\n\n"),
            spans,
        }
    }
}

fn render_block(block: &DocBlock, tables: &[ExtractedTable], workspace: &Path) -> String {
    match block {
        DocBlock::Heading { title, .. } => format!("\\section{{{}}}", single_line(title)),
        DocBlock::Prose { text, .. } => {
            let text = text.trim();
            if text.is_empty() {
                "%".to_string()
            } else {
                text.to_string()
            }
        }
        DocBlock::Equation { latex, .. } => {
            format!("\\begin{{equation}}\n{}\n\\end{{equation}}", strip_math_delimiters(latex))
        }
        DocBlock::Table { table, caption, .. } => match tables.iter().find(|t| t.index == *table) {
            Some(t) => render_table(t, caption),
            None => format!("% table {} is not available", table),
        },
        DocBlock::Figure { image, caption, .. } => {
            let mut out = String::from("\\begin{figure}[H]\n\\centering\n");
            out.push_str(&format!(
                "\\includegraphics[width=0.8\\textwidth]{{{}}}\n",
                graphics_path(image, workspace)
            ));
            if !caption.trim().is_empty() {
                out.push_str(&format!("\\caption{{{}}}\n", single_line(caption)));
            }
            out.push_str("\\end{figure}");
            out
        }
        DocBlock::FallbackNotice { reason, caption, .. } => {
            let label = if caption.trim().is_empty() {
                "Figure unavailable".to_string()
            } else {
                format!("Figure unavailable: {}", single_line(caption))
            };
            let reason: String = single_line(reason).chars().take(MAX_REASON_CHARS).collect();
            format!(
                "\\begin{{center}}\n\\fbox{{\\parbox{{0.8\\textwidth}}{{\\centering {}\\\\\n\\small {}}}}}\n\\end{{center}}",
                label,
                escape_latex(&reason)
            )
        }
        DocBlock::Placeholder { table, .. } => {
            format!("\\par\\vspace{{0.5em}}% no figure for table {}", table)
        }
    }
}

fn render_table(table: &ExtractedTable, caption: &str) -> String {
    let columns = table.column_count().max(1);
    let mut out = String::from("\\begin{table}[H]\n\\centering\n");
    if !caption.trim().is_empty() {
        out.push_str(&format!("\\caption{{{}}}\n", single_line(caption)));
    }
    out.push_str(&format!("\\begin{{tabular}}{{|{}}}\n\\hline\n", "c|".repeat(columns)));

    if let Some(header) = &table.header {
        out.push_str(&table_row(header.iter().map(String::as_str), columns));
        out.push_str("\\hline\n");
    }
    for row in &table.rows {
        let cells: Vec<String> = row.iter().map(|c| c.display()).collect();
        out.push_str(&table_row(cells.iter().map(String::as_str), columns));
    }

    out.push_str("\\hline\n\\end{tabular}\n\\end{table}");
    out
}

fn table_row<'a>(cells: impl Iterator<Item = &'a str>, columns: usize) -> String {
    let mut escaped: Vec<String> = cells.take(columns).map(escape_latex).collect();
    escaped.resize(columns, String::new());
    format!("{} \\\\\n", escaped.join(" & "))
}

fn strip_math_delimiters(latex: &str) -> &str {
    let s = latex.trim();
    for (open, close) in [("$$", "$$"), ("\\[", "\\]"), ("$", "$")] {
        if s.len() >= open.len() + close.len() && s.starts_with(open) && s.ends_with(close) {
            return s[open.len()..s.len() - close.len()].trim();
        }
    }
    s
}

fn graphics_path(image: &Path, workspace: &Path) -> String {
    let path = image.strip_prefix(workspace).unwrap_or(image);
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::Cell;
    use std::path::PathBuf;

    fn origin(section: usize, block: usize) -> BlockOrigin {
        BlockOrigin { section, block }
    }

    fn table() -> ExtractedTable {
        ExtractedTable {
            index: 0,
            source: "data.csv".into(),
            header: Some(vec!["I_A".into(), "U (V)".into()]),
            rows: vec![
                vec![Cell::Numeric(0.1), Cell::Numeric(1.5)],
                vec![Cell::Numeric(0.2)],
            ],
        }
    }

    #[test]
    fn test_spans_track_lines() {
        let doc = AssembledDocument {
            blocks: vec![
                DocBlock::Heading {
                    section: 0,
                    title: "Intro".into(),
                },
                DocBlock::Prose {
                    origin: origin(0, 0),
                    text: "Line one.\nLine two.".into(),
                },
                DocBlock::Equation {
                    origin: origin(0, 1),
                    latex: "$$V = IR$$".into(),
                },
            ],
        };
        let body = doc.render_body(&[], Path::new("/w"));
        let lines: Vec<&str> = body.text.lines().collect();

        assert_eq!(body.spans[0], LineSpan { start: 1, end: 1, origin: None });
        assert_eq!(body.spans[1].start, 3);
        assert_eq!(body.spans[1].end, 4);
        assert_eq!(lines[2], "Line one.");
        assert_eq!(body.spans[2].start, 6);
        assert_eq!(lines[6], "V = IR");
        assert_eq!(body.spans[2].end, body.line_count());
    }

    #[test]
    fn test_table_cells_escaped_and_padded() {
        let doc = AssembledDocument {
            blocks: vec![DocBlock::Table {
                origin: origin(0, 0),
                table: 0,
                caption: "Readings".into(),
            }],
        };
        let text = doc.render_body(&[table()], Path::new("/w")).text;
        assert!(text.contains("\\begin{tabular}{|c|c|}"));
        assert!(text.contains("I\\_A & U (V) \\\\"));
        assert!(text.contains("0.2 &  \\\\"));
        assert!(text.contains("\\caption{Readings}"));
    }

    #[test]
    fn test_figure_path_relative_to_workspace() {
        let doc = AssembledDocument {
            blocks: vec![DocBlock::Figure {
                origin: origin(1, 0),
                figure_id: "fig1".into(),
                image: PathBuf::from("/w/task/Fig/fig1/plot.png"),
                caption: "U-I curve".into(),
            }],
        };
        let text = doc.render_body(&[], Path::new("/w/task")).text;
        assert!(text.contains("\\includegraphics[width=0.8\\textwidth]{Fig/fig1/plot.png}"));
    }

    #[test]
    fn test_fallback_notice_escapes_reason() {
        let doc = AssembledDocument {
            blocks: vec![DocBlock::FallbackNotice {
                origin: origin(0, 2),
                figure_id: "fig1".into(),
                reason: "import of 'os' is not allowed; 100% blocked".into(),
                caption: "Plot".into(),
            }],
        };
        let text = doc.render_body(&[], Path::new("/w")).text;
        assert!(text.contains("Figure unavailable: Plot"));
        assert!(text.contains("100\\% blocked"));
    }
}
