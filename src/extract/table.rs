//! Table detection over extracted plain text.
//!
//! A table is a maximal run of consecutive non-blank lines that split into
//! the same number of cells (at least two), spanning at least two lines,
//! with at least one numeric cell.

use serde::{Deserialize, Serialize};

/// Minimum number of cells per row.
const MIN_COLUMNS: usize = 2;
/// Minimum number of rows (including a header).
const MIN_ROWS: usize = 2;

/// A single table cell with its inferred type.
///
/// Serialized untagged: a number, a string, or `null` for a blank reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Numeric(f64),
    Text(String),
    Empty,
}

impl Cell {
    /// Infers the cell type from raw text.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Cell::Empty;
        }
        match parse_number(trimmed) {
            Some(value) => Cell::Numeric(value),
            None => Cell::Text(trimmed.to_string()),
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Cell::Numeric(_))
    }

    /// Text as it should appear in a rendered table.
    pub fn display(&self) -> String {
        match self {
            Cell::Numeric(v) => format_number(*v),
            Cell::Text(s) => s.clone(),
            Cell::Empty => String::new(),
        }
    }
}

/// A table recovered from a data sheet. Rows keep the source reading order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedTable {
    /// Position of this table among all tables extracted for a task.
    pub index: usize,
    /// Name of the file the table came from.
    pub source: String,
    /// Column labels, when the first row is all text above numeric rows.
    pub header: Option<Vec<String>>,
    pub rows: Vec<Vec<Cell>>,
}

impl ExtractedTable {
    pub fn column_count(&self) -> usize {
        self.header
            .as_ref()
            .map(|h| h.len())
            .or_else(|| self.rows.first().map(|r| r.len()))
            .unwrap_or(0)
    }

    /// Plain-text rendering used in prompts.
    pub fn to_prompt_text(&self) -> String {
        let mut out = format!(
            "Table {} (from {}, {} rows x {} columns)\n",
            self.index,
            self.source,
            self.rows.len(),
            self.column_count()
        );
        if let Some(header) = &self.header {
            out.push_str(&header.join(" | "));
            out.push('\n');
        }
        for row in &self.rows {
            let cells: Vec<String> = row.iter().map(Cell::display).collect();
            out.push_str(&cells.join(" | "));
            out.push('\n');
        }
        out
    }
}

/// Finds every table in `text`, in reading order.
///
/// Returned tables carry `index` 0.. relative to this text; callers
/// renumber when merging several sources.
pub fn detect_tables(text: &str, source: &str) -> Vec<ExtractedTable> {
    let mut tables = Vec::new();
    let mut run: Vec<Vec<String>> = Vec::new();

    for line in text.lines() {
        let cells = split_cells(line);
        let continues = !run.is_empty() && cells.len() == run[0].len();
        if cells.len() >= MIN_COLUMNS && continues {
            run.push(cells);
            continue;
        }
        flush_run(&mut run, source, &mut tables);
        if cells.len() >= MIN_COLUMNS {
            run.push(cells);
        }
    }
    flush_run(&mut run, source, &mut tables);

    tables
}

fn flush_run(run: &mut Vec<Vec<String>>, source: &str, tables: &mut Vec<ExtractedTable>) {
    let rows = std::mem::take(run);
    if rows.len() < MIN_ROWS {
        return;
    }

    let parsed: Vec<Vec<Cell>> = rows
        .iter()
        .map(|r| r.iter().map(|c| Cell::parse(c)).collect())
        .collect();

    if !parsed.iter().flatten().any(Cell::is_numeric) {
        return;
    }

    let first_is_header = parsed[0].iter().all(|c| !c.is_numeric())
        && parsed[1..].iter().flatten().any(Cell::is_numeric);

    let (header, body) = if first_is_header {
        let header = rows[0].iter().map(|c| c.trim().to_string()).collect();
        (Some(header), parsed[1..].to_vec())
    } else {
        (None, parsed)
    };

    tables.push(ExtractedTable {
        index: tables.len(),
        source: source.to_string(),
        header,
        rows: body,
    });
}

/// Splits a line into cells using the strongest delimiter present.
///
/// Explicit delimiters (tab, pipe, comma) keep blank cells so a missing
/// reading does not shift or end the row. Only whitespace runs collapse.
/// A line made of delimiters alone yields no cells.
fn split_cells(line: &str) -> Vec<String> {
    let trimmed = line.trim_matches(|c: char| c.is_whitespace() && c != '\t');
    if trimmed.trim().is_empty() {
        return Vec::new();
    }

    let cells: Vec<String> = if trimmed.contains('\t') {
        trimmed.split('\t').map(|c| c.trim().to_string()).collect()
    } else if trimmed.contains('|') {
        let inner = trimmed.strip_prefix('|').unwrap_or(trimmed);
        let inner = inner.strip_suffix('|').unwrap_or(inner);
        inner.split('|').map(|c| c.trim().to_string()).collect()
    } else if trimmed.contains(',') {
        trimmed.split(',').map(|c| c.trim().to_string()).collect()
    } else {
        return trimmed.split_whitespace().map(str::to_string).collect();
    };

    if cells.iter().all(|c| c.is_empty()) {
        return Vec::new();
    }
    cells
}

fn parse_number(raw: &str) -> Option<f64> {
    let normalized = raw.replace('\u{2212}', "-");
    let first = normalized.chars().next()?;
    if !(first.is_ascii_digit() || matches!(first, '-' | '+' | '.')) {
        return None;
    }
    normalized.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_parse() {
        assert_eq!(Cell::parse(" 3.5 "), Cell::Numeric(3.5));
        assert_eq!(Cell::parse("\u{2212}2"), Cell::Numeric(-2.0));
        assert_eq!(Cell::parse("1e3"), Cell::Numeric(1000.0));
        assert_eq!(Cell::parse("nan"), Cell::Text("nan".into()));
        assert_eq!(Cell::parse("V (volts)"), Cell::Text("V (volts)".into()));
    }

    #[test]
    fn test_detect_csv_with_header() {
        let text = "time,voltage\n0,1.0\n1,2.0\n2,3.1\n";
        let tables = detect_tables(text, "data.csv");
        assert_eq!(tables.len(), 1);
        let table = &tables[0];
        assert_eq!(table.index, 0);
        assert_eq!(
            table.header,
            Some(vec!["time".to_string(), "voltage".to_string()])
        );
        assert_eq!(table.rows.len(), 3);
        assert_eq!(table.rows[2][1], Cell::Numeric(3.1));
    }

    #[test]
    fn test_detect_whitespace_table_in_prose() {
        let text = "Measurements taken on Monday.\n\n\
                    1 0.52 12\n\
                    2 0.61 14\n\
                    3 0.70 15\n\n\
                    The end.";
        let tables = detect_tables(text, "scan.png");
        assert_eq!(tables.len(), 1);
        assert!(tables[0].header.is_none());
        assert_eq!(tables[0].rows.len(), 3);
        assert_eq!(tables[0].column_count(), 3);
    }

    #[test]
    fn test_column_change_splits_tables() {
        let text = "a|b\n1|2\n3|4\nx|y|z\n5|6|7\n";
        let tables = detect_tables(text, "t.txt");
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].index, 0);
        assert_eq!(tables[1].index, 1);
        assert_eq!(tables[1].column_count(), 3);
    }

    #[test]
    fn test_no_numeric_cells_is_not_a_table() {
        let text = "name,colour\napple,red\npear,green\n";
        assert!(detect_tables(text, "t.csv").is_empty());
    }

    #[test]
    fn test_single_line_is_not_a_table() {
        assert!(detect_tables("1,2,3\n", "t.csv").is_empty());
        assert!(detect_tables("", "t.csv").is_empty());
    }

    #[test]
    fn test_blank_reading_keeps_row() {
        let text = "U,I,R\n1.0,2.0,0.5\n2.0,,1.0\n3.0,6.0,0.5\n";
        let tables = detect_tables(text, "ohm.csv");
        assert_eq!(tables.len(), 1);
        let table = &tables[0];
        assert_eq!(table.rows.len(), 3);
        assert_eq!(
            table.rows[1],
            vec![Cell::Numeric(2.0), Cell::Empty, Cell::Numeric(1.0)]
        );
        assert_eq!(table.rows[2][1], Cell::Numeric(6.0));
    }

    #[test]
    fn test_blank_cells_with_tabs_and_pipes() {
        let tables = detect_tables("t\tx\ty\n0\t\t1\n1\t2\t3\n", "d.tsv");
        assert_eq!(tables[0].rows.len(), 2);
        assert_eq!(tables[0].rows[0][1], Cell::Empty);

        let tables = detect_tables("| a | b |\n| 1 |   |\n| 2 | 3 |\n", "d.md");
        assert_eq!(tables[0].rows.len(), 2);
        assert_eq!(tables[0].rows[0], vec![Cell::Numeric(1.0), Cell::Empty]);
    }

    #[test]
    fn test_delimiter_only_line_ends_table() {
        let tables = detect_tables("1,2\n3,4\n,\n5,6\n7,8\n", "t.csv");
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[1].rows[0][0], Cell::Numeric(5.0));
    }

    #[test]
    fn test_empty_cell_serializes_as_null() {
        let json = serde_json::to_string(&vec![Cell::Numeric(1.5), Cell::Empty]).unwrap();
        assert_eq!(json, "[1.5,null]");
        let back: Vec<Cell> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[1], Cell::Empty);
    }

    #[test]
    fn test_prompt_text() {
        let tables = detect_tables("x\ty\n1\t2\n", "d.tsv");
        let text = tables[0].to_prompt_text();
        assert!(text.starts_with("Table 0 (from d.tsv, 1 rows x 2 columns)"));
        assert!(text.contains("x | y"));
        assert!(text.contains("1 | 2"));
    }
}
