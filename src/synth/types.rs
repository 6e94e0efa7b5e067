//! Typed report content produced by the synthesizer.

use serde::{Deserialize, Serialize};

/// One section of the report body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSection {
    pub title: String,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

/// A content block inside a section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    /// LaTeX-ready paragraph text.
    Prose { text: String },
    /// Display equation body (no surrounding environment).
    Equation { latex: String },
    /// Placement of an extracted data table.
    TableRef {
        table: usize,
        #[serde(default)]
        caption: String,
        /// Figure that belongs under this table, when not implied.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        figure: Option<String>,
    },
    /// A plot to render from one or more tables.
    FigureRequest(FigureRequest),
}

/// A plotting script and what it consumes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FigureRequest {
    /// Stable identifier; also the figure's working directory name.
    pub id: String,
    /// Indices of the tables the script reads.
    #[serde(default)]
    pub tables: Vec<usize>,
    /// Python source; it reads `TABLES` and saves exactly one image.
    pub script: String,
    #[serde(default)]
    pub caption: String,
}

/// Position of a block in the synthesized report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BlockOrigin {
    pub section: usize,
    pub block: usize,
}

impl std::fmt::Display for BlockOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "section {} block {}", self.section + 1, self.block + 1)
    }
}

/// Every figure request in document order, with its position.
pub fn figure_requests(sections: &[ReportSection]) -> Vec<(BlockOrigin, &FigureRequest)> {
    let mut out = Vec::new();
    for (s, section) in sections.iter().enumerate() {
        for (b, block) in section.blocks.iter().enumerate() {
            if let Block::FigureRequest(request) = block {
                out.push((BlockOrigin { section: s, block: b }, request));
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_wire_format() {
        let json = r#"[
            {"type": "prose", "text": "Intro."},
            {"type": "equation", "latex": "V = IR"},
            {"type": "table_ref", "table": 0, "caption": "Readings"},
            {"type": "figure_request", "id": "fig1", "tables": [0],
             "script": "plt.plot([1],[2])", "caption": "V vs I"}
        ]"#;
        let blocks: Vec<Block> = serde_json::from_str(json).unwrap();
        assert_eq!(blocks.len(), 4);
        assert_eq!(
            blocks[2],
            Block::TableRef {
                table: 0,
                caption: "Readings".into(),
                figure: None
            }
        );
        match &blocks[3] {
            Block::FigureRequest(req) => {
                assert_eq!(req.id, "fig1");
                assert_eq!(req.tables, vec![0]);
            }
            other => panic!("unexpected block {:?}", other),
        }
    }

    #[test]
    fn test_figure_requests_in_order() {
        let fig = |id: &str| {
            Block::FigureRequest(FigureRequest {
                id: id.into(),
                tables: vec![],
                script: "pass".into(),
                caption: String::new(),
            })
        };
        let sections = vec![
            ReportSection {
                title: "A".into(),
                blocks: vec![Block::Prose { text: "x".into() }, fig("a")],
            },
            ReportSection {
                title: "B".into(),
                blocks: vec![fig("b")],
            },
        ];
        let found = figure_requests(&sections);
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].0, BlockOrigin { section: 0, block: 1 });
        assert_eq!(found[1].1.id, "b");
        assert_eq!(found[1].0.to_string(), "section 2 block 1");
    }
}
