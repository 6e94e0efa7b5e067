//! Merging of synthesized sections and figure artifacts into one document.
//!
//! Every table block in an [`AssembledDocument`] is immediately followed by
//! its figure, a fallback notice for a failed figure, or a neutral
//! placeholder when no figure is available for it.

mod render;

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::figure::{FigureArtifact, FigureOutcome};
use crate::synth::{figure_requests, Block, BlockOrigin, FigureRequest, ReportSection};

pub use render::{LineSpan, RenderedBody};

/// One block of the assembled body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DocBlock {
    Heading {
        section: usize,
        title: String,
    },
    Prose {
        origin: BlockOrigin,
        text: String,
    },
    Equation {
        origin: BlockOrigin,
        latex: String,
    },
    Table {
        origin: BlockOrigin,
        table: usize,
        caption: String,
    },
    Figure {
        origin: BlockOrigin,
        figure_id: String,
        image: PathBuf,
        caption: String,
    },
    FallbackNotice {
        origin: BlockOrigin,
        figure_id: String,
        reason: String,
        caption: String,
    },
    Placeholder {
        origin: BlockOrigin,
        table: usize,
    },
}

impl DocBlock {
    /// Block of the synthesized report this block came from.
    pub fn origin(&self) -> Option<BlockOrigin> {
        match self {
            DocBlock::Heading { .. } => None,
            DocBlock::Prose { origin, .. }
            | DocBlock::Equation { origin, .. }
            | DocBlock::Table { origin, .. }
            | DocBlock::Figure { origin, .. }
            | DocBlock::FallbackNotice { origin, .. }
            | DocBlock::Placeholder { origin, .. } => Some(*origin),
        }
    }

    /// Whether this block may directly follow a table.
    pub fn completes_table(&self) -> bool {
        matches!(
            self,
            DocBlock::Figure { .. } | DocBlock::FallbackNotice { .. } | DocBlock::Placeholder { .. }
        )
    }
}

/// Ordered document body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledDocument {
    pub blocks: Vec<DocBlock>,
}

impl AssembledDocument {
    pub fn figure_count(&self) -> usize {
        self.count(|b| matches!(b, DocBlock::Figure { .. }))
    }

    pub fn fallback_count(&self) -> usize {
        self.count(|b| matches!(b, DocBlock::FallbackNotice { .. }))
    }

    pub fn placeholder_count(&self) -> usize {
        self.count(|b| matches!(b, DocBlock::Placeholder { .. }))
    }

    fn count(&self, pred: impl Fn(&DocBlock) -> bool) -> usize {
        self.blocks.iter().filter(|b| pred(*b)).count()
    }

    /// Image paths of all placed figures, in document order.
    pub fn images(&self) -> Vec<&PathBuf> {
        self.blocks
            .iter()
            .filter_map(|b| match b {
                DocBlock::Figure { image, .. } => Some(image),
                _ => None,
            })
            .collect()
    }

    /// Verifies that every table is immediately followed by the block it
    /// resolves to: its own figure, that figure's fallback notice, or a
    /// placeholder when no artifact is available for it.
    pub fn check_adjacency(
        &self,
        sections: &[ReportSection],
        artifacts: &BTreeMap<String, FigureArtifact>,
    ) -> Result<(), String> {
        let requests = figure_requests(sections);
        let claimant = claimants(sections, &requests);

        for (i, block) in self.blocks.iter().enumerate() {
            let DocBlock::Table { origin, table, .. } = block else {
                continue;
            };
            let explicit = match sections
                .get(origin.section)
                .and_then(|s| s.blocks.get(origin.block))
            {
                Some(Block::TableRef { figure, .. }) => figure.as_deref(),
                _ => return Err(format!("table {} at position {} has no source block", table, i)),
            };
            let expected = resolve_figure(*table, explicit, &requests)
                .filter(|id| claimant.get(id) == Some(origin));
            let outcome = expected.and_then(|id| artifacts.get(id)).map(|a| &a.outcome);

            let next = self.blocks.get(i + 1);
            let matches = match (next, expected, outcome) {
                (Some(DocBlock::Figure { figure_id, origin: o, .. }), Some(id), Some(FigureOutcome::Image { .. })) => {
                    figure_id == id && o == origin
                }
                (Some(DocBlock::FallbackNotice { figure_id, origin: o, .. }), Some(id), Some(FigureOutcome::Failed { .. })) => {
                    figure_id == id && o == origin
                }
                (Some(DocBlock::Placeholder { table: t, origin: o }), _, None) => t == table && o == origin,
                _ => false,
            };
            if !matches {
                return Err(format!(
                    "table {} at position {} is not followed by {}",
                    table,
                    i,
                    expected
                        .map(|id| format!("figure '{}'", id))
                        .unwrap_or_else(|| "a placeholder".to_string())
                ));
            }
        }
        Ok(())
    }
}

/// First table reference resolving to each figure.
fn claimants<'a>(
    sections: &'a [ReportSection],
    requests: &[(BlockOrigin, &'a FigureRequest)],
) -> HashMap<&'a str, BlockOrigin> {
    let mut claimant = HashMap::new();
    for (s, section) in sections.iter().enumerate() {
        for (b, block) in section.blocks.iter().enumerate() {
            if let Block::TableRef { table, figure, .. } = block {
                if let Some(id) = resolve_figure(*table, figure.as_deref(), requests) {
                    claimant
                        .entry(id)
                        .or_insert(BlockOrigin { section: s, block: b });
                }
            }
        }
    }
    claimant
}

/// Figure id a table reference resolves to: the explicit id, otherwise the
/// first figure request in document order that consumes the table.
fn resolve_figure<'a>(
    table: usize,
    explicit: Option<&'a str>,
    requests: &[(BlockOrigin, &'a FigureRequest)],
) -> Option<&'a str> {
    if let Some(id) = explicit {
        return requests
            .iter()
            .find(|(_, r)| r.id == id)
            .map(|&(_, r)| r.id.as_str());
    }
    requests
        .iter()
        .find(|(_, r)| r.tables.contains(&table))
        .map(|&(_, r)| r.id.as_str())
}

fn figure_block(
    origin: BlockOrigin,
    request: &FigureRequest,
    artifact: Option<&FigureArtifact>,
) -> Option<DocBlock> {
    match artifact.map(|a| &a.outcome) {
        Some(FigureOutcome::Image { path }) => Some(DocBlock::Figure {
            origin,
            figure_id: request.id.clone(),
            image: path.clone(),
            caption: request.caption.clone(),
        }),
        Some(FigureOutcome::Failed { reason }) => Some(DocBlock::FallbackNotice {
            origin,
            figure_id: request.id.clone(),
            reason: reason.clone(),
            caption: request.caption.clone(),
        }),
        None => None,
    }
}

/// Builds the document body. Pure: the same inputs always give the same output.
pub fn assemble(
    sections: &[ReportSection],
    artifacts: &BTreeMap<String, FigureArtifact>,
) -> AssembledDocument {
    let requests = figure_requests(sections);
    let claimant = claimants(sections, &requests);

    let mut blocks = Vec::new();
    for (s, section) in sections.iter().enumerate() {
        blocks.push(DocBlock::Heading {
            section: s,
            title: section.title.clone(),
        });

        for (b, block) in section.blocks.iter().enumerate() {
            let origin = BlockOrigin { section: s, block: b };
            match block {
                Block::Prose { text } => blocks.push(DocBlock::Prose {
                    origin,
                    text: text.clone(),
                }),
                Block::Equation { latex } => blocks.push(DocBlock::Equation {
                    origin,
                    latex: latex.clone(),
                }),
                Block::TableRef {
                    table,
                    caption,
                    figure,
                } => {
                    blocks.push(DocBlock::Table {
                        origin,
                        table: *table,
                        caption: caption.clone(),
                    });

                    let placed = resolve_figure(*table, figure.as_deref(), &requests)
                        .filter(|id| claimant.get(id) == Some(&origin))
                        .and_then(|id| requests.iter().find(|(_, r)| r.id == id))
                        .and_then(|(_, request)| {
                            figure_block(origin, request, artifacts.get(&request.id))
                        });

                    blocks.push(placed.unwrap_or(DocBlock::Placeholder {
                        origin,
                        table: *table,
                    }));
                }
                Block::FigureRequest(request) => {
                    if claimant.contains_key(request.id.as_str()) {
                        continue;
                    }
                    match figure_block(origin, request, artifacts.get(&request.id)) {
                        Some(block) => blocks.push(block),
                        None => {
                            tracing::debug!(figure_id = %request.id, "Unplaced figure has no artifact")
                        }
                    }
                }
            }
        }
    }

    AssembledDocument { blocks }
}
