//! Read-only traversals of a merged callchain tree.
//!
//! [`GraphIter`] walks the tree depth-first, heaviest child first, and
//! yields one [`GraphRow`] per displayed node. Children below the
//! `min_percent` threshold (or past `print_limit`) are folded into one
//! [`GraphRow::Remaining`] row at the end of their sibling group.
//!
//! ```text
//! depth 0  main                 100%
//! depth 1  ├─ parse              60%
//! depth 2  │  └─ lex             60%
//! depth 1  ├─ eval               39%
//! depth 1  └─ [remaining]         1%
//! ```
//!
//! The tree is never mutated, so a traversal can be restarted at any time.

// Thresholds and percentages are display arithmetic
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]

use crate::config::{CallchainMode, CallchainParam};
use crate::hist::stat::percent;

use super::tree::{CallchainNode, CallchainRoot, NodeFrame};

#[derive(Debug, Clone, Copy)]
pub enum GraphRow<'a> {
    Node {
        depth: usize,
        node: &'a CallchainNode,
        /// Cumulative hits of the node.
        hits: u64,
        percent: f64,
        is_last: bool,
    },
    /// Hits of the children that were not shown.
    Remaining {
        depth: usize,
        hits: u64,
        percent: f64,
    },
}

impl GraphRow<'_> {
    #[must_use]
    pub fn depth(&self) -> usize {
        match self {
            GraphRow::Node { depth, .. } | GraphRow::Remaining { depth, .. } => *depth,
        }
    }

    #[must_use]
    pub fn hits(&self) -> u64 {
        match self {
            GraphRow::Node { hits, .. } | GraphRow::Remaining { hits, .. } => *hits,
        }
    }

    /// True for the last row of a sibling group.
    #[must_use]
    pub fn is_last(&self) -> bool {
        match self {
            GraphRow::Node { is_last, .. } => *is_last,
            GraphRow::Remaining { .. } => true,
        }
    }
}

struct Level<'a> {
    node: &'a CallchainNode,
    depth: usize,
    /// Next child rank to look at.
    next: usize,
    emitted: usize,
    /// Children hits not yet shown.
    remaining: u64,
    remaining_done: bool,
    /// Denominator for percentages and the threshold.
    base: u64,
    min_hits: u64,
}

/// Lazy depth-first traversal of a callchain tree.
pub struct GraphIter<'a> {
    stack: Vec<Level<'a>>,
    relative: bool,
    min_percent: f64,
    print_limit: usize,
    total: u64,
}

impl<'a> GraphIter<'a> {
    /// `total` is the grand total used by absolute thresholds.
    #[must_use]
    pub fn new(root: &'a CallchainNode, param: &CallchainParam, total: u64) -> Self {
        let mut iter = Self {
            stack: Vec::new(),
            relative: param.mode != CallchainMode::GraphAbs,
            min_percent: param.min_percent,
            print_limit: param.print_limit,
            total,
        };
        let level = iter.level(root, 0);
        iter.stack.push(level);
        iter
    }

    fn level(&self, node: &'a CallchainNode, depth: usize) -> Level<'a> {
        let base = if self.relative {
            node.children_hit()
        } else {
            self.total
        };
        Level {
            node,
            depth,
            next: 0,
            emitted: 0,
            remaining: node.children_hit(),
            remaining_done: false,
            base,
            min_hits: (base as f64 * self.min_percent / 100.0).ceil() as u64,
        }
    }

    fn shown(&self, level: &Level<'a>, rank: usize) -> Option<&'a CallchainNode> {
        if self.print_limit != 0 && level.emitted >= self.print_limit {
            return None;
        }
        level
            .node
            .ranked_child(rank)
            .filter(|child| child.cumul_hit() > 0 && child.cumul_hit() >= level.min_hits)
    }
}

impl<'a> Iterator for GraphIter<'a> {
    type Item = GraphRow<'a>;

    fn next(&mut self) -> Option<GraphRow<'a>> {
        loop {
            let level = self.stack.last()?;
            if let Some(child) = self.shown(level, level.next) {
                let hits = child.cumul_hit();
                let (depth, base) = (level.depth, level.base);
                let level = self.stack.last_mut()?;
                level.next += 1;
                level.emitted += 1;
                level.remaining -= hits;
                let remaining = level.remaining;

                let level = self.stack.last()?;
                let more = self.shown(level, level.next).is_some() || remaining > 0;
                let row = GraphRow::Node {
                    depth,
                    node: child,
                    hits,
                    percent: percent(hits, base),
                    is_last: !more,
                };
                let below = self.level(child, depth + 1);
                self.stack.push(below);
                return Some(row);
            }

            let level = self.stack.last_mut()?;
            if level.remaining > 0 && !level.remaining_done {
                level.remaining_done = true;
                return Some(GraphRow::Remaining {
                    depth: level.depth,
                    hits: level.remaining,
                    percent: percent(level.remaining, level.base),
                });
            }
            self.stack.pop();
        }
    }
}

/// One root-to-node path with self hits.
#[derive(Debug, Clone)]
pub struct FlatPath<'a> {
    pub frames: Vec<&'a NodeFrame>,
    pub hits: u64,
}

impl CallchainRoot {
    /// Lazy graph traversal with the thresholds of `param`.
    #[must_use]
    pub fn graph(&self, param: &CallchainParam, total: u64) -> GraphIter<'_> {
        GraphIter::new(self.root(), param, total)
    }

    /// Every path that ends with self hits, heaviest first.
    #[must_use]
    pub fn flat_paths(&self) -> Vec<FlatPath<'_>> {
        fn walk<'a>(node: &'a CallchainNode, prefix: &mut Vec<&'a NodeFrame>, out: &mut Vec<FlatPath<'a>>) {
            let base = prefix.len();
            prefix.extend(node.frames());
            if node.self_hit() > 0 && !prefix.is_empty() {
                out.push(FlatPath {
                    frames: prefix.clone(),
                    hits: node.self_hit(),
                });
            }
            for child in node.children() {
                walk(child, prefix, out);
            }
            prefix.truncate(base);
        }

        let mut out = Vec::new();
        walk(self.root(), &mut Vec::new(), &mut out);
        out.sort_by(|a, b| b.hits.cmp(&a.hits));
        out
    }

    /// Collapsed-stack lines: `frame;frame;frame hits`.
    #[must_use]
    pub fn folded(&self) -> Vec<String> {
        self.flat_paths()
            .iter()
            .map(|path| {
                let names: Vec<String> = path.frames.iter().map(|f| f.name()).collect();
                format!("{} {}", names.join(";"), path.hits)
            })
            .collect()
    }
}
