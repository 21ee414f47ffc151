//! Merged callchain tree.
//!
//! Each node holds a straight run of frames shared by every chain passing
//! through it. A chain that diverges in the middle of a run splits the node
//! in two. Children are found through a hash of their first frame with an
//! equality check on the collision list, and kept ranked by cumulative hits
//! so the heaviest path is always first.
//!
//! ```text
//! main ─ run ─┬─ parse ─ lex      (60)
//!             └─ eval             (40)
//! ```

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::config::{CallchainKey, DecayParam};
use crate::domain::{try_grow, HistError};
use crate::machine::AddrLocation;

use super::cursor::{CallchainCursor, ChainFrame};

// =============================================================================
// NODE FRAMES
// =============================================================================

/// One frame of a node, with counters merged from every chain through it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeFrame {
    pub ip: u64,
    pub location: AddrLocation,
    pub branch_count: u64,
    pub predicted_count: u64,
    pub abort_count: u64,
    pub cycles_count: u64,
    pub iter_count: u64,
    pub iter_cycles: u64,
}

impl From<&ChainFrame> for NodeFrame {
    fn from(frame: &ChainFrame) -> Self {
        let mut node = Self {
            ip: frame.ip,
            location: frame.location.clone(),
            branch_count: 0,
            predicted_count: 0,
            abort_count: 0,
            cycles_count: 0,
            iter_count: frame.iterations.count,
            iter_cycles: frame.iterations.cycles,
        };
        if let Some(flags) = frame.branch {
            node.branch_count = 1;
            node.predicted_count = u64::from(flags.predicted);
            node.abort_count = u64::from(flags.abort);
            node.cycles_count = u64::from(flags.cycles);
        }
        node
    }
}

impl NodeFrame {
    fn absorb(&mut self, other: &NodeFrame) {
        self.branch_count += other.branch_count;
        self.predicted_count += other.predicted_count;
        self.abort_count += other.abort_count;
        self.cycles_count += other.cycles_count;
        self.iter_count += other.iter_count;
        self.iter_cycles += other.iter_cycles;
    }

    fn matches(&self, other: &NodeFrame, key: CallchainKey) -> bool {
        match key {
            CallchainKey::Address => self.ip == other.ip,
            CallchainKey::Function => match (&self.location.symbol, &other.location.symbol) {
                (Some(a), Some(b)) => {
                    a.start == b.start
                        && a.name == b.name
                        && self.location.dso().map(|d| &d.name)
                            == other.location.dso().map(|d| &d.name)
                }
                (None, None) => self.ip == other.ip,
                _ => false,
            },
        }
    }

    fn match_hash(&self, key: CallchainKey) -> u64 {
        let mut hasher = DefaultHasher::new();
        match (&self.location.symbol, key) {
            (Some(sym), CallchainKey::Function) => {
                sym.start.hash(&mut hasher);
                self.location.dso().map(|d| &d.name).hash(&mut hasher);
            }
            _ => self.ip.hash(&mut hasher),
        }
        hasher.finish()
    }

    /// Demangled function name or hex address.
    #[must_use]
    pub fn name(&self) -> String {
        self.location.display_name()
    }
}

// =============================================================================
// TREE NODES
// =============================================================================

/// A chain (or chain suffix) being added to a subtree.
struct Insertion<'a> {
    path: &'a [NodeFrame],
    /// Frames before this index already had their counters absorbed.
    skip: usize,
    hit: u64,
    count: u64,
    key: CallchainKey,
}

#[derive(Debug, Clone, Default)]
pub struct CallchainNode {
    frames: Vec<NodeFrame>,
    hit: u64,
    count: u64,
    children_hit: u64,
    children_count: u64,
    /// Insertion order; indices are stable.
    children: Vec<CallchainNode>,
    /// First-frame hash → child indices.
    by_key: HashMap<u64, Vec<usize>>,
    /// Child indices by descending cumulative hits.
    ranked: Vec<usize>,
    /// This node's position in its parent's `ranked`.
    rank: usize,
}

impl CallchainNode {
    #[must_use]
    pub fn frames(&self) -> &[NodeFrame] {
        &self.frames
    }

    /// Hits of chains ending exactly here.
    #[must_use]
    pub fn self_hit(&self) -> u64 {
        self.hit
    }

    /// Samples ending exactly here.
    #[must_use]
    pub fn self_count(&self) -> u64 {
        self.count
    }

    #[must_use]
    pub fn children_hit(&self) -> u64 {
        self.children_hit
    }

    #[must_use]
    pub fn cumul_hit(&self) -> u64 {
        self.hit + self.children_hit
    }

    #[must_use]
    pub fn cumul_count(&self) -> u64 {
        self.count + self.children_count
    }

    #[must_use]
    pub fn child_count(&self) -> usize {
        self.children.len()
    }

    /// Children, heaviest first.
    pub fn children(&self) -> impl Iterator<Item = &CallchainNode> + '_ {
        self.ranked.iter().map(move |&idx| &self.children[idx])
    }

    pub(super) fn ranked_child(&self, rank: usize) -> Option<&CallchainNode> {
        self.ranked.get(rank).map(|&idx| &self.children[idx])
    }

    fn find_child(&self, frame: &NodeFrame, hash: u64, key: CallchainKey) -> Option<usize> {
        self.by_key.get(&hash).and_then(|candidates| {
            candidates
                .iter()
                .copied()
                .find(|&idx| self.children[idx].frames[0].matches(frame, key))
        })
    }

    fn register_child(&mut self, hash: u64, idx: usize) -> Result<(), HistError> {
        self.by_key
            .try_reserve(1)
            .map_err(|source| HistError::Alloc {
                what: "callchain index",
                source,
            })?;
        let bucket = self.by_key.entry(hash).or_default();
        try_grow(bucket, 1, "callchain index")?;
        bucket.push(idx);
        Ok(())
    }

    /// Add `ins.path[at..]` below this node.
    fn append_child(&mut self, ins: &Insertion<'_>, at: usize) -> Result<(), HistError> {
        let first = &ins.path[at];
        let hash = first.match_hash(ins.key);

        let child = if let Some(idx) = self.find_child(first, hash, ins.key) {
            self.children[idx].append_matched(ins, at)?;
            idx
        } else {
            try_grow(&mut self.children, 1, "callchain nodes")?;
            try_grow(&mut self.ranked, 1, "callchain nodes")?;
            let mut frames = Vec::new();
            try_grow(&mut frames, ins.path.len() - at, "callchain frames")?;
            frames.extend_from_slice(&ins.path[at..]);

            let idx = self.children.len();
            self.register_child(hash, idx)?;
            self.children.push(CallchainNode {
                frames,
                hit: ins.hit,
                count: ins.count,
                rank: self.ranked.len(),
                ..CallchainNode::default()
            });
            self.ranked.push(idx);
            idx
        };

        self.children_hit += ins.hit;
        self.children_count += ins.count;
        self.promote(child);
        Ok(())
    }

    /// Continue an insertion whose frame `at` matched this node's first frame.
    fn append_matched(&mut self, ins: &Insertion<'_>, at: usize) -> Result<(), HistError> {
        let common = self
            .frames
            .iter()
            .zip(&ins.path[at..])
            .take_while(|(mine, theirs)| mine.matches(theirs, ins.key))
            .count();

        for (offset, frame) in self.frames[..common].iter_mut().enumerate() {
            if at + offset >= ins.skip {
                frame.absorb(&ins.path[at + offset]);
            }
        }
        if common < self.frames.len() {
            self.split(common, ins.key)?;
        }

        let next = at + common;
        if next == ins.path.len() {
            self.hit += ins.hit;
            self.count += ins.count;
            Ok(())
        } else {
            self.append_child(ins, next)
        }
    }

    /// Move `frames[at..]` and everything below into a single new child.
    fn split(&mut self, at: usize, key: CallchainKey) -> Result<(), HistError> {
        let mut tail_frames = Vec::new();
        try_grow(&mut tail_frames, self.frames.len() - at, "callchain frames")?;
        let mut children = Vec::new();
        try_grow(&mut children, 1, "callchain nodes")?;
        tail_frames.extend(self.frames.drain(at..));

        let tail = CallchainNode {
            frames: tail_frames,
            hit: self.hit,
            count: self.count,
            children_hit: self.children_hit,
            children_count: self.children_count,
            children: std::mem::take(&mut self.children),
            by_key: std::mem::take(&mut self.by_key),
            ranked: std::mem::take(&mut self.ranked),
            rank: 0,
        };
        let hash = tail.frames[0].match_hash(key);

        self.hit = 0;
        self.count = 0;
        self.children_hit = tail.cumul_hit();
        self.children_count = tail.cumul_count();
        children.push(tail);
        self.children = children;
        self.ranked = vec![0];
        self.register_child(hash, 0)
    }

    /// Age this subtree; parent sums are rebuilt from the aged children.
    fn decay(&mut self, decay: DecayParam) {
        self.hit = decay.apply(self.hit);
        self.count = decay.apply(self.count);
        let (mut children_hit, mut children_count) = (0, 0);
        for child in &mut self.children {
            child.decay(decay);
            children_hit += child.cumul_hit();
            children_count += child.cumul_count();
        }
        self.children_hit = children_hit;
        self.children_count = children_count;

        // Rounding can swap siblings that were close.
        let children = &self.children;
        self.ranked
            .sort_by(|&a, &b| children[b].cumul_hit().cmp(&children[a].cumul_hit()));
        for (rank, &idx) in self.ranked.iter().enumerate() {
            self.children[idx].rank = rank;
        }
    }

    /// Restore descending order after child `idx` gained hits.
    fn promote(&mut self, idx: usize) {
        let hits = self.children[idx].cumul_hit();
        let mut pos = self.children[idx].rank;
        while pos > 0 {
            let prev = self.ranked[pos - 1];
            if self.children[prev].cumul_hit() >= hits {
                break;
            }
            self.ranked.swap(pos - 1, pos);
            self.children[prev].rank = pos;
            pos -= 1;
        }
        self.children[idx].rank = pos;
    }
}

// =============================================================================
// ROOT
// =============================================================================

/// Callchain tree of one histogram entry.
#[derive(Debug, Clone)]
pub struct CallchainRoot {
    node: CallchainNode,
    key: CallchainKey,
}

impl CallchainRoot {
    #[must_use]
    pub fn new(key: CallchainKey) -> Self {
        Self {
            node: CallchainNode::default(),
            key,
        }
    }

    /// Add one sample's chain with weight `period`.
    pub fn append(&mut self, cursor: &CallchainCursor, period: u64) -> Result<(), HistError> {
        if cursor.is_empty() {
            self.node.hit += period;
            self.node.count += 1;
            return Ok(());
        }
        let mut path = Vec::new();
        try_grow(&mut path, cursor.len(), "callchain path")?;
        path.extend(cursor.iter().map(NodeFrame::from));
        let ins = Insertion {
            path: &path,
            skip: 0,
            hit: period,
            count: 1,
            key: self.key,
        };
        self.node.append_child(&ins, 0)
    }

    /// Fold every path of `other` into this tree.
    pub fn merge(&mut self, other: &CallchainRoot) -> Result<(), HistError> {
        self.node.hit += other.node.hit;
        self.node.count += other.node.count;
        let mut path = Vec::new();
        for child in other.node.children() {
            self.merge_from(child, &mut path)?;
        }
        Ok(())
    }

    fn merge_from(&mut self, node: &CallchainNode, path: &mut Vec<NodeFrame>) -> Result<(), HistError> {
        let base = path.len();
        try_grow(path, node.frames.len(), "callchain path")?;
        path.extend_from_slice(&node.frames);
        let ins = Insertion {
            path: path.as_slice(),
            skip: base,
            hit: node.hit,
            count: node.count,
            key: self.key,
        };
        self.node.append_child(&ins, 0)?;
        for child in node.children() {
            self.merge_from(child, path)?;
        }
        path.truncate(base);
        Ok(())
    }

    /// Scale every hit and sample count by `decay`, like the entry's stats.
    pub fn decay(&mut self, decay: DecayParam) {
        self.node.decay(decay);
    }

    /// Sum of all hits in the tree.
    #[must_use]
    pub fn total_hits(&self) -> u64 {
        self.node.cumul_hit()
    }

    /// Virtual root node (no frames).
    #[must_use]
    pub fn root(&self) -> &CallchainNode {
        &self.node
    }

    #[must_use]
    pub fn key(&self) -> CallchainKey {
        self.key
    }
}
