//! Resolved callchain of one sample, ready to be merged into a tree.

use perfhist_common::BranchFlags;

use super::loops::LoopIterations;
use crate::domain::{try_grow, HistError};
use crate::machine::AddrLocation;

/// One resolved frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainFrame {
    pub ip: u64,
    pub location: AddrLocation,
    /// Set for frames synthesised from a branch stack.
    pub branch: Option<BranchFlags>,
    pub branch_from: u64,
    pub iterations: LoopIterations,
}

impl ChainFrame {
    #[must_use]
    pub fn new(location: AddrLocation) -> Self {
        Self {
            ip: location.addr,
            location,
            branch: None,
            branch_from: 0,
            iterations: LoopIterations::default(),
        }
    }

    #[must_use]
    pub fn with_branch(mut self, flags: BranchFlags, from: u64) -> Self {
        self.branch = Some(flags);
        self.branch_from = from;
        self
    }

    #[must_use]
    pub fn with_iterations(mut self, iterations: LoopIterations) -> Self {
        self.iterations = iterations;
        self
    }
}

/// Ordered frames of one sample, in the configured callchain order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallchainCursor {
    frames: Vec<ChainFrame>,
}

impl CallchainCursor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: ChainFrame) -> Result<(), HistError> {
        try_grow(&mut self.frames, 1, "callchain cursor")?;
        self.frames.push(frame);
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    #[must_use]
    pub fn frames(&self) -> &[ChainFrame] {
        &self.frames
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChainFrame> {
        self.frames.iter()
    }

    /// Keep at most `max` frames.
    pub fn truncate(&mut self, max: usize) {
        self.frames.truncate(max);
    }
}

impl FromIterator<ChainFrame> for CallchainCursor {
    fn from_iter<I: IntoIterator<Item = ChainFrame>>(iter: I) -> Self {
        Self {
            frames: iter.into_iter().collect(),
        }
    }
}
