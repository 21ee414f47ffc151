//! Resolved samples: the input unit of the aggregation engine.
//!
//! A [`ResolvedSample`] is what is left of a [`perfhist_common::RawSample`]
//! after thread lookup and address resolution. It is immutable once built;
//! the histogram copies what it keeps.

use std::sync::Arc;

use perfhist_common::{BranchFlags, CpuMode, DataSource, Symbol, Thread};

use crate::callchain::CallchainCursor;
use crate::machine::AddrLocation;

/// Resolved from/to pair of a branch-stack sample.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub from: AddrLocation,
    pub to: AddrLocation,
    pub flags: BranchFlags,
}

/// Resolved memory access of a memory-sampling event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemInfo {
    /// Instruction that performed the access.
    pub iaddr: AddrLocation,
    /// Data address; `addr == 0` when the hardware did not record one.
    pub daddr: AddrLocation,
    pub source: DataSource,
}

#[derive(Debug, Clone)]
pub struct ResolvedSample {
    pub thread: Arc<Thread>,
    pub location: AddrLocation,
    pub period: u64,
    pub weight: u64,
    /// First callchain symbol matching the parent pattern.
    pub parent: Option<Arc<Symbol>>,
    pub branch: Option<BranchInfo>,
    pub mem: Option<MemInfo>,
    pub transaction: Option<u64>,
    pub callchain: Option<CallchainCursor>,
}

impl ResolvedSample {
    #[must_use]
    pub fn new(thread: Arc<Thread>, location: AddrLocation, period: u64) -> Self {
        Self {
            thread,
            location,
            period,
            weight: 0,
            parent: None,
            branch: None,
            mem: None,
            transaction: None,
            callchain: None,
        }
    }

    #[must_use]
    pub fn cpumode(&self) -> CpuMode {
        self.location.cpumode
    }

    #[must_use]
    pub fn with_weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }

    #[must_use]
    pub fn with_parent(mut self, parent: Option<Arc<Symbol>>) -> Self {
        self.parent = parent;
        self
    }

    #[must_use]
    pub fn with_branch(mut self, branch: BranchInfo) -> Self {
        self.branch = Some(branch);
        self
    }

    #[must_use]
    pub fn with_mem(mut self, mem: MemInfo) -> Self {
        self.mem = Some(mem);
        self
    }

    #[must_use]
    pub fn with_transaction(mut self, transaction: u64) -> Self {
        self.transaction = Some(transaction);
        self
    }

    #[must_use]
    pub fn with_callchain(mut self, cursor: CallchainCursor) -> Self {
        self.callchain = Some(cursor);
        self
    }
}
