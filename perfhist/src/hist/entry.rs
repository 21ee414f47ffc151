//! The histogram bucket.

use std::sync::Arc;

use perfhist_common::{Symbol, Thread};

use super::filter::HistFilter;
use super::stat::{HistStat, MemStats};
use crate::callchain::{CallchainCursor, CallchainRoot};
use crate::config::CallchainKey;
use crate::domain::{EntryId, HistError};
use crate::machine::AddrLocation;
use crate::sample::{BranchInfo, MemInfo, ResolvedSample};

/// One aggregation bucket.
///
/// Identity fields come from the first sample that created the entry; later
/// samples with the same collapse key only add to the counters.
#[derive(Debug, Clone)]
pub struct HistEntry {
    pub(crate) id: EntryId,
    thread: Arc<Thread>,
    location: AddrLocation,
    parent: Option<Arc<Symbol>>,
    branch: Option<BranchInfo>,
    mem: Option<MemInfo>,
    transaction: Option<u64>,
    pub(crate) stat: HistStat,
    pub(crate) mem_stat: MemStats,
    pub(crate) filtered: HistFilter,
    pub(crate) used: bool,
    pub(crate) callchain: Option<CallchainRoot>,
    pub(crate) pair: Option<EntryId>,
    pub(crate) position: usize,
    pub(crate) placeholder: bool,
}

impl HistEntry {
    /// Entry holding exactly one sample, without a callchain.
    #[must_use]
    pub fn from_sample(id: EntryId, sample: &ResolvedSample) -> Self {
        let mut stat = HistStat::default();
        stat.add_sample(sample.cpumode(), sample.period, sample.weight);
        Self {
            id,
            thread: Arc::clone(&sample.thread),
            location: sample.location.clone(),
            parent: sample.parent.clone(),
            branch: sample.branch.clone(),
            mem: sample.mem.clone(),
            transaction: sample.transaction,
            stat,
            mem_stat: sample.mem.as_ref().map(MemStats::from_access).unwrap_or_default(),
            filtered: HistFilter::empty(),
            used: false,
            callchain: None,
            pair: None,
            position: 0,
            placeholder: false,
        }
    }

    /// Start the callchain tree with the sample this entry was built from.
    pub(crate) fn init_callchain(
        &mut self,
        key: CallchainKey,
        sample: &ResolvedSample,
    ) -> Result<(), HistError> {
        let mut root = CallchainRoot::new(key);
        append_chain(&mut root, sample)?;
        self.callchain = Some(root);
        Ok(())
    }

    /// Account another sample with the same collapse key.
    pub(crate) fn add_sample(&mut self, sample: &ResolvedSample) -> Result<(), HistError> {
        if let Some(root) = &mut self.callchain {
            append_chain(root, sample)?;
        }
        self.stat
            .add_sample(sample.cpumode(), sample.period, sample.weight);
        if let Some(mem) = &sample.mem {
            self.mem_stat.merge(&MemStats::from_access(mem));
        }
        Ok(())
    }

    /// Fold a collapse-equal entry into this one.
    pub(crate) fn merge(&mut self, other: HistEntry) -> Result<(), HistError> {
        if let Some(theirs) = other.callchain {
            match &mut self.callchain {
                Some(mine) => mine.merge(&theirs)?,
                None => self.callchain = Some(theirs),
            }
        }
        self.stat.merge(&other.stat);
        self.mem_stat.merge(&other.mem_stat);
        self.used |= other.used;
        Ok(())
    }

    /// Zero-stat copy of this entry's identity, for the other side of a diff.
    pub(crate) fn placeholder(&self, id: EntryId) -> Self {
        Self {
            id,
            thread: Arc::clone(&self.thread),
            location: self.location.clone(),
            parent: self.parent.clone(),
            branch: self.branch.clone(),
            mem: self.mem.clone(),
            transaction: self.transaction,
            stat: HistStat::default(),
            mem_stat: MemStats::default(),
            filtered: HistFilter::empty(),
            used: false,
            callchain: None,
            pair: Some(self.id),
            position: 0,
            placeholder: true,
        }
    }

    #[must_use]
    pub fn id(&self) -> EntryId {
        self.id
    }

    #[must_use]
    pub fn thread(&self) -> &Arc<Thread> {
        &self.thread
    }

    #[must_use]
    pub fn location(&self) -> &AddrLocation {
        &self.location
    }

    /// `.` for user space, otherwise a kernel flavour.
    #[must_use]
    pub fn level(&self) -> char {
        self.location.level()
    }

    #[must_use]
    pub fn parent(&self) -> Option<&Arc<Symbol>> {
        self.parent.as_ref()
    }

    #[must_use]
    pub fn branch(&self) -> Option<&BranchInfo> {
        self.branch.as_ref()
    }

    #[must_use]
    pub fn mem(&self) -> Option<&MemInfo> {
        self.mem.as_ref()
    }

    #[must_use]
    pub fn transaction(&self) -> Option<u64> {
        self.transaction
    }

    #[must_use]
    pub fn stat(&self) -> &HistStat {
        &self.stat
    }

    #[must_use]
    pub fn mem_stat(&self) -> &MemStats {
        &self.mem_stat
    }

    #[must_use]
    pub fn filtered(&self) -> HistFilter {
        self.filtered
    }

    /// Hidden by at least one active filter.
    #[must_use]
    pub fn is_filtered(&self) -> bool {
        !self.filtered.is_empty()
    }

    #[must_use]
    pub fn is_used(&self) -> bool {
        self.used
    }

    #[must_use]
    pub fn callchain(&self) -> Option<&CallchainRoot> {
        self.callchain.as_ref()
    }

    /// Matching entry in the paired table, if any.
    #[must_use]
    pub fn pair(&self) -> Option<EntryId> {
        self.pair
    }

    /// 1-based rank in the last output resort (0 before the first one).
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    #[must_use]
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }
}

fn append_chain(root: &mut CallchainRoot, sample: &ResolvedSample) -> Result<(), HistError> {
    match &sample.callchain {
        Some(cursor) => root.append(cursor, sample.period),
        None => root.append(&CallchainCursor::new(), sample.period),
    }
}
