//! Double-buffered insertion side of a histogram table.
//!
//! ```text
//!             producers (add_entry)
//!                    │
//!          ┌─────────▼─────────┐
//! selector │  0 ──► slot[0]    │ front: receives new samples
//!  (mutex) │        slot[1]    │ back: drained by collapse_resort
//!          └───────────────────┘
//!          rotate(): flip selector, return the old front index
//! ```
//!
//! `add_entry` takes the selector lock only long enough to lock the current
//! front slot, so producers keep inserting into the new front while the
//! consumer drains the old one. A producer still holding the old front
//! finishes its insert before the consumer's drain can lock that slot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::entry::HistEntry;
use crate::config::ReportConfig;
use crate::domain::{try_grow, EntryId, HistError};
use crate::sample::ResolvedSample;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// One generation of freshly inserted entries.
///
/// Entries are appended to `entries`; `order` holds their indices sorted by
/// collapse order, so an insert shifts indices rather than whole entries.
#[derive(Debug, Default)]
struct EntryTree {
    entries: Vec<HistEntry>,
    order: Vec<usize>,
}

impl EntryTree {
    fn add(
        &mut self,
        config: &ReportConfig,
        sample: &ResolvedSample,
        next_id: &AtomicU64,
    ) -> Result<EntryId, HistError> {
        let mut entry = HistEntry::from_sample(EntryId(0), sample);
        let entries = &self.entries;
        match self
            .order
            .binary_search_by(|&idx| config.sort.collapse(&entries[idx], &entry))
        {
            Ok(pos) => {
                let existing = &mut self.entries[self.order[pos]];
                existing.add_sample(sample)?;
                Ok(existing.id)
            }
            Err(pos) => {
                try_grow(&mut self.entries, 1, "histogram entries")?;
                try_grow(&mut self.order, 1, "histogram entries")?;
                if config.use_callchain {
                    entry.init_callchain(config.callchain.key, sample)?;
                }
                entry.id = EntryId(next_id.fetch_add(1, Ordering::Relaxed));
                let id = entry.id;
                self.order.insert(pos, self.entries.len());
                self.entries.push(entry);
                Ok(id)
            }
        }
    }

    /// Every entry in collapse order; leaves the tree empty.
    fn take_sorted(&mut self) -> Vec<HistEntry> {
        let order = std::mem::take(&mut self.order);
        let mut slots: Vec<Option<HistEntry>> =
            std::mem::take(&mut self.entries).into_iter().map(Some).collect();
        order.into_iter().filter_map(|idx| slots[idx].take()).collect()
    }
}

/// Shared insertion handle; clone the `Arc` into each producer.
#[derive(Debug)]
pub struct EntryInput {
    config: Arc<ReportConfig>,
    slots: [Mutex<EntryTree>; 2],
    /// Index of the front slot.
    selector: Mutex<usize>,
    next_id: AtomicU64,
}

impl EntryInput {
    #[must_use]
    pub fn new(config: Arc<ReportConfig>) -> Self {
        Self {
            config,
            slots: [Mutex::default(), Mutex::default()],
            selector: Mutex::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Find or create the entry for `sample` in the front buffer.
    pub fn add_entry(&self, sample: &ResolvedSample) -> Result<EntryId, HistError> {
        let selector = lock(&self.selector);
        let mut front = lock(&self.slots[*selector]);
        drop(selector);
        front.add(&self.config, sample, &self.next_id)
    }

    /// Make the back buffer the new front; returns the index of the old front.
    pub fn rotate(&self) -> usize {
        let mut selector = lock(&self.selector);
        let back = *selector;
        *selector ^= 1;
        back
    }

    /// Take every entry out of slot `idx`, in collapse order.
    pub(crate) fn drain(&self, idx: usize) -> Vec<HistEntry> {
        lock(&self.slots[idx & 1]).take_sorted()
    }

    /// Entries waiting in both buffers.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.slots.iter().map(|slot| lock(slot).entries.len()).sum()
    }

    pub(crate) fn next_id(&self) -> EntryId {
        EntryId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::AddrLocation;
    use perfhist_common::{CpuMode, Thread};

    fn sample(tid: i32, period: u64) -> ResolvedSample {
        ResolvedSample::new(
            Arc::new(Thread::new(tid, tid, format!("t{tid}"))),
            AddrLocation::unresolved(0x1000, CpuMode::User),
            period,
        )
    }

    #[test]
    fn test_same_key_returns_same_id() {
        let input = EntryInput::new(Arc::new(ReportConfig::with_sort("comm").unwrap()));
        let a = input.add_entry(&sample(1, 10)).unwrap();
        let b = input.add_entry(&sample(2, 1)).unwrap();
        let c = input.add_entry(&sample(1, 5)).unwrap();
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(input.pending(), 2);
    }

    #[test]
    fn test_rotate_switches_front() {
        let input = EntryInput::new(Arc::new(ReportConfig::with_sort("comm").unwrap()));
        input.add_entry(&sample(1, 10)).unwrap();
        let back = input.rotate();
        assert_eq!(back, 0);
        input.add_entry(&sample(1, 10)).unwrap();

        let drained = input.drain(back);
        assert_eq!(drained.len(), 1);
        assert_eq!(input.pending(), 1);
        assert_eq!(input.rotate(), 1);
    }

    #[test]
    fn test_drain_returns_collapse_order() {
        let input = EntryInput::new(Arc::new(ReportConfig::with_sort("comm").unwrap()));
        for tid in [5, 2, 9, 2, 1, 7] {
            input.add_entry(&sample(tid, 1)).unwrap();
        }
        let drained = input.drain(0);
        let comms: Vec<&str> = drained.iter().map(|e| e.thread().comm.as_str()).collect();
        assert_eq!(comms, vec!["t1", "t2", "t5", "t7", "t9"]);
        assert_eq!(drained[1].stat().period, 2);
        assert_eq!(input.pending(), 0);
    }
}
