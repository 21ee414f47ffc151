//! The histogram table: collapse, output order and running totals.
//!
//! ```text
//! EntryInput (front/back) ──collapse_resort──► collapsed (collapse order)
//!                                                   │
//!                                             output_resort
//!                                                   ▼
//!                                         output (display order, positions,
//!                                                 totals, column widths)
//! ```
//!
//! Entries live in one arena and the collapsed and output views hold
//! indices into it. Only decay removes entries; it compacts the arena and
//! remaps both views.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use serde::Serialize;

use super::entry::HistEntry;
use super::filter::HistFilters;
use super::input::EntryInput;
use super::stat::MemStats;
use crate::config::ReportConfig;
use crate::domain::{try_grow, EntryId, HistError};
use crate::sample::ResolvedSample;

/// Running totals over the output view.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistTotals {
    pub total_period: u64,
    pub total_non_filtered_period: u64,
    pub nr_entries: u64,
    pub nr_non_filtered_entries: u64,
    pub nr_samples: u64,
    pub nr_non_filtered_samples: u64,
    /// Memory counters of the visible entries.
    pub mem: MemStats,
}

pub struct HistogramTable {
    pub(super) config: Arc<ReportConfig>,
    pub(super) input: Arc<EntryInput>,
    pub(super) entries: Vec<HistEntry>,
    /// Arena indices in collapse order.
    pub(super) collapsed: Vec<usize>,
    /// Arena indices in display order.
    pub(super) output: Vec<usize>,
    /// Every id ever handed out by `add_entry`, including ids of entries
    /// merged into an older bucket, mapped to the bucket's slot.
    pub(super) by_id: HashMap<EntryId, usize>,
    pub(super) filters: HistFilters,
    totals: HistTotals,
    col_widths: Vec<usize>,
}

impl std::fmt::Debug for HistogramTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistogramTable")
            .field("sort", &self.config.sort.to_string())
            .field("entries", &self.entries.len())
            .field("totals", &self.totals)
            .finish_non_exhaustive()
    }
}

impl HistogramTable {
    #[must_use]
    pub fn new(config: Arc<ReportConfig>) -> Self {
        let filters = HistFilters::new(config.exclude_other);
        Self {
            input: Arc::new(EntryInput::new(Arc::clone(&config))),
            config,
            entries: Vec::new(),
            collapsed: Vec::new(),
            output: Vec::new(),
            by_id: HashMap::new(),
            filters,
            totals: HistTotals::default(),
            col_widths: Vec::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Arc<ReportConfig> {
        &self.config
    }

    /// Insertion handle for producer threads.
    #[must_use]
    pub fn input(&self) -> &Arc<EntryInput> {
        &self.input
    }

    /// Add a sample to the front buffer. See [`EntryInput::add_entry`].
    pub fn add_entry(&self, sample: &ResolvedSample) -> Result<EntryId, HistError> {
        self.input.add_entry(sample)
    }

    /// Flip the insertion buffers; returns the index of the buffer to drain.
    pub fn rotate_entries_in(&self) -> usize {
        self.input.rotate()
    }

    // =========================================================================
    // COLLAPSE
    // =========================================================================

    /// Rotate the input buffers and fold the old front into the collapsed view.
    ///
    /// Returns how many incoming entries were merged into existing buckets.
    pub fn collapse_resort(&mut self) -> Result<usize, HistError> {
        let back = self.rotate_entries_in();
        let incoming = self.input.drain(back);
        if incoming.is_empty() {
            return Ok(0);
        }
        let count = incoming.len();
        try_grow(&mut self.entries, count, "histogram entries")?;
        try_grow(&mut self.collapsed, count, "histogram entries")?;

        // A single generation is already unique and in collapse order.
        if self.collapsed.is_empty() {
            for entry in incoming {
                self.push_collapsed(self.collapsed.len(), entry);
            }
            debug!(
                "collapse: moved {count} entries (sort {}, needs collapse: {})",
                self.config.sort,
                self.config.sort.needs_collapse()
            );
            return Ok(0);
        }

        let mut merged = 0;
        for entry in incoming {
            match self.find_collapsed(&entry) {
                Ok(pos) => {
                    let slot = self.collapsed[pos];
                    let alias = entry.id;
                    self.entries[slot].merge(entry)?;
                    self.by_id.insert(alias, slot);
                    merged += 1;
                }
                Err(pos) => self.push_collapsed(pos, entry),
            }
        }
        debug!(
            "collapse: {count} incoming, {merged} merged, {} buckets",
            self.collapsed.len()
        );
        Ok(merged)
    }

    pub(super) fn find_collapsed(&self, entry: &HistEntry) -> Result<usize, usize> {
        self.collapsed
            .binary_search_by(|&slot| self.config.sort.collapse(&self.entries[slot], entry))
    }

    /// Store `entry` in the arena and at `pos` of the collapsed view.
    /// Capacity must already be reserved.
    pub(super) fn push_collapsed(&mut self, pos: usize, entry: HistEntry) {
        let slot = self.entries.len();
        self.by_id.insert(entry.id, slot);
        self.entries.push(entry);
        self.collapsed.insert(pos, slot);
    }

    // =========================================================================
    // OUTPUT
    // =========================================================================

    /// Rebuild the display order, positions, filter masks, totals and
    /// column widths from the collapsed view.
    pub fn output_resort(&mut self) -> Result<(), HistError> {
        let mut order = Vec::new();
        try_grow(&mut order, self.collapsed.len(), "output order")?;
        order.extend_from_slice(&self.collapsed);

        for &slot in &order {
            let mask = self.filters.mask(&self.entries[slot]);
            self.entries[slot].filtered = mask;
        }

        let sort = &self.config.sort;
        let entries = &self.entries;
        order.sort_by(|&a, &b| sort.output_cmp(&entries[a], &entries[b]));
        for (rank, &slot) in order.iter().enumerate() {
            self.entries[slot].position = rank + 1;
        }
        self.output = order;
        self.recompute_totals();
        self.compute_widths();
        debug!(
            "output: {} entries, total period {}",
            self.output.len(),
            self.totals.total_period
        );
        Ok(())
    }

    pub(super) fn recompute_totals(&mut self) {
        let mut totals = HistTotals::default();
        for entry in self.output.iter().map(|&slot| &self.entries[slot]) {
            totals.total_period += entry.stat.period;
            totals.nr_entries += 1;
            totals.nr_samples += entry.stat.nr_events;
            if !entry.is_filtered() {
                totals.total_non_filtered_period += entry.stat.period;
                totals.nr_non_filtered_entries += 1;
                totals.nr_non_filtered_samples += entry.stat.nr_events;
                totals.mem.merge(&entry.mem_stat);
            }
        }
        self.totals = totals;
    }

    fn compute_widths(&mut self) {
        let mut widths: Vec<usize> = self
            .config
            .sort
            .columns()
            .map(|key| key.header().len())
            .collect();
        for entry in self.visible() {
            for (width, key) in widths.iter_mut().zip(self.config.sort.columns()) {
                *width = (*width).max(key.format(entry).chars().count());
            }
        }
        self.col_widths = widths;
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Every entry in display order, filtered ones included.
    pub fn entries(&self) -> impl Iterator<Item = &HistEntry> + '_ {
        self.output.iter().map(move |&slot| &self.entries[slot])
    }

    /// Entries not hidden by any filter, in display order.
    pub fn visible(&self) -> impl Iterator<Item = &HistEntry> + '_ {
        self.entries().filter(|entry| !entry.is_filtered())
    }

    /// Every bucket in collapse order.
    pub fn collapsed(&self) -> impl Iterator<Item = &HistEntry> + '_ {
        self.collapsed.iter().map(move |&slot| &self.entries[slot])
    }

    #[must_use]
    pub fn entry(&self, id: EntryId) -> Option<&HistEntry> {
        self.by_id.get(&id).map(|&slot| &self.entries[slot])
    }

    /// Number of buckets in the collapsed view.
    #[must_use]
    pub fn len(&self) -> usize {
        self.collapsed.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.collapsed.is_empty()
    }

    #[must_use]
    pub fn totals(&self) -> &HistTotals {
        &self.totals
    }

    /// Column widths of the last output resort, one per sort key.
    #[must_use]
    pub fn column_widths(&self) -> &[usize] {
        &self.col_widths
    }

    /// Pin or unpin an entry; pinned entries survive decay.
    pub fn set_used(&mut self, id: EntryId, used: bool) -> Result<(), HistError> {
        let slot = *self.by_id.get(&id).ok_or(HistError::UnknownEntry(id))?;
        self.entries[slot].used = used;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::AddrLocation;
    use perfhist_common::{CpuMode, Thread};

    fn create_test_table(sort: &str) -> HistogramTable {
        HistogramTable::new(Arc::new(ReportConfig::with_sort(sort).unwrap()))
    }

    fn sample(comm: &str, addr: u64, period: u64) -> ResolvedSample {
        ResolvedSample::new(
            Arc::new(Thread::new(1, 1, comm)),
            AddrLocation::unresolved(addr, CpuMode::User),
            period,
        )
    }

    #[test]
    fn test_collapse_merges_generations() {
        let mut table = create_test_table("comm");
        table.add_entry(&sample("a", 1, 10)).unwrap();
        assert_eq!(table.collapse_resort().unwrap(), 0);
        table.add_entry(&sample("a", 2, 5)).unwrap();
        table.add_entry(&sample("b", 3, 1)).unwrap();
        assert_eq!(table.collapse_resort().unwrap(), 1);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_output_positions_and_totals() {
        let mut table = create_test_table("comm");
        table.add_entry(&sample("small", 1, 1)).unwrap();
        table.add_entry(&sample("big", 2, 100)).unwrap();
        table.collapse_resort().unwrap();
        table.output_resort().unwrap();

        let ranked: Vec<_> = table
            .entries()
            .map(|e| (e.thread().comm.clone(), e.position()))
            .collect();
        assert_eq!(
            ranked,
            vec![("big".to_string(), 1), ("small".to_string(), 2)]
        );
        assert_eq!(table.totals().total_period, 101);
        assert_eq!(table.totals().total_non_filtered_period, 101);
        assert_eq!(table.totals().nr_entries, 2);
        assert_eq!(table.column_widths(), &["Command".len()]);
    }

    #[test]
    fn test_merged_id_resolves_to_bucket() {
        let mut table = create_test_table("comm");
        let first = table.add_entry(&sample("a", 1, 10)).unwrap();
        table.collapse_resort().unwrap();
        let second = table.add_entry(&sample("a", 2, 5)).unwrap();
        assert_ne!(first, second);
        table.collapse_resort().unwrap();
        table.output_resort().unwrap();

        let entry = table.entry(second).unwrap();
        assert_eq!(entry.id(), first);
        assert_eq!(entry.stat().period, 15);
        table.set_used(second, true).unwrap();
        assert!(table.entry(first).unwrap().is_used());
    }

    #[test]
    fn test_set_used_unknown_entry() {
        let mut table = create_test_table("comm");
        assert!(matches!(
            table.set_used(EntryId(42), true),
            Err(HistError::UnknownEntry(EntryId(42)))
        ));
    }
}
