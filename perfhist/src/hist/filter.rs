//! Visibility filters.
//!
//! Filters never remove entries. Each one owns a bit in the entry's
//! [`HistFilter`] mask; an entry is shown, and counted in the
//! `non_filtered` totals, only while its mask is empty. Re-applying the
//! same filter reproduces the same mask.

use perfhist_common::{Dso, Thread};

use super::entry::HistEntry;
use super::table::HistogramTable;

bitflags::bitflags! {
    /// Filters currently hiding an entry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HistFilter: u8 {
        const DSO    = 1 << 0;
        const THREAD = 1 << 1;
        const SYMBOL = 1 << 2;
        /// No parent symbol while `exclude_other` is set.
        const PARENT = 1 << 3;
    }
}

/// Active filter values of one table.
#[derive(Debug, Clone, Default)]
pub(crate) struct HistFilters {
    dso: Option<String>,
    /// `(pid, tid)`
    thread: Option<(i32, i32)>,
    symbol: Option<String>,
    exclude_other: bool,
}

impl HistFilters {
    pub(crate) fn new(exclude_other: bool) -> Self {
        Self {
            exclude_other,
            ..Self::default()
        }
    }

    fn hides_dso(&self, entry: &HistEntry) -> bool {
        self.dso.as_ref().is_some_and(|want| {
            entry.location().dso().is_none_or(|dso| &dso.name != want)
        })
    }

    fn hides_thread(&self, entry: &HistEntry) -> bool {
        self.thread.is_some_and(|(pid, tid)| {
            let thread = entry.thread();
            thread.pid != pid || thread.tid != tid
        })
    }

    fn hides_symbol(&self, entry: &HistEntry) -> bool {
        self.symbol.as_ref().is_some_and(|pattern| {
            entry
                .location()
                .symbol
                .as_ref()
                .is_none_or(|sym| !sym.name.contains(pattern.as_str()))
        })
    }

    fn hides_parent(&self, entry: &HistEntry) -> bool {
        self.exclude_other && entry.parent().is_none()
    }

    /// Full mask for `entry` under every active filter.
    pub(crate) fn mask(&self, entry: &HistEntry) -> HistFilter {
        let mut mask = HistFilter::empty();
        mask.set(HistFilter::DSO, self.hides_dso(entry));
        mask.set(HistFilter::THREAD, self.hides_thread(entry));
        mask.set(HistFilter::SYMBOL, self.hides_symbol(entry));
        mask.set(HistFilter::PARENT, self.hides_parent(entry));
        mask
    }
}

impl HistogramTable {
    /// Show only entries whose location is in `dso`; `None` clears the filter.
    pub fn filter_by_dso(&mut self, dso: Option<&Dso>) {
        self.filters.dso = dso.map(|d| d.name.clone());
        self.refilter();
    }

    /// Show only entries of `thread`; `None` clears the filter.
    pub fn filter_by_thread(&mut self, thread: Option<&Thread>) {
        self.filters.thread = thread.map(|t| (t.pid, t.tid));
        self.refilter();
    }

    /// Show only entries whose symbol name contains `pattern`.
    pub fn filter_by_symbol(&mut self, pattern: Option<&str>) {
        self.filters.symbol = pattern.map(str::to_string);
        self.refilter();
    }

    /// Any filter other than the parent one is set.
    #[must_use]
    pub fn has_filter(&self) -> bool {
        self.filters.dso.is_some() || self.filters.thread.is_some() || self.filters.symbol.is_some()
    }

    fn refilter(&mut self) {
        for &slot in &self.output {
            let mask = self.filters.mask(&self.entries[slot]);
            self.entries[slot].filtered = mask;
        }
        self.recompute_totals();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ReportConfig;
    use crate::machine::AddrLocation;
    use crate::sample::ResolvedSample;
    use perfhist_common::{CpuMode, Map, Symbol};

    fn location(dso: &str, sym: Option<(u64, &str)>, addr: u64) -> AddrLocation {
        AddrLocation {
            map: Some(Arc::new(Map {
                start: 0,
                end: u64::MAX,
                pgoff: 0,
                dso: Arc::new(Dso::new(dso, false)),
            })),
            symbol: sym.map(|(start, name)| Arc::new(Symbol::new(start, start + 0x100, name))),
            srcline: None,
            addr,
            cpumode: CpuMode::User,
        }
    }

    fn sample(tid: i32, loc: AddrLocation, period: u64) -> ResolvedSample {
        ResolvedSample::new(Arc::new(Thread::new(1, tid, "app")), loc, period)
    }

    fn build(config: ReportConfig, samples: Vec<ResolvedSample>) -> HistogramTable {
        let mut table = HistogramTable::new(Arc::new(config));
        for s in &samples {
            table.add_entry(s).unwrap();
        }
        table.collapse_resort().unwrap();
        table.output_resort().unwrap();
        table
    }

    fn masks(table: &HistogramTable) -> Vec<(String, HistFilter)> {
        table
            .entries()
            .map(|e| (e.location().display_name(), e.filtered()))
            .collect()
    }

    #[test]
    fn test_all_bits_distinct() {
        assert_eq!(HistFilter::all().bits().count_ones(), 4);
        assert!(HistFilter::empty().is_empty());
    }

    #[test]
    fn test_exclude_other_hides_entries_without_parent() {
        let config = ReportConfig::builder()
            .sort("symbol,parent")
            .parent("^sys_", true)
            .build()
            .unwrap();
        let sys_read = Arc::new(Symbol::new(0, 0x100, "sys_read"));
        let table = build(
            config,
            vec![
                sample(1, location("app", Some((0x100, "read_loop")), 0x110), 10)
                    .with_parent(Some(sys_read)),
                sample(1, location("app", Some((0x200, "spin")), 0x210), 30),
            ],
        );

        assert_eq!(
            masks(&table),
            vec![
                ("spin".to_string(), HistFilter::PARENT),
                ("read_loop".to_string(), HistFilter::empty()),
            ]
        );
        let totals = table.totals();
        assert_eq!(totals.total_period, 40);
        assert_eq!(totals.nr_entries, 2);
        assert_eq!(totals.total_non_filtered_period, 10);
        assert_eq!(totals.nr_non_filtered_entries, 1);
        assert_eq!(totals.nr_non_filtered_samples, 1);
        assert!(!table.has_filter());
        assert_eq!(table.visible().count(), 1);
    }

    #[test]
    fn test_without_exclude_other_parentless_entries_stay_visible() {
        let config = ReportConfig::builder()
            .sort("symbol,parent")
            .parent("^sys_", false)
            .build()
            .unwrap();
        let table = build(
            config,
            vec![sample(1, location("app", Some((0x200, "spin")), 0x210), 30)],
        );
        assert_eq!(table.visible().count(), 1);
        assert_eq!(table.totals().total_non_filtered_period, 30);
    }

    #[test]
    fn test_symbol_filter_is_idempotent() {
        let mut table = build(
            ReportConfig::with_sort("symbol").unwrap(),
            vec![
                sample(1, location("app", Some((0x100, "foo")), 0x110), 4),
                sample(1, location("app", Some((0x200, "foobar")), 0x210), 2),
                sample(1, location("app", Some((0x300, "bar")), 0x310), 8),
                sample(1, location("app", None, 0x5000), 1),
            ],
        );

        table.filter_by_symbol(Some("foo"));
        let first_masks = masks(&table);
        let first_totals = *table.totals();
        let visible: Vec<String> = table.visible().map(|e| e.location().display_name()).collect();
        assert_eq!(visible, vec!["foo", "foobar"]);
        assert_eq!(first_totals.total_non_filtered_period, 6);
        assert_eq!(first_totals.nr_non_filtered_entries, 2);
        assert_eq!(first_totals.total_period, 15);
        assert!(table.has_filter());

        table.filter_by_symbol(Some("foo"));
        assert_eq!(masks(&table), first_masks);
        assert_eq!(*table.totals(), first_totals);

        table.filter_by_symbol(None);
        assert!(table.entries().all(|e| e.filtered().is_empty()));
        assert_eq!(table.totals().total_non_filtered_period, 15);
        assert!(!table.has_filter());
    }

    #[test]
    fn test_filters_stack_and_clear_independently() {
        let mut table = build(
            ReportConfig::with_sort("pid,dso").unwrap(),
            vec![
                sample(1, location("libc.so", None, 0x10), 5),
                sample(2, location("libc.so", None, 0x10), 3),
                sample(1, location("app", None, 0x10), 7),
            ],
        );
        let libc = Dso::new("libc.so", false);
        let main_thread = Thread::new(1, 1, "app");

        table.filter_by_dso(Some(&libc));
        table.filter_by_thread(Some(&main_thread));
        assert_eq!(table.visible().count(), 1);
        assert_eq!(table.totals().total_non_filtered_period, 5);
        let both: Vec<HistFilter> = table.entries().map(HistEntry::filtered).collect();
        assert!(both.contains(&HistFilter::DSO));
        assert!(both.contains(&HistFilter::THREAD));

        table.filter_by_dso(None);
        assert_eq!(table.totals().total_non_filtered_period, 12);
        assert!(table
            .entries()
            .all(|e| e.filtered().is_empty() || e.filtered() == HistFilter::THREAD));
    }
}
