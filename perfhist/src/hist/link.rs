//! Pairing two tables for a side-by-side diff.
//!
//! ```text
//!  leader (new)                 other (baseline)
//!  foo ◄───── match ──────────► foo
//!  baz*  ◄──── link ─────────── baz      * zero-stat placeholder
//! ```
//!
//! After `match_entries` + `link` every entry of `other` has a partner in the
//! leader, so both can be walked in lock-step. Both sides must be sorted with
//! the same key list.

use log::debug;

use super::table::HistogramTable;
use crate::domain::{try_grow, HistError};

impl HistogramTable {
    /// Pair every collapsed entry with its collapse-equal entry in `other`.
    ///
    /// Earlier pairings are cleared first. Returns the number of pairs.
    pub fn match_entries(&mut self, other: &mut HistogramTable) -> usize {
        for entry in self.entries.iter_mut().chain(other.entries.iter_mut()) {
            entry.pair = None;
        }
        let mut matched = 0;
        for &slot in &self.collapsed {
            let entry = &self.entries[slot];
            if let Ok(pos) = other.find_collapsed(entry) {
                let theirs = &mut other.entries[other.collapsed[pos]];
                theirs.pair = Some(entry.id);
                let their_id = theirs.id;
                self.entries[slot].pair = Some(their_id);
                matched += 1;
            }
        }
        debug!("match: {matched} of {} entries paired", self.collapsed.len());
        matched
    }

    /// Give every unpaired entry of `other` a zero-stat placeholder here.
    ///
    /// Returns the number of placeholders created. Call
    /// [`output_resort`](Self::output_resort) afterwards to place them.
    pub fn link(&mut self, other: &mut HistogramTable) -> Result<usize, HistError> {
        let mut created = 0;
        for &their_slot in &other.collapsed {
            let theirs = &mut other.entries[their_slot];
            if theirs.pair.is_some() {
                continue;
            }
            match self.find_collapsed(theirs) {
                Ok(pos) => {
                    // Equal but unpaired: `match_entries` was not run.
                    let mine = &mut self.entries[self.collapsed[pos]];
                    mine.pair = Some(theirs.id);
                    theirs.pair = Some(mine.id);
                }
                Err(pos) => {
                    try_grow(&mut self.entries, 1, "placeholder entries")?;
                    try_grow(&mut self.collapsed, 1, "placeholder entries")?;
                    let ghost = theirs.placeholder(self.input.next_id());
                    theirs.pair = Some(ghost.id);
                    self.push_collapsed(pos, ghost);
                    created += 1;
                }
            }
        }
        debug!("link: {created} placeholders created");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ReportConfig;
    use crate::machine::AddrLocation;
    use crate::sample::ResolvedSample;
    use perfhist_common::{CpuMode, Thread};

    fn table_with(comms: &[(&str, u64)]) -> HistogramTable {
        let mut table = HistogramTable::new(Arc::new(ReportConfig::with_sort("comm").unwrap()));
        for &(comm, period) in comms {
            let sample = ResolvedSample::new(
                Arc::new(Thread::new(1, 1, comm)),
                AddrLocation::unresolved(0x10, CpuMode::User),
                period,
            );
            table.add_entry(&sample).unwrap();
        }
        table.collapse_resort().unwrap();
        table.output_resort().unwrap();
        table
    }

    #[test]
    fn test_match_pairs_both_sides() {
        let mut new = table_with(&[("foo", 10), ("bar", 1)]);
        let mut base = table_with(&[("foo", 4)]);
        assert_eq!(new.match_entries(&mut base), 1);

        let foo = new.entries().find(|e| e.thread().comm == "foo").unwrap();
        let base_foo = base.entries().next().unwrap();
        assert_eq!(foo.pair(), Some(base_foo.id()));
        assert_eq!(base_foo.pair(), Some(foo.id()));
        assert!(new.entries().any(|e| e.pair().is_none()));
    }

    #[test]
    fn test_link_creates_placeholders_once() {
        let mut new = table_with(&[("foo", 10)]);
        let mut base = table_with(&[("foo", 4), ("baz", 6)]);
        new.match_entries(&mut base);
        assert_eq!(new.link(&mut base).unwrap(), 1);
        assert_eq!(new.link(&mut base).unwrap(), 0);
        new.output_resort().unwrap();

        assert_eq!(new.len(), 2);
        let ghost = new.entries().find(|e| e.is_placeholder()).unwrap();
        assert_eq!(ghost.thread().comm, "baz");
        assert_eq!(ghost.stat().period, 0);
        let base_baz = base.entries().find(|e| e.thread().comm == "baz").unwrap();
        assert_eq!(ghost.pair(), Some(base_baz.id()));
        assert_eq!(base_baz.pair(), Some(ghost.id()));
        assert_eq!(new.totals().total_period, 10);
    }

    #[test]
    fn test_link_without_match_pairs_equal_entries() {
        let mut new = table_with(&[("foo", 1)]);
        let mut base = table_with(&[("foo", 2)]);
        assert_eq!(new.link(&mut base).unwrap(), 0);
        assert!(new.entries().next().unwrap().pair().is_some());
    }
}
