//! Baseline vs new comparison.
//!
//! ```text
//!            new                      baseline
//!  pos  entry   period   %      pos  entry   period   %     delta  disp
//!   1   foo       10   62.5      2   foo        4   40.0   +22.5    +1
//!   2   baz*       0    0.0      1   baz        6   60.0   -60.0     -
//! ```
//!
//! `*` marks a placeholder linked in for an entry only the baseline has.

// Ranks never come near i64::MAX
#![allow(clippy::cast_possible_wrap)]

use log::debug;
use serde::Serialize;

use super::ReportSession;
use crate::domain::{EntryId, HistError};
use crate::hist::{percent, HistEntry, HistogramTable};

/// Deltas closer to zero than this are reported as zero.
pub const DELTA_EPSILON: f64 = 0.01;

/// One output entry of the new side with its baseline counterpart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffRow {
    pub entry: EntryId,
    /// Sort key columns of the entry.
    pub columns: Vec<String>,
    /// 1-based rank in the new table.
    pub position: usize,
    pub new_period: u64,
    pub new_percent: f64,
    pub baseline_period: u64,
    pub baseline_percent: f64,
    /// `new_percent - baseline_percent`, in percentage points.
    pub delta: f64,
    /// Baseline rank minus new rank; `None` unless both sides hold samples.
    pub displacement: Option<i64>,
    /// Only the baseline has this entry.
    pub placeholder: bool,
}

/// Diff of one event present in both sessions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffReport {
    pub event: String,
    pub rows: Vec<DiffRow>,
}

impl ReportSession {
    /// Compare every event this session shares (by name) with `baseline`.
    ///
    /// Both sessions are resorted, matched and linked; afterwards each table
    /// of this session carries placeholders for baseline-only entries.
    pub fn diff(&mut self, baseline: &mut ReportSession) -> Result<Vec<DiffReport>, HistError> {
        let mut reports = Vec::new();
        for event in &mut self.events {
            let Some(base) = baseline.events.iter_mut().find(|b| b.name == event.name) else {
                debug!("diff: event {} has no baseline", event.name);
                continue;
            };
            let rows = diff_tables(&mut event.table, &mut base.table)?;
            reports.push(DiffReport {
                event: event.name.clone(),
                rows,
            });
        }
        Ok(reports)
    }
}

/// Pair `new` with `baseline` and produce one row per visible entry of `new`.
///
/// Pending input on either side is collapsed first.
pub fn diff_tables(
    new: &mut HistogramTable,
    baseline: &mut HistogramTable,
) -> Result<Vec<DiffRow>, HistError> {
    for table in [&mut *new, &mut *baseline] {
        table.collapse_resort()?;
        table.output_resort()?;
    }
    new.match_entries(baseline);
    new.link(baseline)?;
    new.output_resort()?;

    let new_total = new.totals().total_non_filtered_period;
    let base_total = baseline.totals().total_non_filtered_period;
    let rows = new
        .visible()
        .map(|entry| {
            let pair = entry.pair().and_then(|id| baseline.entry(id));
            diff_row(new, entry, new_total, pair, base_total)
        })
        .collect();
    Ok(rows)
}

fn diff_row(
    new: &HistogramTable,
    entry: &HistEntry,
    new_total: u64,
    pair: Option<&HistEntry>,
    base_total: u64,
) -> DiffRow {
    let new_period = entry.stat().period;
    let baseline_period = pair.map_or(0, |p| p.stat().period);
    let new_percent = percent(new_period, new_total);
    let baseline_percent = percent(baseline_period, base_total);
    let mut delta = new_percent - baseline_percent;
    if delta.abs() < DELTA_EPSILON {
        delta = 0.0;
    }
    let displacement = pair
        .filter(|p| !entry.is_placeholder() && !p.is_placeholder() && p.position() > 0)
        .map(|p| p.position() as i64 - entry.position() as i64);
    DiffRow {
        entry: entry.id(),
        columns: new
            .config()
            .sort
            .columns()
            .map(|key| key.format(entry))
            .collect(),
        position: entry.position(),
        new_period,
        new_percent,
        baseline_period,
        baseline_percent,
        delta,
        displacement,
        placeholder: entry.is_placeholder(),
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

    fn session(samples: &[(&str, u64)]) -> ReportSession {
        let config = Arc::new(ReportConfig::with_sort("comm").unwrap());
        let session = ReportSession::new(config, ["cycles"]);
        for &(comm, period) in samples {
            let sample = ResolvedSample::new(
                Arc::new(Thread::new(1, 1, comm)),
                AddrLocation::unresolved(0x10, CpuMode::User),
                period,
            );
            session.add_sample(0, &sample).unwrap();
        }
        session
    }

    fn row<'a>(rows: &'a [DiffRow], name: &str) -> &'a DiffRow {
        rows.iter().find(|r| r.columns[0] == name).unwrap()
    }

    #[test]
    fn test_diff_rows() {
        let mut new = session(&[("foo", 10), ("bar", 6)]);
        let mut base = session(&[("foo", 4), ("baz", 6)]);
        let reports = new.diff(&mut base).unwrap();
        assert_eq!(reports.len(), 1);
        let rows = &reports[0].rows;
        assert_eq!(rows.len(), 3);

        let foo = row(rows, "foo");
        assert_eq!(foo.position, 1);
        assert!((foo.new_percent - 62.5).abs() < 1e-9);
        assert!((foo.baseline_percent - 40.0).abs() < 1e-9);
        assert!((foo.delta - 22.5).abs() < 1e-9);
        assert_eq!(foo.displacement, Some(1));

        let bar = row(rows, "bar");
        assert_eq!(bar.baseline_period, 0);
        assert!((bar.delta - 37.5).abs() < 1e-9);
        assert_eq!(bar.displacement, None);

        let baz = row(rows, "baz");
        assert!(baz.placeholder);
        assert_eq!(baz.new_period, 0);
        assert!((baz.delta + 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_small_delta_is_zero() {
        let mut new = session(&[("foo", 10_000), ("bar", 10_000)]);
        let mut base = session(&[("foo", 10_001), ("bar", 10_000)]);
        let reports = new.diff(&mut base).unwrap();
        assert!(reports[0].rows.iter().all(|r| r.delta == 0.0));
    }

    #[test]
    fn test_events_without_baseline_are_skipped() {
        let mut new = session(&[("foo", 1)]);
        let config = Arc::new(ReportConfig::with_sort("comm").unwrap());
        let mut base = ReportSession::new(config, ["instructions"]);
        assert!(new.diff(&mut base).unwrap().is_empty());
    }
}
