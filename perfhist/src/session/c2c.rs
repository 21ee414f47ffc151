//! # Cacheline Contention Report
//!
//! Memory samples are bucketed twice:
//!
//! ```text
//! sample ──► lines:    tot_hitm,dcacheline        one entry per cacheline
//!        └─► offsets:  line → tot_hitm,offset,iaddr
//!                                                 one entry per (offset, code address)
//! ```
//!
//! Every entry accumulates [`MemStats`]; the report ranks cachelines by
//! total HITM and expresses each line's HITMs as a share of the totals.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, info};
use serde::Serialize;

use crate::config::ReportConfig;
use crate::domain::{ConfigError, HistError};
use crate::hist::{percent, HistEntry, HistogramTable, MemStats};
use crate::sample::ResolvedSample;

pub const LINE_SORT: &str = "tot_hitm,dcacheline";
pub const OFFSET_SORT: &str = "tot_hitm,offset,iaddr";

/// Summary of one cacheline for display and export.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CachelineRow {
    pub line: u64,
    pub percent_hitm: f64,
    pub percent_lcl_hitm: f64,
    pub percent_rmt_hitm: f64,
    pub stats: MemStats,
}

#[derive(Debug)]
pub struct CachelineReport {
    cacheline_size: u64,
    offset_config: Arc<ReportConfig>,
    lines: HistogramTable,
    offsets: HashMap<u64, HistogramTable>,
    /// Samples without memory information.
    skipped: u64,
}

impl CachelineReport {
    pub fn new(cacheline_size: u64) -> Result<Self, ConfigError> {
        let line_config = ReportConfig::builder()
            .sort(LINE_SORT)
            .cacheline_size(cacheline_size)
            .build()?;
        let offset_config = ReportConfig::builder()
            .sort(OFFSET_SORT)
            .cacheline_size(cacheline_size)
            .build()?;
        Ok(Self {
            cacheline_size,
            offset_config: Arc::new(offset_config),
            lines: HistogramTable::new(Arc::new(line_config)),
            offsets: HashMap::new(),
            skipped: 0,
        })
    }

    fn line_of_addr(&self, addr: u64) -> u64 {
        addr & !(self.cacheline_size - 1)
    }

    /// Cacheline address of a line-table entry (0 without memory info).
    #[must_use]
    pub fn line_of(&self, entry: &HistEntry) -> u64 {
        entry
            .mem()
            .map_or(0, |mem| self.line_of_addr(mem.daddr.addr))
    }

    /// Account one sample; samples without memory info are only counted.
    pub fn add_sample(&mut self, sample: &ResolvedSample) -> Result<(), HistError> {
        let Some(mem) = &sample.mem else {
            self.skipped += 1;
            return Ok(());
        };
        let line = self.line_of_addr(mem.daddr.addr);
        self.lines.add_entry(sample)?;
        let offset_config = &self.offset_config;
        self.offsets
            .entry(line)
            .or_insert_with(|| HistogramTable::new(Arc::clone(offset_config)))
            .add_entry(sample)?;
        Ok(())
    }

    /// Collapse and sort the line table and every per-line table.
    pub fn resort(&mut self) -> Result<(), HistError> {
        self.lines.collapse_resort()?;
        self.lines.output_resort()?;
        for table in self.offsets.values_mut() {
            table.collapse_resort()?;
            table.output_resort()?;
        }
        debug!(
            "c2c: {} cachelines, {} samples without memory info",
            self.lines.len(),
            self.skipped
        );
        info!("c2c: {} HITM records", self.totals().tot_hitm);
        Ok(())
    }

    #[must_use]
    pub fn lines(&self) -> &HistogramTable {
        &self.lines
    }

    /// Offset/code-address breakdown of `line`.
    #[must_use]
    pub fn offsets(&self, line: u64) -> Option<&HistogramTable> {
        self.offsets.get(&line)
    }

    /// Memory counters over every cacheline.
    #[must_use]
    pub fn totals(&self) -> &MemStats {
        &self.lines.totals().mem
    }

    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    #[must_use]
    pub fn percent_hitm(&self, entry: &HistEntry) -> f64 {
        percent(entry.mem_stat().tot_hitm, self.totals().tot_hitm)
    }

    #[must_use]
    pub fn percent_lcl_hitm(&self, entry: &HistEntry) -> f64 {
        percent(entry.mem_stat().lcl_hitm, self.totals().lcl_hitm)
    }

    #[must_use]
    pub fn percent_rmt_hitm(&self, entry: &HistEntry) -> f64 {
        percent(entry.mem_stat().rmt_hitm, self.totals().rmt_hitm)
    }

    /// Visible cachelines in report order.
    #[must_use]
    pub fn rows(&self) -> Vec<CachelineRow> {
        self.lines
            .visible()
            .map(|entry| CachelineRow {
                line: self.line_of(entry),
                percent_hitm: self.percent_hitm(entry),
                percent_lcl_hitm: self.percent_lcl_hitm(entry),
                percent_rmt_hitm: self.percent_rmt_hitm(entry),
                stats: *entry.mem_stat(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::AddrLocation;
    use crate::sample::MemInfo;
    use perfhist_common::{CpuMode, DataSource, MemLevel, MemOp, Snoop, Thread};

    fn access(ip: u64, daddr: u64, level: MemLevel, snoop: Snoop) -> ResolvedSample {
        let location = AddrLocation::unresolved(ip, CpuMode::User);
        ResolvedSample::new(Arc::new(Thread::new(1, 1, "app")), location.clone(), 1).with_mem(
            MemInfo {
                iaddr: location,
                daddr: AddrLocation::unresolved(daddr, CpuMode::User),
                source: DataSource {
                    op: MemOp::Load,
                    level,
                    snoop,
                    ..DataSource::default()
                },
            },
        )
    }

    #[test]
    fn test_lines_ranked_by_hitm() {
        let mut report = CachelineReport::new(64).unwrap();
        report.add_sample(&access(0x10, 0x1000, MemLevel::L1, Snoop::None)).unwrap();
        report.add_sample(&access(0x10, 0x1008, MemLevel::L1, Snoop::None)).unwrap();
        report.add_sample(&access(0x20, 0x2010, MemLevel::L3, Snoop::HitM)).unwrap();
        report.add_sample(&access(0x30, 0x2018, MemLevel::RemoteCache, Snoop::HitM)).unwrap();
        report.add_sample(&access(0x30, 0x2018, MemLevel::RemoteCache, Snoop::HitM)).unwrap();
        report
            .add_sample(&ResolvedSample::new(
                Arc::new(Thread::new(1, 1, "app")),
                AddrLocation::unresolved(0x40, CpuMode::User),
                1,
            ))
            .unwrap();
        report.resort().unwrap();

        let rows = report.rows();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].line, 0x2000);
        assert_eq!(rows[0].stats.tot_hitm, 3);
        assert!((rows[0].percent_hitm - 100.0).abs() < 1e-9);
        assert!((rows[0].percent_rmt_hitm - 100.0).abs() < 1e-9);
        assert_eq!(rows[1].line, 0x1000);
        assert_eq!(rows[1].stats.ld_l1hit, 2);
        assert_eq!(report.skipped(), 1);
        assert_eq!(report.totals().loads, 5);

        let offsets = report.offsets(0x2000).unwrap();
        assert_eq!(offsets.len(), 2);
        let top = offsets.entries().next().unwrap();
        assert_eq!(top.mem_stat().rmt_hitm, 2);
    }
}
