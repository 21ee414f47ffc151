//! Per-entry counters.
//!
//! [`HistStat`] is what every histogram entry accumulates; [`MemStats`] is
//! the cache-coherence breakdown the cacheline report adds on top.

// Ratios are computed for display only
#![allow(clippy::cast_precision_loss)]

use perfhist_common::{CpuMode, MemLevel, MemOp, Snoop};
use serde::Serialize;

use crate::config::DecayParam;
use crate::sample::MemInfo;

// =============================================================================
// PERIOD STATISTICS
// =============================================================================

/// Accumulated period, split by cpu mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HistStat {
    pub period: u64,
    pub period_sys: u64,
    pub period_us: u64,
    pub period_guest_sys: u64,
    pub period_guest_us: u64,
    pub nr_events: u64,
    pub weight: u64,
}

impl HistStat {
    /// Account one sample.
    pub fn add_sample(&mut self, cpumode: CpuMode, period: u64, weight: u64) {
        match cpumode {
            CpuMode::Kernel | CpuMode::Hypervisor => self.period_sys += period,
            CpuMode::User => self.period_us += period,
            CpuMode::GuestKernel => self.period_guest_sys += period,
            CpuMode::GuestUser => self.period_guest_us += period,
        }
        self.period += period;
        self.weight += weight;
        self.nr_events += 1;
    }

    /// Fold another entry's counters into this one.
    pub fn merge(&mut self, other: &HistStat) {
        self.period += other.period;
        self.period_sys += other.period_sys;
        self.period_us += other.period_us;
        self.period_guest_sys += other.period_guest_sys;
        self.period_guest_us += other.period_guest_us;
        self.nr_events += other.nr_events;
        self.weight += other.weight;
    }

    /// Age every counter by the decay factor.
    pub fn decay(&mut self, decay: DecayParam) {
        self.period = decay.apply(self.period);
        self.period_sys = decay.apply(self.period_sys);
        self.period_us = decay.apply(self.period_us);
        self.period_guest_sys = decay.apply(self.period_guest_sys);
        self.period_guest_us = decay.apply(self.period_guest_us);
        self.nr_events = decay.apply(self.nr_events);
        self.weight = decay.apply(self.weight);
    }

    /// Mean weight per event, 0 when empty.
    #[must_use]
    pub fn avg_weight(&self) -> u64 {
        self.weight.checked_div(self.nr_events).unwrap_or(0)
    }
}

// =============================================================================
// MEMORY / CACHELINE STATISTICS
// =============================================================================

/// Cache-coherence counters of memory samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemStats {
    pub nr_entries: u64,
    pub locks: u64,
    pub stores: u64,
    pub st_uncache: u64,
    pub st_noadrs: u64,
    pub st_l1hit: u64,
    pub st_l1miss: u64,
    pub loads: u64,
    pub ld_excl: u64,
    pub ld_shared: u64,
    pub ld_uncache: u64,
    pub ld_io: u64,
    pub ld_miss: u64,
    pub ld_noadrs: u64,
    pub ld_fbhit: u64,
    pub ld_l1hit: u64,
    pub ld_l2hit: u64,
    pub ld_llchit: u64,
    pub lcl_hitm: u64,
    pub rmt_hitm: u64,
    pub tot_hitm: u64,
    pub rmt_hit: u64,
    pub lcl_dram: u64,
    pub rmt_dram: u64,
    pub nomap: u64,
    pub noparse: u64,
}

impl MemStats {
    /// Classify one memory sample.
    ///
    /// Samples without a data address or without maps for both addresses
    /// are counted (`*_noadrs`, `nomap`) but get no level breakdown.
    #[must_use]
    pub fn from_access(mem: &MemInfo) -> Self {
        let mut stats = Self {
            nr_entries: 1,
            ..Self::default()
        };
        let src = mem.source;
        let hit = !src.miss && src.level != MemLevel::Na;
        if src.locked {
            stats.locks += 1;
        }

        match src.op {
            MemOp::Load => {
                stats.loads += 1;
                if mem.daddr.addr == 0 {
                    stats.ld_noadrs += 1;
                    return stats;
                }
                if hit {
                    match src.level {
                        MemLevel::Uncached => stats.ld_uncache += 1,
                        MemLevel::Io => stats.ld_io += 1,
                        MemLevel::Lfb => stats.ld_fbhit += 1,
                        MemLevel::L1 => stats.ld_l1hit += 1,
                        MemLevel::L2 => stats.ld_l2hit += 1,
                        MemLevel::L3 if src.snoop == Snoop::HitM => {
                            stats.lcl_hitm += 1;
                            stats.tot_hitm += 1;
                        }
                        MemLevel::L3 => stats.ld_llchit += 1,
                        MemLevel::LocalRam => {
                            stats.lcl_dram += 1;
                            stats.count_sharing(src.snoop);
                        }
                        MemLevel::RemoteRam => {
                            stats.rmt_dram += 1;
                            stats.count_sharing(src.snoop);
                        }
                        MemLevel::RemoteCache => match src.snoop {
                            Snoop::Hit => stats.rmt_hit += 1,
                            Snoop::HitM => {
                                stats.rmt_hitm += 1;
                                stats.tot_hitm += 1;
                            }
                            Snoop::None | Snoop::Miss | Snoop::Na => {}
                        },
                        MemLevel::Na => {}
                    }
                }
                if src.miss {
                    stats.ld_miss += 1;
                }
            }
            MemOp::Store => {
                stats.stores += 1;
                if mem.daddr.addr == 0 {
                    stats.st_noadrs += 1;
                    return stats;
                }
                match (hit, src.level) {
                    (true, MemLevel::Uncached) => stats.st_uncache += 1,
                    (true, MemLevel::L1) => stats.st_l1hit += 1,
                    (false, MemLevel::L1) => stats.st_l1miss += 1,
                    _ => {}
                }
            }
            MemOp::Prefetch | MemOp::Exec | MemOp::Na => {
                stats.noparse += 1;
                return stats;
            }
        }

        if mem.daddr.map.is_none() || mem.iaddr.map.is_none() {
            stats.nomap += 1;
        }
        stats
    }

    fn count_sharing(&mut self, snoop: Snoop) {
        if snoop == Snoop::Hit {
            self.ld_shared += 1;
        } else {
            self.ld_excl += 1;
        }
    }

    pub fn merge(&mut self, other: &MemStats) {
        self.nr_entries += other.nr_entries;
        self.locks += other.locks;
        self.stores += other.stores;
        self.st_uncache += other.st_uncache;
        self.st_noadrs += other.st_noadrs;
        self.st_l1hit += other.st_l1hit;
        self.st_l1miss += other.st_l1miss;
        self.loads += other.loads;
        self.ld_excl += other.ld_excl;
        self.ld_shared += other.ld_shared;
        self.ld_uncache += other.ld_uncache;
        self.ld_io += other.ld_io;
        self.ld_miss += other.ld_miss;
        self.ld_noadrs += other.ld_noadrs;
        self.ld_fbhit += other.ld_fbhit;
        self.ld_l1hit += other.ld_l1hit;
        self.ld_l2hit += other.ld_l2hit;
        self.ld_llchit += other.ld_llchit;
        self.lcl_hitm += other.lcl_hitm;
        self.rmt_hitm += other.rmt_hitm;
        self.tot_hitm += other.tot_hitm;
        self.rmt_hit += other.rmt_hit;
        self.lcl_dram += other.lcl_dram;
        self.rmt_dram += other.rmt_dram;
        self.nomap += other.nomap;
        self.noparse += other.noparse;
    }

    /// Loads that missed the last-level cache.
    #[must_use]
    pub fn llc_miss(&self) -> u64 {
        self.lcl_dram + self.rmt_dram + self.rmt_hitm + self.rmt_hit
    }

    /// Loads with a known outcome.
    #[must_use]
    pub fn total_loads(&self) -> u64 {
        self.llc_miss() + self.ld_fbhit + self.ld_l1hit + self.ld_l2hit + self.ld_llchit + self.lcl_hitm
    }

    /// Loads plus stores with a known outcome.
    #[must_use]
    pub fn total_records(&self) -> u64 {
        self.total_loads() + self.st_l1hit + self.st_l1miss
    }
}

/// `part` as a percentage of `total`, 0 when `total` is 0.
#[must_use]
pub fn percent(part: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        part as f64 * 100.0 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::AddrLocation;
    use perfhist_common::{DataSource, Dso, Map};
    use std::sync::Arc;

    fn mapped(addr: u64) -> AddrLocation {
        AddrLocation {
            map: Some(Arc::new(Map {
                start: 0,
                end: u64::MAX,
                pgoff: 0,
                dso: Arc::new(Dso::new("app", false)),
            })),
            addr,
            ..AddrLocation::default()
        }
    }

    fn access(op: MemOp, level: MemLevel, snoop: Snoop) -> MemInfo {
        MemInfo {
            iaddr: mapped(0x1000),
            daddr: mapped(0x8000),
            source: DataSource {
                op,
                level,
                snoop,
                ..DataSource::default()
            },
        }
    }

    #[test]
    fn test_add_sample_splits_by_cpumode() {
        let mut stat = HistStat::default();
        stat.add_sample(CpuMode::User, 10, 2);
        stat.add_sample(CpuMode::Kernel, 5, 4);
        stat.add_sample(CpuMode::GuestUser, 1, 0);
        assert_eq!(stat.period, 16);
        assert_eq!(stat.period_us, 10);
        assert_eq!(stat.period_sys, 5);
        assert_eq!(stat.period_guest_us, 1);
        assert_eq!(stat.nr_events, 3);
        assert_eq!(stat.avg_weight(), 2);
    }

    #[test]
    fn test_decay_uses_seven_eighths() {
        let mut stat = HistStat::default();
        stat.add_sample(CpuMode::User, 80, 0);
        stat.decay(DecayParam::default());
        assert_eq!(stat.period, 70);
        assert_eq!(stat.period_us, 70);
        assert_eq!(stat.nr_events, 0);
    }

    #[test]
    fn test_hitm_classification() {
        let lcl = MemStats::from_access(&access(MemOp::Load, MemLevel::L3, Snoop::HitM));
        assert_eq!((lcl.lcl_hitm, lcl.tot_hitm, lcl.ld_llchit), (1, 1, 0));

        let rmt = MemStats::from_access(&access(MemOp::Load, MemLevel::RemoteCache, Snoop::HitM));
        assert_eq!((rmt.rmt_hitm, rmt.tot_hitm), (1, 1));
        assert_eq!(rmt.llc_miss(), 1);

        let dram = MemStats::from_access(&access(MemOp::Load, MemLevel::RemoteRam, Snoop::Hit));
        assert_eq!((dram.rmt_dram, dram.ld_shared), (1, 1));
    }

    #[test]
    fn test_store_and_noaddr() {
        let st = MemStats::from_access(&access(MemOp::Store, MemLevel::L1, Snoop::None));
        assert_eq!((st.stores, st.st_l1hit), (1, 1));

        let mut no_addr = access(MemOp::Load, MemLevel::L1, Snoop::None);
        no_addr.daddr.addr = 0;
        let stats = MemStats::from_access(&no_addr);
        assert_eq!((stats.loads, stats.ld_noadrs, stats.ld_l1hit), (1, 1, 0));
    }

    #[test]
    fn test_totals_and_merge() {
        let mut total = MemStats::from_access(&access(MemOp::Load, MemLevel::L1, Snoop::None));
        total.merge(&MemStats::from_access(&access(MemOp::Load, MemLevel::LocalRam, Snoop::Miss)));
        total.merge(&MemStats::from_access(&access(MemOp::Store, MemLevel::L1, Snoop::None)));
        assert_eq!(total.nr_entries, 3);
        assert_eq!(total.total_loads(), 2);
        assert_eq!(total.total_records(), 3);
        assert_eq!(total.ld_excl, 1);
    }

    #[test]
    fn test_percent_of_zero_total() {
        assert!(percent(5, 0).abs() < f64::EPSILON);
        assert!((percent(1, 4) - 25.0).abs() < 1e-9);
    }
}
