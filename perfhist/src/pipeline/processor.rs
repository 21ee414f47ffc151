//! # Sample Resolution
//!
//! Turns a [`RawSample`] into one or more [`ResolvedSample`]s.
//!
//! ## Callchain Assembly
//!
//! ```text
//! raw callchain:  [ip0, KERNEL, k1, k2, USER, u1, u2]     (leaf first)
//!                       │              │
//!                       └─ mode switch ┘   markers never become frames
//!
//! branch stack:   [b0, b1, ...]  ──remove_loops──►  to/from frame pairs
//!
//! callee order:   branch frames, then leaf ... root
//! caller order:   root ... leaf, then branch frames (oldest first)
//! ```
//!
//! Corrupt pieces (unknown context markers, branch stacks deeper than
//! `max_branch_depth`) are skipped and counted; the sample itself survives.
//!
//! ## Branch Mode
//!
//! When the sort keys include `sym_from`/`sym_to` (and branch entries are
//! not used as a callstack), every branch entry becomes its own sample of
//! period 1.

use std::fmt;
use std::sync::Arc;

use log::{debug, warn};
use serde::Serialize;
use perfhist_common::{is_context_marker, BranchEntry, CpuMode, RawSample, Symbol, Thread};

use crate::callchain::{remove_loops, CallchainCursor, ChainFrame};
use crate::config::{CallchainOrder, ReportConfig};
use crate::domain::{PipelineError, Pid, Tid};
use crate::machine::Machine;
use crate::sample::{BranchInfo, MemInfo, ResolvedSample};

/// Resolution counters, merged across producers for the summary line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingStats {
    /// Raw samples seen.
    pub samples: u64,
    /// Resolved samples handed to the histogram.
    pub resolved: u64,
    /// Samples dropped because their thread is unknown.
    pub unknown_thread: u64,
    /// Samples whose IP resolved to no symbol.
    pub unresolved: u64,
    /// Unknown context markers skipped inside callchains.
    pub bad_markers: u64,
    /// Branch stacks dropped for exceeding the depth limit.
    pub oversized_branch_stacks: u64,
    /// Branch entries removed as repeated loop bodies.
    pub loop_entries_removed: u64,
}

impl ProcessingStats {
    pub fn merge(&mut self, other: &ProcessingStats) {
        self.samples += other.samples;
        self.resolved += other.resolved;
        self.unknown_thread += other.unknown_thread;
        self.unresolved += other.unresolved;
        self.bad_markers += other.bad_markers;
        self.oversized_branch_stacks += other.oversized_branch_stacks;
        self.loop_entries_removed += other.loop_entries_removed;
    }
}

impl fmt::Display for ProcessingStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "samples={} resolved={} unknown_thread={} unresolved={} bad_markers={} \
             oversized_branch_stacks={} loop_entries_removed={}",
            self.samples,
            self.resolved,
            self.unknown_thread,
            self.unresolved,
            self.bad_markers,
            self.oversized_branch_stacks,
            self.loop_entries_removed
        )
    }
}

/// Resolves raw samples against a machine model. One per producer thread.
pub struct SampleProcessor {
    machine: Arc<dyn Machine>,
    config: Arc<ReportConfig>,
    branch_mode: bool,
    pub stats: ProcessingStats,
}

impl SampleProcessor {
    #[must_use]
    pub fn new(machine: Arc<dyn Machine>, config: Arc<ReportConfig>) -> Self {
        let branch_mode = !config.callchain.branch_callstack
            && (config.sort.contains("sym_from") || config.sort.contains("sym_to"));
        Self {
            machine,
            config,
            branch_mode,
            stats: ProcessingStats::default(),
        }
    }

    /// Resolve one raw sample.
    ///
    /// Returns several samples in branch mode, otherwise exactly one.
    ///
    /// # Errors
    /// [`PipelineError::UnknownThread`] when the machine has no such thread;
    /// [`PipelineError::Hist`] on allocation failure.
    pub fn process(&mut self, raw: &RawSample) -> Result<Vec<ResolvedSample>, PipelineError> {
        self.stats.samples += 1;
        let Some(thread) = self.machine.find_thread(Pid(raw.pid), Tid(raw.tid)) else {
            self.stats.unknown_thread += 1;
            return Err(PipelineError::UnknownThread {
                pid: Pid(raw.pid),
                tid: Tid(raw.tid),
            });
        };

        let location = self.machine.resolve(&thread, raw.cpumode, raw.ip);
        if !location.is_resolved() {
            self.stats.unresolved += 1;
        }

        let (cursor, parent) = self.resolve_callchain(&thread, raw)?;
        let mut sample = ResolvedSample::new(Arc::clone(&thread), location, raw.period)
            .with_weight(raw.weight)
            .with_parent(parent);
        if self.config.use_callchain {
            sample = sample.with_callchain(cursor);
        }
        if let Some(txn) = raw.transaction {
            sample = sample.with_transaction(txn);
        }
        if let Some(mem) = &raw.mem {
            let iaddr = sample.location.clone();
            let daddr = self.machine.resolve(&thread, raw.cpumode, mem.daddr);
            sample = sample.with_mem(MemInfo {
                iaddr,
                daddr,
                source: mem.source,
            });
        }

        let samples = match (&raw.branch_stack, self.branch_mode) {
            (Some(branches), true) => branches
                .iter()
                .map(|entry| {
                    let info = self.branch_info(&thread, raw.cpumode, entry);
                    let mut per_branch = sample.clone().with_branch(info);
                    per_branch.period = 1;
                    per_branch.weight = 1;
                    per_branch
                })
                .collect(),
            _ => vec![sample],
        };
        self.stats.resolved += samples.len() as u64;
        Ok(samples)
    }

    fn branch_info(&self, thread: &Thread, cpumode: CpuMode, entry: &BranchEntry) -> BranchInfo {
        BranchInfo {
            from: self.machine.resolve(thread, cpumode, entry.from),
            to: self.machine.resolve(thread, cpumode, entry.to),
            flags: entry.flags,
        }
    }

    /// Build the cursor and find the parent symbol.
    fn resolve_callchain(
        &mut self,
        thread: &Thread,
        raw: &RawSample,
    ) -> Result<(CallchainCursor, Option<Arc<Symbol>>), PipelineError> {
        let config = Arc::clone(&self.config);
        let param = &config.callchain;
        let mut chain = self.chain_frames(thread, raw);
        if param.order == CallchainOrder::Caller {
            chain.reverse();
        }
        let branch = if param.branch_callstack {
            self.branch_frames(thread, raw)
        } else {
            Vec::new()
        };

        let ordered: Vec<ChainFrame> = match param.order {
            CallchainOrder::Callee => branch.into_iter().chain(chain).collect(),
            CallchainOrder::Caller => chain.into_iter().chain(branch).collect(),
        };

        let mut cursor = CallchainCursor::new();
        for frame in ordered {
            if cursor.len() >= param.max_stack {
                break;
            }
            if config.hide_unresolved && !frame.location.is_resolved() {
                continue;
            }
            cursor.push(frame)?;
        }

        let parent = config.parent_pattern.as_deref().and_then(|pattern| {
            cursor
                .iter()
                .filter_map(|frame| frame.location.symbol.as_ref())
                .find(|sym| sym.name.contains(pattern))
                .cloned()
        });
        Ok((cursor, parent))
    }

    /// Plain callchain frames, leaf first.
    fn chain_frames(&mut self, thread: &Thread, raw: &RawSample) -> Vec<ChainFrame> {
        let Some(ips) = &raw.callchain else {
            return Vec::new();
        };
        let mut mode = raw.cpumode;
        let mut frames = Vec::with_capacity(ips.len());
        for &ip in ips {
            if is_context_marker(ip) {
                match CpuMode::from_context(ip) {
                    Some(next) => mode = next,
                    None => {
                        debug!("skipping unknown callchain context {ip:#x} (tid {})", raw.tid);
                        self.stats.bad_markers += 1;
                    }
                }
                continue;
            }
            frames.push(ChainFrame::new(self.machine.resolve(thread, mode, ip)));
        }
        frames
    }

    /// Branch-stack frames after loop removal, newest first.
    ///
    /// Each branch contributes its target and then its source.
    fn branch_frames(&mut self, thread: &Thread, raw: &RawSample) -> Vec<ChainFrame> {
        let Some(stack) = &raw.branch_stack else {
            return Vec::new();
        };
        if stack.len() > self.config.max_branch_depth {
            warn!(
                "dropping branch stack of depth {} (limit {}) for tid {}",
                stack.len(),
                self.config.max_branch_depth,
                raw.tid
            );
            self.stats.oversized_branch_stacks += 1;
            return Vec::new();
        }

        let mut entries = stack.clone();
        if self.config.callchain.order == CallchainOrder::Caller {
            entries.reverse();
        }
        let iterations = remove_loops(&mut entries, self.config.loop_hash_size);
        self.stats.loop_entries_removed += (stack.len() - entries.len()) as u64;

        let mut frames = Vec::with_capacity(entries.len() * 2);
        for (entry, iters) in entries.iter().zip(iterations) {
            let to = self.machine.resolve(thread, raw.cpumode, entry.to);
            let from = self.machine.resolve(thread, raw.cpumode, entry.from);
            frames.push(
                ChainFrame::new(to)
                    .with_branch(entry.flags, 0)
                    .with_iterations(iters),
            );
            frames.push(ChainFrame::new(from).with_branch(entry.flags, entry.to));
        }
        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::StaticMachine;
    use perfhist_common::{
        DataSource, MemLevel, MemOp, RawMemAccess, PERF_CONTEXT_GUEST, PERF_CONTEXT_KERNEL,
        PERF_CONTEXT_USER,
    };

    fn create_test_machine() -> Arc<dyn Machine> {
        let mut machine = StaticMachine::new();
        machine.add_thread(Pid(10), Tid(11), "app");
        machine.add_map(Some(Pid(10)), 0x1000, 0x2000, 0, "app").unwrap();
        machine.add_symbol("app", 0x000, 0x100, "main");
        machine.add_symbol("app", 0x100, 0x200, "work");
        machine.add_symbol("app", 0x200, 0x300, "sys_helper");
        machine.add_map(None, 0xffff_0000, 0xffff_1000, 0, "[kernel]").unwrap();
        machine.add_symbol("[kernel]", 0x0, 0x1000, "do_syscall");
        Arc::new(machine)
    }

    fn processor(builder: crate::config::ReportConfigBuilder) -> SampleProcessor {
        SampleProcessor::new(create_test_machine(), Arc::new(builder.build().unwrap()))
    }

    fn raw(ip: u64) -> RawSample {
        RawSample {
            pid: 10,
            tid: 11,
            ip,
            period: 100,
            ..RawSample::default()
        }
    }

    fn names(sample: &ResolvedSample) -> Vec<String> {
        sample
            .callchain
            .as_ref()
            .unwrap()
            .iter()
            .map(|f| f.location.display_name())
            .collect()
    }

    #[test]
    fn test_unknown_thread_is_reported() {
        let mut proc = processor(ReportConfig::builder());
        let mut sample = raw(0x1010);
        sample.tid = 99;
        assert!(matches!(
            proc.process(&sample),
            Err(PipelineError::UnknownThread { tid: Tid(99), .. })
        ));
        assert_eq!(proc.stats.unknown_thread, 1);
    }

    #[test]
    fn test_context_markers_switch_mode() {
        let mut proc = processor(ReportConfig::builder().callchain("graph"));
        let mut sample = raw(0x1110);
        sample.callchain = Some(vec![
            PERF_CONTEXT_KERNEL,
            0xffff_0010,
            PERF_CONTEXT_GUEST,
            PERF_CONTEXT_USER,
            0x1110,
            0x1010,
        ]);
        let resolved = proc.process(&sample).unwrap().remove(0);
        assert_eq!(names(&resolved), vec!["do_syscall", "work", "main"]);
        let chain = resolved.callchain.unwrap();
        assert_eq!(chain.frames()[0].location.cpumode, CpuMode::Kernel);
        assert_eq!(chain.frames()[1].location.cpumode, CpuMode::User);
        assert_eq!(proc.stats.bad_markers, 1);
    }

    #[test]
    fn test_caller_order_reverses_chain() {
        let mut proc = processor(ReportConfig::builder().callchain("graph,0.5,caller"));
        let mut sample = raw(0x1110);
        sample.callchain = Some(vec![0x1110, 0x1010]);
        let resolved = proc.process(&sample).unwrap().remove(0);
        assert_eq!(names(&resolved), vec!["main", "work"]);
    }

    #[test]
    fn test_parent_and_hide_unresolved() {
        let mut proc = processor(
            ReportConfig::builder()
                .callchain("graph")
                .parent("sys_", false)
                .hide_unresolved(true),
        );
        let mut sample = raw(0x1110);
        sample.callchain = Some(vec![0x1110, 0x9999, 0x1210, 0x1010]);
        let resolved = proc.process(&sample).unwrap().remove(0);
        assert_eq!(names(&resolved), vec!["work", "sys_helper", "main"]);
        assert_eq!(resolved.parent.unwrap().name, "sys_helper");
    }

    #[test]
    fn test_branch_callstack_removes_loops() {
        let mut proc = processor(ReportConfig::builder().callchain("graph,branch"));
        let mut sample = raw(0x1010);
        sample.branch_stack = Some(vec![
            BranchEntry::new(0x1010, 0x1110),
            BranchEntry::new(0x1110, 0x1010),
            BranchEntry::new(0x1010, 0x1110),
            BranchEntry::new(0x1110, 0x1010),
        ]);
        let resolved = proc.process(&sample).unwrap().remove(0);
        let chain = resolved.callchain.unwrap();
        assert_eq!(chain.len(), 4);
        assert!(chain.iter().all(|f| f.branch.is_some()));
        assert_eq!(chain.frames()[0].iterations.count, 2);
        assert_eq!(proc.stats.loop_entries_removed, 2);
    }

    #[test]
    fn test_oversized_branch_stack_is_dropped() {
        let mut proc = processor(ReportConfig::builder().callchain("graph,branch").max_branch_depth(2));
        let mut sample = raw(0x1010);
        sample.branch_stack = Some(vec![BranchEntry::new(1, 2); 3]);
        let resolved = proc.process(&sample).unwrap().remove(0);
        assert!(resolved.callchain.unwrap().is_empty());
        assert_eq!(proc.stats.oversized_branch_stacks, 1);
    }

    #[test]
    fn test_branch_mode_splits_sample() {
        let mut proc = processor(ReportConfig::builder().sort("sym_from,sym_to"));
        let mut sample = raw(0x1010);
        sample.branch_stack = Some(vec![
            BranchEntry::new(0x1010, 0x1110),
            BranchEntry::new(0x1110, 0x1210),
        ]);
        let resolved = proc.process(&sample).unwrap();
        assert_eq!(resolved.len(), 2);
        assert!(resolved.iter().all(|s| s.period == 1));
        assert_eq!(resolved[1].branch.as_ref().unwrap().to.display_name(), "sys_helper");
        assert_eq!(proc.stats.resolved, 2);
    }

    #[test]
    fn test_memory_access_resolved() {
        let mut proc = processor(ReportConfig::builder().sort("dcacheline"));
        let mut sample = raw(0x1010);
        sample.mem = Some(RawMemAccess {
            daddr: 0x1250,
            source: DataSource {
                op: MemOp::Load,
                level: MemLevel::L1,
                ..DataSource::default()
            },
        });
        let resolved = proc.process(&sample).unwrap().remove(0);
        let mem = resolved.mem.unwrap();
        assert_eq!(mem.daddr.display_name(), "sys_helper");
        assert_eq!(mem.iaddr.display_name(), "main");
        assert!(resolved.callchain.is_none());
    }
}
