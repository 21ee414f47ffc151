//! In-memory machine model.
//!
//! Built once (from a replay file or by hand in tests) and then only read.
//! Maps and symbols are kept sorted by start address so lookups are a
//! binary search.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use perfhist_common::{CpuMode, Dso, Map, Symbol, Thread};

use super::{AddrLocation, SymbolResolver, ThreadModel};
use crate::domain::{Pid, ReplayError, Tid};

#[derive(Debug, Default)]
pub struct StaticMachine {
    threads: HashMap<Tid, Arc<Thread>>,
    user_maps: HashMap<Pid, Vec<Arc<Map>>>,
    /// Shared by every thread.
    kernel_maps: Vec<Arc<Map>>,
    dsos: HashMap<String, Arc<Dso>>,
    /// DSO name → symbols sorted by start.
    symbols: HashMap<String, Vec<Arc<Symbol>>>,
    /// DSO name → `(start, "file:line")` sorted by start.
    lines: HashMap<String, Vec<(u64, Arc<str>)>>,
}

impl StaticMachine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_thread(&mut self, pid: Pid, tid: Tid, comm: &str) -> Arc<Thread> {
        let thread = Arc::new(Thread::new(pid.0, tid.0, comm));
        self.threads.insert(tid, Arc::clone(&thread));
        thread
    }

    /// Map `dso_name` at `start..end`. `owner == None` adds a kernel map.
    pub fn add_map(
        &mut self,
        owner: Option<Pid>,
        start: u64,
        end: u64,
        pgoff: u64,
        dso_name: &str,
    ) -> Result<Arc<Map>, ReplayError> {
        if end <= start {
            return Err(ReplayError::InvalidMap {
                start,
                end,
                dso: dso_name.to_string(),
            });
        }
        let dso = Arc::clone(
            self.dsos
                .entry(dso_name.to_string())
                .or_insert_with(|| Arc::new(Dso::new(dso_name, owner.is_none()))),
        );
        let map = Arc::new(Map {
            start,
            end,
            pgoff,
            dso,
        });
        let maps = match owner {
            Some(pid) => self.user_maps.entry(pid).or_default(),
            None => &mut self.kernel_maps,
        };
        let pos = maps.partition_point(|m| m.start < start);
        maps.insert(pos, Arc::clone(&map));
        Ok(map)
    }

    /// Add a DSO-relative symbol.
    pub fn add_symbol(&mut self, dso_name: &str, start: u64, end: u64, name: &str) {
        let symbols = self.symbols.entry(dso_name.to_string()).or_default();
        let pos = symbols.partition_point(|s| s.start < start);
        symbols.insert(pos, Arc::new(Symbol::new(start, end, name)));
    }

    /// Attribute DSO-relative addresses from `start` up to the next line
    /// record to `srcline`.
    pub fn add_line(&mut self, dso_name: &str, start: u64, srcline: &str) {
        let lines = self.lines.entry(dso_name.to_string()).or_default();
        let pos = lines.partition_point(|(s, _)| *s < start);
        lines.insert(pos, (start, Arc::from(srcline)));
    }

    #[must_use]
    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    fn find_map(&self, pid: Pid, cpumode: CpuMode, addr: u64) -> Option<&Arc<Map>> {
        let maps = if cpumode.is_kernel() {
            &self.kernel_maps
        } else {
            self.user_maps.get(&pid)?
        };
        let idx = maps.partition_point(|m| m.start <= addr).checked_sub(1)?;
        maps.get(idx).filter(|m| m.contains(addr))
    }

    fn find_symbol(&self, dso: &Dso, rel: u64) -> Option<&Arc<Symbol>> {
        let symbols = self.symbols.get(&dso.name)?;
        let idx = symbols.partition_point(|s| s.start <= rel).checked_sub(1)?;
        symbols.get(idx).filter(|s| s.contains(rel))
    }

    fn find_line(&self, dso: &Dso, rel: u64) -> Option<&Arc<str>> {
        let lines = self.lines.get(&dso.name)?;
        let idx = lines.partition_point(|(s, _)| *s <= rel).checked_sub(1)?;
        lines.get(idx).map(|(_, line)| line)
    }
}

impl ThreadModel for StaticMachine {
    fn find_thread(&self, pid: Pid, tid: Tid) -> Option<Arc<Thread>> {
        self.threads
            .get(&tid)
            .filter(|thread| thread.pid == pid.0)
            .cloned()
    }
}

impl SymbolResolver for StaticMachine {
    fn resolve(&self, thread: &Thread, cpumode: CpuMode, addr: u64) -> AddrLocation {
        let Some(map) = self.find_map(Pid(thread.pid), cpumode, addr) else {
            debug!("No map for {addr:#x} ({cpumode}) in {thread}");
            return AddrLocation::unresolved(addr, cpumode);
        };
        let rel = map.map_ip(addr);
        let symbol = self.find_symbol(&map.dso, rel).cloned();
        let srcline = symbol
            .as_ref()
            .and_then(|_| self.find_line(&map.dso, rel))
            .cloned();
        AddrLocation {
            map: Some(Arc::clone(map)),
            symbol,
            srcline,
            addr,
            cpumode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_machine() -> StaticMachine {
        let mut machine = StaticMachine::new();
        machine.add_thread(Pid(100), Tid(101), "app");
        machine
            .add_map(Some(Pid(100)), 0x40_0000, 0x50_0000, 0, "/usr/bin/app")
            .unwrap();
        machine
            .add_map(None, 0xffff_8000_0000_0000, 0xffff_8000_1000_0000, 0, "[kernel.kallsyms]")
            .unwrap();
        machine.add_symbol("/usr/bin/app", 0x1000, 0x1100, "main");
        machine.add_symbol("/usr/bin/app", 0x1100, 0x1200, "work");
        machine.add_symbol("[kernel.kallsyms]", 0x100, 0x200, "schedule");
        machine
    }

    #[test]
    fn test_find_thread_checks_pid() {
        let machine = create_test_machine();
        assert!(machine.find_thread(Pid(100), Tid(101)).is_some());
        assert!(machine.find_thread(Pid(999), Tid(101)).is_none());
        assert!(machine.find_thread(Pid(100), Tid(5)).is_none());
    }

    #[test]
    fn test_resolve_user_symbol() {
        let machine = create_test_machine();
        let thread = machine.find_thread(Pid(100), Tid(101)).unwrap();
        let loc = machine.resolve(&thread, CpuMode::User, 0x40_1150);
        assert_eq!(loc.symbol.as_ref().unwrap().name, "work");
        assert_eq!(loc.dso().unwrap().name, "/usr/bin/app");
        assert_eq!(loc.map_addr(), 0x1150);
    }

    #[test]
    fn test_kernel_maps_are_shared() {
        let mut machine = create_test_machine();
        let other = machine.add_thread(Pid(200), Tid(200), "other");
        let loc = machine.resolve(&other, CpuMode::Kernel, 0xffff_8000_0000_0150);
        assert_eq!(loc.symbol.unwrap().name, "schedule");
        assert!(loc.map.unwrap().dso.kernel);
    }

    #[test]
    fn test_unmapped_and_gap_addresses() {
        let machine = create_test_machine();
        let thread = machine.find_thread(Pid(100), Tid(101)).unwrap();
        let loc = machine.resolve(&thread, CpuMode::User, 0x10);
        assert!(loc.map.is_none());
        let gap = machine.resolve(&thread, CpuMode::User, 0x40_2000);
        assert!(gap.map.is_some());
        assert!(gap.symbol.is_none());
    }

    #[test]
    fn test_srcline_needs_symbol() {
        let mut machine = create_test_machine();
        machine.add_line("/usr/bin/app", 0x1000, "main.rs:3");
        machine.add_line("/usr/bin/app", 0x1120, "work.rs:9");
        let thread = machine.find_thread(Pid(100), Tid(101)).unwrap();
        let main = machine.resolve(&thread, CpuMode::User, 0x40_1010);
        assert_eq!(main.srcline.as_deref(), Some("main.rs:3"));
        let work = machine.resolve(&thread, CpuMode::User, 0x40_1130);
        assert_eq!(work.srcline.as_deref(), Some("work.rs:9"));
        let gap = machine.resolve(&thread, CpuMode::User, 0x40_2000);
        assert!(gap.srcline.is_none());
    }

    #[test]
    fn test_inverted_map_rejected() {
        let mut machine = StaticMachine::new();
        let err = machine.add_map(None, 0x2000, 0x1000, 0, "bad").unwrap_err();
        assert!(matches!(err, ReplayError::InvalidMap { .. }));
    }
}
