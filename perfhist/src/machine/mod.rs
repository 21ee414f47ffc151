//! # Machine Model (Thread and Address Resolution)
//!
//! The aggregation engine never parses symbol tables or walks `/proc`. It
//! queries two narrow collaborator traits instead:
//!
//! - [`ThreadModel`] - thread identity and command name for a `(pid, tid)`
//! - [`SymbolResolver`] - `(thread, cpumode, addr)` → [`AddrLocation`]
//!
//! [`StaticMachine`] implements both from an in-memory description (see
//! [`crate::replay`]). Live symbolizers plug in behind the same traits.
//!
//! ## Address Resolution
//!
//! ```text
//! addr ──► map lookup (kernel maps for kernel modes, else the pid's maps)
//!            │
//!            ▼
//!          map.map_ip(addr) ──► symbol lookup in the map's DSO
//!            │
//!            ▼
//!          AddrLocation { map, symbol, srcline, addr, cpumode }
//! ```

mod static_machine;

use std::fmt;
use std::sync::Arc;

use perfhist_common::{CpuMode, Dso, Map, Symbol, Thread};

use crate::domain::{Pid, Tid};

pub use static_machine::StaticMachine;

/// Thread lookup.
pub trait ThreadModel: Send + Sync {
    fn find_thread(&self, pid: Pid, tid: Tid) -> Option<Arc<Thread>>;
}

/// Address to map/symbol resolution.
pub trait SymbolResolver: Send + Sync {
    /// Resolve `addr` as seen by `thread` at privilege level `cpumode`.
    ///
    /// Never fails: an address outside every map comes back with `map` and
    /// `symbol` unset.
    fn resolve(&self, thread: &Thread, cpumode: CpuMode, addr: u64) -> AddrLocation;
}

/// Everything the pipeline needs from the machine model.
pub trait Machine: ThreadModel + SymbolResolver {}

impl<T: ThreadModel + SymbolResolver> Machine for T {}

/// A resolved instruction or data address.
///
/// The map and symbol are shared with the machine model; a location never
/// owns them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddrLocation {
    pub map: Option<Arc<Map>>,
    pub symbol: Option<Arc<Symbol>>,
    pub srcline: Option<Arc<str>>,
    /// Runtime (unmapped) address.
    pub addr: u64,
    pub cpumode: CpuMode,
}

impl AddrLocation {
    /// A location for `addr` that resolved to nothing.
    #[must_use]
    pub fn unresolved(addr: u64, cpumode: CpuMode) -> Self {
        Self {
            addr,
            cpumode,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn dso(&self) -> Option<&Arc<Dso>> {
        self.map.as_ref().map(|map| &map.dso)
    }

    /// Map-relative address, or the raw address when unmapped.
    #[must_use]
    pub fn map_addr(&self) -> u64 {
        self.map.as_ref().map_or(self.addr, |map| map.map_ip(self.addr))
    }

    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.symbol.is_some()
    }

    #[must_use]
    pub fn level(&self) -> char {
        self.cpumode.level()
    }

    /// Demangled symbol name, or the hex address for unresolved locations.
    #[must_use]
    pub fn display_name(&self) -> String {
        match &self.symbol {
            Some(sym) => demangle(&sym.name),
            None => format!("{:#x}", self.addr),
        }
    }
}

impl fmt::Display for AddrLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level(), self.display_name())
    }
}

/// Demangle a Rust symbol name, leaving anything else untouched.
#[must_use]
pub fn demangle(name: &str) -> String {
    match rustc_demangle::try_demangle(name) {
        Ok(demangled) => format!("{demangled:#}"),
        Err(_) => name.to_string(),
    }
}
