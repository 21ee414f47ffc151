//! # Shared Sample Data (Event Source ↔ Aggregation Engine)
//!
//! Defines the leaf values every other layer of perfhist is built on: the
//! unresolved [`RawSample`] produced by an event source, the machine-model
//! objects a sample resolves against ([`Thread`], [`Map`], [`Dso`],
//! [`Symbol`]), and the constants that describe raw callchains and branch
//! stacks.
//!
//! ## Key Types
//!
//! - [`RawSample`] - One recorded event, before symbol resolution
//! - [`CpuMode`] - Privilege level the sampled instruction ran at
//! - [`BranchEntry`] - One last-branch-record pair with its flags
//! - [`DataSource`] - Memory access classification for cacheline reports
//!
//! Nothing here knows how samples are aggregated; the `perfhist` crate owns
//! that. With the `serde` feature enabled, the raw types can be read from
//! replay files.

use std::fmt;
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// ============================================================================
// Callchain Context Markers
// ============================================================================

/// Marks the following callchain entries as hypervisor frames (`-32`).
pub const PERF_CONTEXT_HV: u64 = 0xffff_ffff_ffff_ffe0;

/// Marks the following callchain entries as kernel frames (`-128`).
pub const PERF_CONTEXT_KERNEL: u64 = 0xffff_ffff_ffff_ff80;

/// Marks the following callchain entries as user frames (`-512`).
pub const PERF_CONTEXT_USER: u64 = 0xffff_ffff_ffff_fe00;

/// Marks the start of a guest callchain (`-2048`).
pub const PERF_CONTEXT_GUEST: u64 = 0xffff_ffff_ffff_f800;

/// Marks the following callchain entries as guest kernel frames (`-2176`).
pub const PERF_CONTEXT_GUEST_KERNEL: u64 = 0xffff_ffff_ffff_f780;

/// Marks the following callchain entries as guest user frames (`-2560`).
pub const PERF_CONTEXT_GUEST_USER: u64 = 0xffff_ffff_ffff_f600;

/// Any callchain value at or above this is a context marker, not an address.
pub const PERF_CONTEXT_MAX: u64 = 0xffff_ffff_ffff_f001;

/// Returns true if `ip` is a context marker rather than an instruction pointer.
#[must_use]
pub fn is_context_marker(ip: u64) -> bool {
    ip >= PERF_CONTEXT_MAX
}

// ============================================================================
// Tunables
// ============================================================================

/// Deepest branch stack accepted before it is considered corrupt.
///
/// Loop removal indexes the stack with a `u8`, so this must stay below 255.
pub const MAX_BRANCH_DEPTH: usize = 127;

/// Bucket count of the loop-removal hash table.
pub const LOOP_HASH_SIZE: usize = 127;

/// Bits taken from the 64-bit address hash before bucketing.
pub const LOOP_HASH_BITS: u32 = 7;

/// Default callchain depth limit.
pub const DEFAULT_MAX_STACK: usize = 127;

/// Cacheline size used by the cacheline (c2c) dimensions.
pub const DEFAULT_CACHELINE_SIZE: u64 = 64;

// ============================================================================
// CPU Mode
// ============================================================================

/// Privilege level at which a sampled instruction executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum CpuMode {
    Kernel,
    #[default]
    User,
    GuestKernel,
    GuestUser,
    Hypervisor,
}

impl CpuMode {
    /// One-character level tag shown in symbol columns.
    ///
    /// `.` is user space; everything else is some flavour of kernel. Decay's
    /// user/kernel zapping compares against `.` only.
    #[must_use]
    pub fn level(self) -> char {
        match self {
            CpuMode::User => USER_LEVEL,
            CpuMode::Kernel => 'k',
            CpuMode::GuestKernel => 'g',
            CpuMode::GuestUser => 'u',
            CpuMode::Hypervisor => 'H',
        }
    }

    #[must_use]
    pub fn is_kernel(self) -> bool {
        matches!(self, CpuMode::Kernel | CpuMode::GuestKernel | CpuMode::Hypervisor)
    }

    #[must_use]
    pub fn is_guest(self) -> bool {
        matches!(self, CpuMode::GuestKernel | CpuMode::GuestUser)
    }

    /// Mode implied by a callchain context marker, if it is a known one.
    #[must_use]
    pub fn from_context(marker: u64) -> Option<Self> {
        match marker {
            PERF_CONTEXT_HV => Some(CpuMode::Hypervisor),
            PERF_CONTEXT_KERNEL => Some(CpuMode::Kernel),
            PERF_CONTEXT_USER => Some(CpuMode::User),
            PERF_CONTEXT_GUEST_KERNEL => Some(CpuMode::GuestKernel),
            PERF_CONTEXT_GUEST_USER => Some(CpuMode::GuestUser),
            _ => None,
        }
    }
}

/// Level tag of user-space samples.
pub const USER_LEVEL: char = '.';

impl fmt::Display for CpuMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CpuMode::Kernel => "kernel",
            CpuMode::User => "user",
            CpuMode::GuestKernel => "guest-kernel",
            CpuMode::GuestUser => "guest-user",
            CpuMode::Hypervisor => "hypervisor",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Machine Model Objects
// ============================================================================

/// A sampled thread.
///
/// Owned by the thread model; histogram entries hold `Arc` clones for the
/// lifetime of the report.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Thread {
    pub pid: i32,
    pub tid: i32,
    pub comm: String,
}

impl Thread {
    #[must_use]
    pub fn new(pid: i32, tid: i32, comm: impl Into<String>) -> Self {
        Self { pid, tid, comm: comm.into() }
    }
}

impl fmt::Display for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tid, self.comm)
    }
}

/// A binary image (executable, shared object or kernel).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Dso {
    pub name: String,
    pub kernel: bool,
}

impl Dso {
    #[must_use]
    pub fn new(name: impl Into<String>, kernel: bool) -> Self {
        Self { name: name.into(), kernel }
    }

    /// Final path component, as shown in narrow columns.
    #[must_use]
    pub fn short_name(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }
}

/// A function symbol inside a DSO, addressed in map-relative terms.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Symbol {
    pub start: u64,
    pub end: u64,
    pub name: String,
}

impl Symbol {
    #[must_use]
    pub fn new(start: u64, end: u64, name: impl Into<String>) -> Self {
        Self { start, end, name: name.into() }
    }

    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// A mapping of a DSO into a thread's address space.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Map {
    pub start: u64,
    pub end: u64,
    pub pgoff: u64,
    pub dso: Arc<Dso>,
}

impl Map {
    #[must_use]
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// Translate a runtime address into the DSO-relative address symbols use.
    #[must_use]
    pub fn map_ip(&self, addr: u64) -> u64 {
        addr.wrapping_sub(self.start).wrapping_add(self.pgoff)
    }
}

// ============================================================================
// Branch Stacks
// ============================================================================

/// Flags recorded with each last-branch-record entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct BranchFlags {
    pub mispred: bool,
    pub predicted: bool,
    pub in_tx: bool,
    pub abort: bool,
    /// Cycles since the previous branch (0 when not supported).
    pub cycles: u16,
}

/// One taken branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BranchEntry {
    pub from: u64,
    pub to: u64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub flags: BranchFlags,
}

impl BranchEntry {
    #[must_use]
    pub fn new(from: u64, to: u64) -> Self {
        Self { from, to, flags: BranchFlags::default() }
    }

    #[must_use]
    pub fn with_cycles(mut self, cycles: u16) -> Self {
        self.flags.cycles = cycles;
        self
    }
}

// ============================================================================
// Memory Access Classification
// ============================================================================

/// Kind of memory operation that was sampled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MemOp {
    Load,
    Store,
    Prefetch,
    Exec,
    #[default]
    Na,
}

/// Memory hierarchy level that satisfied the access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum MemLevel {
    L1,
    /// Line fill buffer.
    Lfb,
    L2,
    L3,
    LocalRam,
    RemoteRam,
    RemoteCache,
    Io,
    Uncached,
    #[default]
    Na,
}

impl MemLevel {
    #[must_use]
    pub fn is_remote(self) -> bool {
        matches!(self, MemLevel::RemoteRam | MemLevel::RemoteCache)
    }
}

/// Coherency snoop result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Snoop {
    None,
    Hit,
    Miss,
    /// Hit a modified line in another core's cache.
    HitM,
    #[default]
    Na,
}

/// Decoded data source of a memory sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct DataSource {
    pub op: MemOp,
    pub level: MemLevel,
    pub snoop: Snoop,
    pub locked: bool,
    /// The access missed at `level` rather than hit there.
    pub miss: bool,
}

/// Memory access attached to a raw sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RawMemAccess {
    /// Data virtual address (0 if the hardware did not record one).
    pub daddr: u64,
    #[cfg_attr(feature = "serde", serde(default))]
    pub source: DataSource,
}

// ============================================================================
// Raw Sample
// ============================================================================

/// One recorded event before symbol resolution.
///
/// `callchain` holds instruction pointers leaf first, interleaved with
/// `PERF_CONTEXT_*` markers. `branch_stack` is most recent branch first.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RawSample {
    /// Index of the event (counter) this sample belongs to.
    pub event: usize,
    pub pid: i32,
    pub tid: i32,
    pub cpu: u32,
    pub time: u64,
    pub ip: u64,
    pub cpumode: CpuMode,
    pub period: u64,
    pub weight: u64,
    pub callchain: Option<Vec<u64>>,
    pub branch_stack: Option<Vec<BranchEntry>>,
    pub mem: Option<RawMemAccess>,
    /// Raw transaction abort word; see [`TxnFlags`].
    pub transaction: Option<u64>,
}

// ============================================================================
// Transactional Memory
// ============================================================================

bitflags::bitflags! {
    /// Transaction abort classification (low 32 bits of the raw word).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TxnFlags: u64 {
        const ELISION        = 1 << 0;
        const TRANSACTION    = 1 << 1;
        const SYNC           = 1 << 2;
        const ASYNC          = 1 << 3;
        const RETRY          = 1 << 4;
        const CONFLICT       = 1 << 5;
        const CAPACITY_WRITE = 1 << 6;
        const CAPACITY_READ  = 1 << 7;
    }
}

impl TxnFlags {
    /// Split a raw transaction word into flags and the abort code.
    #[must_use]
    pub fn decode(raw: u64) -> (Self, u32) {
        #[allow(clippy::cast_possible_truncation)]
        let abort_code = (raw >> 32) as u32;
        (Self::from_bits_truncate(raw & 0xffff_ffff), abort_code)
    }
}
