//! Built-in sort keys.
//!
//! Identity keys order ascending and bucket by the same fields. Metric keys
//! order by descending value and never split buckets.

use std::cmp::Ordering;

use perfhist_common::TxnFlags;

use crate::hist::HistEntry;
use crate::machine::AddrLocation;

use super::SortKey;

/// Names accepted by [`key_by_name`].
pub const KEY_NAMES: [&str; 21] = [
    "comm",
    "pid",
    "dso",
    "symbol",
    "parent",
    "cpumode",
    "srcline",
    "dcacheline",
    "offset",
    "iaddr",
    "sym_from",
    "sym_to",
    "transaction",
    "period",
    "sample",
    "weight",
    "tot_hitm",
    "lcl_hitm",
    "rmt_hitm",
    "stores",
    "loads",
];

/// Look up a key by its sort-spec name.
#[must_use]
pub fn key_by_name(name: &str, cacheline_size: u64) -> Option<Box<dyn SortKey>> {
    let key: Box<dyn SortKey> = match name {
        "comm" => Box::new(CommKey),
        "pid" => Box::new(PidKey),
        "dso" => Box::new(DsoKey),
        "symbol" => Box::new(SymbolKey),
        "parent" => Box::new(ParentKey),
        "cpumode" => Box::new(CpuModeKey),
        "srcline" => Box::new(SrclineKey),
        "dcacheline" => Box::new(DcachelineKey {
            size: cacheline_size,
        }),
        "offset" => Box::new(OffsetKey {
            size: cacheline_size,
        }),
        "iaddr" => Box::new(IaddrKey),
        "sym_from" => Box::new(BranchSymbolKey { to: false }),
        "sym_to" => Box::new(BranchSymbolKey { to: true }),
        "transaction" => Box::new(TransactionKey),
        "period" => Box::new(MetricKey::new("period", "Period", |e| e.stat().period)),
        "sample" => Box::new(MetricKey::new("sample", "Samples", |e| e.stat().nr_events)),
        "weight" => Box::new(MetricKey::new("weight", "Weight", |e| e.stat().weight)),
        "tot_hitm" => Box::new(MetricKey::new("tot_hitm", "Tot Hitm", |e| {
            e.mem_stat().tot_hitm
        })),
        "lcl_hitm" => Box::new(MetricKey::new("lcl_hitm", "Lcl Hitm", |e| {
            e.mem_stat().lcl_hitm
        })),
        "rmt_hitm" => Box::new(MetricKey::new("rmt_hitm", "Rmt Hitm", |e| {
            e.mem_stat().rmt_hitm
        })),
        "stores" => Box::new(MetricKey::new("stores", "Stores", |e| e.mem_stat().stores)),
        "loads" => Box::new(MetricKey::new("loads", "Loads", |e| e.mem_stat().loads)),
        _ => return None,
    };
    Some(key)
}

// =============================================================================
// COMPARISON HELPERS
// =============================================================================

/// Present values order before absent ones.
fn cmp_option<T>(left: Option<T>, right: Option<T>, f: impl FnOnce(T, T) -> Ordering) -> Ordering {
    match (left, right) {
        (Some(l), Some(r)) => f(l, r),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn cmp_dso(left: &AddrLocation, right: &AddrLocation) -> Ordering {
    cmp_option(left.dso(), right.dso(), |l, r| l.name.cmp(&r.name))
}

/// DSO, then symbol; unresolved addresses order by address.
fn cmp_symbol(left: &AddrLocation, right: &AddrLocation) -> Ordering {
    cmp_dso(left, right).then_with(|| match (&left.symbol, &right.symbol) {
        (Some(l), Some(r)) => l.start.cmp(&r.start).then_with(|| l.name.cmp(&r.name)),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => left.map_addr().cmp(&right.map_addr()),
    })
}

fn format_symbol(location: &AddrLocation) -> String {
    format!("[{}] {}", location.level(), location.display_name())
}

// =============================================================================
// IDENTITY KEYS
// =============================================================================

#[derive(Debug)]
struct CommKey;

impl SortKey for CommKey {
    fn name(&self) -> &'static str {
        "comm"
    }

    fn header(&self) -> &'static str {
        "Command"
    }

    fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        left.thread().comm.cmp(&right.thread().comm)
    }

    fn format(&self, entry: &HistEntry) -> String {
        entry.thread().comm.clone()
    }
}

#[derive(Debug)]
struct PidKey;

impl SortKey for PidKey {
    fn name(&self) -> &'static str {
        "pid"
    }

    fn header(&self) -> &'static str {
        "Pid:Command"
    }

    fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        let (l, r) = (left.thread(), right.thread());
        l.tid.cmp(&r.tid).then_with(|| l.pid.cmp(&r.pid))
    }

    fn format(&self, entry: &HistEntry) -> String {
        entry.thread().to_string()
    }
}

#[derive(Debug)]
struct DsoKey;

impl SortKey for DsoKey {
    fn name(&self) -> &'static str {
        "dso"
    }

    fn header(&self) -> &'static str {
        "Shared Object"
    }

    fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        cmp_dso(left.location(), right.location())
    }

    fn format(&self, entry: &HistEntry) -> String {
        entry
            .location()
            .dso()
            .map_or_else(|| "[unknown]".to_string(), |dso| dso.short_name().to_string())
    }
}

#[derive(Debug)]
struct SymbolKey;

impl SortKey for SymbolKey {
    fn name(&self) -> &'static str {
        "symbol"
    }

    fn header(&self) -> &'static str {
        "Symbol"
    }

    fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        cmp_symbol(left.location(), right.location())
    }

    fn format(&self, entry: &HistEntry) -> String {
        format_symbol(entry.location())
    }
}

#[derive(Debug)]
struct ParentKey;

impl SortKey for ParentKey {
    fn name(&self) -> &'static str {
        "parent"
    }

    fn header(&self) -> &'static str {
        "Parent symbol"
    }

    fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        cmp_option(left.parent(), right.parent(), |l, r| l.name.cmp(&r.name))
    }

    fn format(&self, entry: &HistEntry) -> String {
        entry
            .parent()
            .map_or_else(|| "[other]".to_string(), |sym| sym.name.clone())
    }
}

#[derive(Debug)]
struct CpuModeKey;

impl SortKey for CpuModeKey {
    fn name(&self) -> &'static str {
        "cpumode"
    }

    fn header(&self) -> &'static str {
        "Mode"
    }

    fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        left.location().cpumode.cmp(&right.location().cpumode)
    }

    fn format(&self, entry: &HistEntry) -> String {
        entry.location().cpumode.to_string()
    }
}

/// Sorts by instruction address, buckets by source line when known.
#[derive(Debug)]
struct SrclineKey;

impl SortKey for SrclineKey {
    fn name(&self) -> &'static str {
        "srcline"
    }

    fn header(&self) -> &'static str {
        "Source:Line"
    }

    fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        let (l, r) = (left.location(), right.location());
        cmp_dso(l, r).then_with(|| l.map_addr().cmp(&r.map_addr()))
    }

    fn collapse(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        let (l, r) = (left.location(), right.location());
        match (&l.srcline, &r.srcline) {
            (Some(a), Some(b)) => a.cmp(b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.cmp(left, right),
        }
    }

    fn has_collapse(&self) -> bool {
        true
    }

    fn format(&self, entry: &HistEntry) -> String {
        let location = entry.location();
        match &location.srcline {
            Some(line) => line.to_string(),
            None => format!("{:#x}", location.map_addr()),
        }
    }
}

#[derive(Debug)]
struct DcachelineKey {
    size: u64,
}

impl DcachelineKey {
    fn line(&self, entry: &HistEntry) -> Option<u64> {
        entry.mem().map(|mem| mem.daddr.addr & !(self.size - 1))
    }
}

impl SortKey for DcachelineKey {
    fn name(&self) -> &'static str {
        "dcacheline"
    }

    fn header(&self) -> &'static str {
        "Data Cacheline"
    }

    fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        cmp_option(self.line(left), self.line(right), |l, r| l.cmp(&r))
    }

    fn format(&self, entry: &HistEntry) -> String {
        self.line(entry)
            .map_or_else(|| "[none]".to_string(), |line| format!("{line:#x}"))
    }
}

#[derive(Debug)]
struct OffsetKey {
    size: u64,
}

impl OffsetKey {
    fn offset(&self, entry: &HistEntry) -> Option<u64> {
        entry.mem().map(|mem| mem.daddr.addr & (self.size - 1))
    }
}

impl SortKey for OffsetKey {
    fn name(&self) -> &'static str {
        "offset"
    }

    fn header(&self) -> &'static str {
        "Offset"
    }

    fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        cmp_option(self.offset(left), self.offset(right), |l, r| l.cmp(&r))
    }

    fn format(&self, entry: &HistEntry) -> String {
        self.offset(entry)
            .map_or_else(|| "[none]".to_string(), |offset| format!("{offset:#x}"))
    }
}

/// Instruction address of the access (the sample IP without memory info).
#[derive(Debug)]
struct IaddrKey;

fn iaddr(entry: &HistEntry) -> &AddrLocation {
    entry.mem().map_or(entry.location(), |mem| &mem.iaddr)
}

impl SortKey for IaddrKey {
    fn name(&self) -> &'static str {
        "iaddr"
    }

    fn header(&self) -> &'static str {
        "Code address"
    }

    fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        iaddr(left).addr.cmp(&iaddr(right).addr)
    }

    fn format(&self, entry: &HistEntry) -> String {
        let location = iaddr(entry);
        format!("{:#x} {}", location.addr, location.display_name())
    }
}

#[derive(Debug)]
struct BranchSymbolKey {
    to: bool,
}

impl BranchSymbolKey {
    fn side<'a>(&self, entry: &'a HistEntry) -> Option<&'a AddrLocation> {
        entry
            .branch()
            .map(|branch| if self.to { &branch.to } else { &branch.from })
    }
}

impl SortKey for BranchSymbolKey {
    fn name(&self) -> &'static str {
        if self.to {
            "sym_to"
        } else {
            "sym_from"
        }
    }

    fn header(&self) -> &'static str {
        if self.to {
            "Target Symbol"
        } else {
            "Source Symbol"
        }
    }

    fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        cmp_option(self.side(left), self.side(right), cmp_symbol)
    }

    fn format(&self, entry: &HistEntry) -> String {
        self.side(entry)
            .map_or_else(|| "[none]".to_string(), format_symbol)
    }
}

/// Transactional-memory abort classification, bucketed by the raw word.
#[derive(Debug)]
struct TransactionKey;

const TXN_LABELS: [(TxnFlags, &str); 8] = [
    (TxnFlags::ELISION, "EL"),
    (TxnFlags::TRANSACTION, "TX"),
    (TxnFlags::SYNC, "SYNC"),
    (TxnFlags::ASYNC, "ASYNC"),
    (TxnFlags::RETRY, "RETRY"),
    (TxnFlags::CONFLICT, "CON"),
    (TxnFlags::CAPACITY_WRITE, "CAP-WRITE"),
    (TxnFlags::CAPACITY_READ, "CAP-READ"),
];

fn format_transaction(raw: u64) -> String {
    let (flags, abort_code) = TxnFlags::decode(raw);
    let mut labels: Vec<&str> = TXN_LABELS
        .iter()
        .filter(|(flag, _)| flags.contains(*flag))
        .map(|&(_, label)| label)
        .collect();
    if !flags.intersects(TxnFlags::ELISION | TxnFlags::TRANSACTION) {
        labels.push("NEITHER");
    }
    let text = labels.join(" ");
    if abort_code == 0 {
        text
    } else {
        format!("{text}:{abort_code:x}")
    }
}

impl SortKey for TransactionKey {
    fn name(&self) -> &'static str {
        "transaction"
    }

    fn header(&self) -> &'static str {
        "Transaction"
    }

    fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        cmp_option(left.transaction(), right.transaction(), |l, r| l.cmp(&r))
    }

    fn format(&self, entry: &HistEntry) -> String {
        entry
            .transaction()
            .map_or_else(|| "[none]".to_string(), format_transaction)
    }
}

// =============================================================================
// METRIC KEYS
// =============================================================================

/// Orders by a counter, largest first.
struct MetricKey {
    name: &'static str,
    header: &'static str,
    value: fn(&HistEntry) -> u64,
}

impl MetricKey {
    fn new(name: &'static str, header: &'static str, value: fn(&HistEntry) -> u64) -> Self {
        Self {
            name,
            header,
            value,
        }
    }
}

impl std::fmt::Debug for MetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricKey").field("name", &self.name).finish()
    }
}

impl SortKey for MetricKey {
    fn name(&self) -> &'static str {
        self.name
    }

    fn header(&self) -> &'static str {
        self.header
    }

    fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        (self.value)(right).cmp(&(self.value)(left))
    }

    fn collapse(&self, _left: &HistEntry, _right: &HistEntry) -> Ordering {
        Ordering::Equal
    }

    fn has_collapse(&self) -> bool {
        true
    }

    fn is_metric(&self) -> bool {
        true
    }

    fn format(&self, entry: &HistEntry) -> String {
        (self.value)(entry).to_string()
    }
}
