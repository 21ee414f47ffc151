//! Plain-text rendering of reports.
//!
//! Everything writes to a caller-supplied [`Write`] so the CLI can print to
//! stdout and tests can render into a buffer.

// Percent columns are display arithmetic
#![allow(clippy::cast_precision_loss)]

use std::io::{self, Write};

use crate::callchain::GraphRow;
use crate::config::CallchainMode;
use crate::hist::{percent, HistEntry, HistogramTable};
use crate::session::diff::DELTA_EPSILON;
use crate::session::{CachelineReport, DiffReport, ReportSession};

/// Render every event of `session` in output order, at most `limit` entries
/// per event.
pub fn write_report(
    out: &mut dyn Write,
    session: &ReportSession,
    limit: Option<usize>,
) -> io::Result<()> {
    for event in session.events() {
        let table = event.table();
        let totals = table.totals();
        writeln!(out, "# Event: {}", event.name())?;
        writeln!(
            out,
            "# Samples: {}  Total period: {}  Shown: {} of {} entries",
            totals.nr_samples, totals.total_period, totals.nr_non_filtered_entries, totals.nr_entries
        )?;
        write_header(out, table)?;
        for entry in table.visible().take(limit.unwrap_or(usize::MAX)) {
            write_entry(out, table, entry)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

fn write_header(out: &mut dyn Write, table: &HistogramTable) -> io::Result<()> {
    write!(out, "{:>9}", "Overhead")?;
    for (key, width) in table.config().sort.columns().zip(table.column_widths().iter().copied()) {
        write!(out, "  {:<width$}", key.header())?;
    }
    writeln!(out)
}

fn write_entry(out: &mut dyn Write, table: &HistogramTable, entry: &HistEntry) -> io::Result<()> {
    let total = table.totals().total_non_filtered_period;
    write!(out, "{:>8.2}%", percent(entry.stat().period, total))?;
    for (key, width) in table.config().sort.columns().zip(table.column_widths().iter().copied()) {
        write!(out, "  {:<width$}", key.format(entry))?;
    }
    writeln!(out)?;

    let config = table.config();
    let Some(root) = entry.callchain().filter(|_| config.use_callchain) else {
        return Ok(());
    };
    match config.callchain.mode {
        CallchainMode::GraphAbs | CallchainMode::GraphRel => {
            for row in root.graph(&config.callchain, total) {
                write_graph_row(out, &row)?;
            }
        }
        CallchainMode::Flat => {
            for path in root.flat_paths() {
                writeln!(out, "{:>18.2}%", percent(path.hits, total))?;
                for frame in path.frames.iter().rev() {
                    writeln!(out, "{:>20}{}", "", frame.name())?;
                }
            }
        }
        CallchainMode::Folded => {
            for line in root.folded() {
                writeln!(out, "{:>11}{line}", "")?;
            }
        }
        CallchainMode::None => {}
    }
    writeln!(out)
}

fn write_graph_row(out: &mut dyn Write, row: &GraphRow<'_>) -> io::Result<()> {
    let indent = "  ".repeat(row.depth());
    let branch = if row.is_last() { "`--" } else { "|--" };
    match row {
        GraphRow::Node { node, percent, .. } => {
            let mut frames = node.frames().iter();
            if let Some(first) = frames.next() {
                writeln!(out, "{:>11}{indent}{branch}{percent:.2}%--{}", "", first.name())?;
            }
            for frame in frames {
                writeln!(out, "{:>11}{indent}    {}", "", frame.name())?;
            }
        }
        GraphRow::Remaining { percent, .. } => {
            writeln!(out, "{:>11}{indent}{branch}{percent:.2}%--[...]", "")?;
        }
    }
    Ok(())
}

/// Render diff rows; `displacement` adds the rank-movement column.
pub fn write_diff(
    out: &mut dyn Write,
    reports: &[DiffReport],
    headers: &[&str],
    displacement: bool,
) -> io::Result<()> {
    for report in reports {
        writeln!(out, "# Event: {}", report.event)?;
        write!(out, "{:>9}  {:>9}  {:>8}", "Baseline", "New", "Delta")?;
        if displacement {
            write!(out, "  {:>6}", "Disp")?;
        }
        for header in headers {
            write!(out, "  {header}")?;
        }
        writeln!(out)?;

        for row in &report.rows {
            let baseline = if row.baseline_period == 0 && !row.placeholder {
                String::new()
            } else {
                format!("{:.2}%", row.baseline_percent)
            };
            let delta = if row.delta.abs() < DELTA_EPSILON {
                String::new()
            } else {
                format!("{:+.2}%", row.delta)
            };
            write!(out, "{baseline:>9}  {:>8.2}%  {delta:>8}", row.new_percent)?;
            if displacement {
                match row.displacement {
                    Some(d) if d != 0 => write!(out, "  {d:>+6}")?,
                    _ => write!(out, "  {:>6}", "")?,
                }
            }
            for column in &row.columns {
                write!(out, "  {column}")?;
            }
            writeln!(out)?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Render the cacheline table, each line followed by its hottest offsets.
pub fn write_c2c(out: &mut dyn Write, report: &CachelineReport) -> io::Result<()> {
    let totals = report.totals();
    writeln!(
        out,
        "# Loads: {}  Stores: {}  HITM: {} (local {}, remote {})  LLC misses: {}",
        totals.loads, totals.stores, totals.tot_hitm, totals.lcl_hitm, totals.rmt_hitm,
        totals.llc_miss()
    )?;
    writeln!(out, "# Samples without memory info: {}", report.skipped())?;
    writeln!(
        out,
        "{:>18}  {:>7}  {:>7}  {:>7}  {:>6}  {:>6}  {:>7}",
        "Cacheline", "Hitm", "LclHitm", "RmtHitm", "Loads", "Stores", "Records"
    )?;
    for row in report.rows() {
        writeln!(
            out,
            "{:>#18x}  {:>6.2}%  {:>6.2}%  {:>6.2}%  {:>6}  {:>6}  {:>7}",
            row.line,
            row.percent_hitm,
            row.percent_lcl_hitm,
            row.percent_rmt_hitm,
            row.stats.loads,
            row.stats.stores,
            row.stats.total_records()
        )?;
        if let Some(offsets) = report.offsets(row.line) {
            for entry in offsets.visible() {
                let columns: Vec<String> = offsets
                    .config()
                    .sort
                    .columns()
                    .skip(1)
                    .map(|key| key.format(entry))
                    .collect();
                writeln!(
                    out,
                    "{:>22}hitm {:>4}  loads {:>4}  stores {:>4}  {}",
                    "",
                    entry.mem_stat().tot_hitm,
                    entry.mem_stat().loads,
                    entry.mem_stat().stores,
                    columns.join("  ")
                )?;
            }
        }
    }
    Ok(())
}
