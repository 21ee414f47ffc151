//! JSON export of finished reports.
//!
//! Each report kind has its own document type so that the shape of the file
//! says what produced it:
//!
//! - [`ReportExport`]: per-event sorted entries with optional callchains
//! - [`DiffExport`]: baseline vs new rows
//! - [`C2cExport`]: cacheline summary rows

// Percentages are display values
#![allow(clippy::cast_precision_loss)]

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use serde::Serialize;

use crate::callchain::GraphRow;
use crate::config::ReportConfig;
use crate::domain::{EntryId, ExportError};
use crate::hist::{percent, HistEntry, HistStat, HistTotals, HistogramTable};
use crate::pipeline::ProcessingStats;
use crate::session::c2c::CachelineRow;
use crate::session::{CachelineReport, DiffReport, ReportSession};

/// One displayed callchain row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallchainRowExport {
    pub depth: usize,
    /// Frames of the node; empty for the "remaining" row.
    pub frames: Vec<String>,
    pub hits: u64,
    pub percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntryExport {
    pub id: EntryId,
    pub position: usize,
    pub columns: Vec<String>,
    pub stat: HistStat,
    pub percent: f64,
    pub filtered: bool,
    pub placeholder: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub callchain: Option<Vec<CallchainRowExport>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventExport {
    pub name: String,
    pub sort: String,
    pub headers: Vec<&'static str>,
    pub totals: HistTotals,
    pub entries: Vec<EntryExport>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReportExport {
    pub stats: ProcessingStats,
    pub events: Vec<EventExport>,
}

impl ReportExport {
    /// Snapshot every event table in output order, filtered entries included.
    #[must_use]
    pub fn from_session(session: &ReportSession) -> Self {
        let events = session
            .events()
            .iter()
            .map(|event| export_table(event.name(), event.table()))
            .collect();
        Self {
            stats: *session.stats(),
            events,
        }
    }
}

fn export_table(name: &str, table: &HistogramTable) -> EventExport {
    let config = table.config();
    let total = table.totals().total_non_filtered_period;
    EventExport {
        name: name.to_string(),
        sort: config.sort.to_string(),
        headers: config.sort.columns().map(|key| key.header()).collect(),
        totals: *table.totals(),
        entries: table
            .entries()
            .map(|entry| export_entry(config, entry, total))
            .collect(),
    }
}

fn export_entry(config: &ReportConfig, entry: &HistEntry, total: u64) -> EntryExport {
    EntryExport {
        id: entry.id(),
        position: entry.position(),
        columns: config.sort.columns().map(|key| key.format(entry)).collect(),
        stat: *entry.stat(),
        percent: percent(entry.stat().period, total),
        filtered: entry.is_filtered(),
        placeholder: entry.is_placeholder(),
        callchain: entry
            .callchain()
            .filter(|_| config.use_callchain)
            .map(|root| {
                root.graph(&config.callchain, total)
                    .map(|row| callchain_row(&row))
                    .collect()
            }),
    }
}

fn callchain_row(row: &GraphRow<'_>) -> CallchainRowExport {
    let (frames, percent) = match row {
        GraphRow::Node { node, percent, .. } => {
            (node.frames().iter().map(|f| f.name()).collect(), *percent)
        }
        GraphRow::Remaining { percent, .. } => (Vec::new(), *percent),
    };
    CallchainRowExport {
        depth: row.depth(),
        frames,
        hits: row.hits(),
        percent,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DiffExport {
    pub sort: String,
    pub events: Vec<DiffReport>,
}

impl DiffExport {
    #[must_use]
    pub fn new(session: &ReportSession, reports: Vec<DiffReport>) -> Self {
        Self {
            sort: session.config().sort.to_string(),
            events: reports,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct C2cExport {
    pub cacheline_size: u64,
    pub skipped: u64,
    pub totals: crate::hist::MemStats,
    pub lines: Vec<CachelineRow>,
}

impl C2cExport {
    #[must_use]
    pub fn new(report: &CachelineReport, cacheline_size: u64) -> Self {
        Self {
            cacheline_size,
            skipped: report.skipped(),
            totals: *report.totals(),
            lines: report.rows(),
        }
    }
}

/// Pretty-print `doc` to `path`.
pub fn write_json<T: Serialize>(doc: &T, path: &Path) -> Result<(), ExportError> {
    let mut writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut writer, doc)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}
