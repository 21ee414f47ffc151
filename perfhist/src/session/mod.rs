//! # Report Sessions
//!
//! A [`ReportSession`] owns one [`HistogramTable`] per recorded event and
//! runs the maintenance cycle over all of them. Two sessions can be diffed
//! ([`diff`]); memory samples can additionally be broken down per cacheline
//! ([`c2c`]).

pub mod c2c;
pub mod diff;

use std::sync::Arc;

use log::info;

use crate::config::ReportConfig;
use crate::domain::{EntryId, HistError};
use crate::hist::{EntryInput, HistogramTable};
use crate::pipeline::ProcessingStats;
use crate::sample::ResolvedSample;

pub use c2c::CachelineReport;
pub use diff::{DiffReport, DiffRow};

/// Histogram of one event.
#[derive(Debug)]
pub struct EventHists {
    name: String,
    table: HistogramTable,
}

impl EventHists {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn table(&self) -> &HistogramTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut HistogramTable {
        &mut self.table
    }
}

#[derive(Debug)]
pub struct ReportSession {
    config: Arc<ReportConfig>,
    events: Vec<EventHists>,
    stats: ProcessingStats,
}

impl ReportSession {
    /// One empty table per event name, all sharing `config`.
    pub fn new<I, S>(config: Arc<ReportConfig>, event_names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let events = event_names
            .into_iter()
            .map(|name| EventHists {
                name: name.into(),
                table: HistogramTable::new(Arc::clone(&config)),
            })
            .collect();
        Self {
            config,
            events,
            stats: ProcessingStats::default(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &Arc<ReportConfig> {
        &self.config
    }

    #[must_use]
    pub fn events(&self) -> &[EventHists] {
        &self.events
    }

    pub fn event(&self, index: usize) -> Result<&EventHists, HistError> {
        self.events.get(index).ok_or(HistError::UnknownEvent {
            index,
            count: self.events.len(),
        })
    }

    pub fn event_mut(&mut self, index: usize) -> Result<&mut EventHists, HistError> {
        let count = self.events.len();
        self.events
            .get_mut(index)
            .ok_or(HistError::UnknownEvent { index, count })
    }

    #[must_use]
    pub fn find_event(&self, name: &str) -> Option<&EventHists> {
        self.events.iter().find(|e| e.name == name)
    }

    /// Insertion handles in event order, for the pipeline.
    #[must_use]
    pub fn inputs(&self) -> Vec<Arc<EntryInput>> {
        self.events
            .iter()
            .map(|e| Arc::clone(e.table.input()))
            .collect()
    }

    pub fn add_sample(&self, event: usize, sample: &ResolvedSample) -> Result<EntryId, HistError> {
        self.event(event)?.table.add_entry(sample)
    }

    /// Collapse and output-resort every table.
    pub fn resort(&mut self) -> Result<(), HistError> {
        for event in &mut self.events {
            event.table.collapse_resort()?;
            event.table.output_resort()?;
        }
        Ok(())
    }

    /// Decay every table; returns the number of evicted entries.
    pub fn decay(&mut self, zap_user: bool, zap_kernel: bool) -> usize {
        self.events
            .iter_mut()
            .map(|e| e.table.decay_entries(zap_user, zap_kernel))
            .sum()
    }

    pub fn tables_mut(&mut self) -> impl Iterator<Item = &mut HistogramTable> + '_ {
        self.events.iter_mut().map(|e| &mut e.table)
    }

    #[must_use]
    pub fn stats(&self) -> &ProcessingStats {
        &self.stats
    }

    /// Fold producer statistics into the session summary.
    pub fn record_stats(&mut self, stats: &ProcessingStats) {
        self.stats.merge(stats);
        info!("session stats: {}", self.stats);
    }
}
