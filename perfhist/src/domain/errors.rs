//! Structured error types for perfhist
//!
//! Using thiserror for automatic Display implementation and error chaining.

use std::collections::TryReserveError;

use super::types::{EntryId, Pid, Tid};
use thiserror::Error;

/// Failures of the aggregation engine itself.
#[derive(Error, Debug)]
pub enum HistError {
    #[error("Out of memory while growing {what}")]
    Alloc {
        what: &'static str,
        #[source]
        source: TryReserveError,
    },

    #[error("Histogram entry {0} not found")]
    UnknownEntry(EntryId),

    #[error("Event index {index} out of range ({count} events configured)")]
    UnknownEvent { index: usize, count: usize },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Reserve room for `additional` more elements, mapping exhaustion to
/// [`HistError::Alloc`].
pub(crate) fn try_grow<T>(
    vec: &mut Vec<T>,
    additional: usize,
    what: &'static str,
) -> Result<(), HistError> {
    vec.try_reserve(additional)
        .map_err(|source| HistError::Alloc { what, source })
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Unknown sort key: {0}")]
    UnknownSortKey(String),

    #[error("Sort key list is empty")]
    EmptySortKeys,

    #[error("Sort key list '{0}' has no key that separates entries")]
    NoIdentitySortKey(String),

    #[error("Invalid callchain option: {0}")]
    InvalidCallchainOption(String),

    #[error("Invalid decay factor {numerator}/{denominator} (need 0 <= n < d)")]
    InvalidDecay { numerator: u64, denominator: u64 },

    #[error("Invalid loop hash size {0} (must be non-zero)")]
    InvalidLoopHashSize(usize),

    #[error("Invalid branch depth {0} (must be below 255)")]
    InvalidBranchDepth(usize),

    #[error("Invalid cacheline size {0} (must be a power of two)")]
    InvalidCachelineSize(u64),
}

#[derive(Error, Debug)]
pub enum ReplayError {
    #[error("Failed to read replay file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse replay file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Sample {sample} refers to event {event}, but only {count} events are declared")]
    UnknownEvent {
        sample: usize,
        event: usize,
        count: usize,
    },

    #[error("Map {start:#x}-{end:#x} of {dso} is empty or inverted")]
    InvalidMap { start: u64, end: u64, dso: String },
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Ingestion aborted: {0}")]
    Hist(#[from] HistError),

    #[error("Producer thread {0} panicked")]
    ProducerPanicked(usize),

    #[error("Unknown thread {tid} in process {pid}")]
    UnknownThread { pid: Pid, tid: Tid },
}

#[derive(Error, Debug)]
pub enum ExportError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::UnknownSortKey("frobnicate".to_string());
        assert_eq!(err.to_string(), "Unknown sort key: frobnicate");
    }

    #[test]
    fn test_alloc_error_keeps_source() {
        let mut vec: Vec<u64> = Vec::new();
        let err = try_grow(&mut vec, usize::MAX, "entries").unwrap_err();
        assert!(err.to_string().contains("entries"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_unknown_thread_display() {
        let err = PipelineError::UnknownThread {
            pid: Pid(10),
            tid: Tid(11),
        };
        assert_eq!(err.to_string(), "Unknown thread TID:11 in process PID:10");
    }
}
