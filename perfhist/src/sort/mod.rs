//! # Sort Keys (Aggregation Dimensions)
//!
//! A [`SortKey`] is one dimension of the histogram: it knows how to order two
//! entries for display (`cmp`), how to decide whether they belong in the same
//! bucket (`collapse`), and how to render its column (`format`).
//!
//! A [`SortKeyList`] composes keys lexicographically: the first key that
//! tells two entries apart decides.
//!
//! ```text
//! "comm,dso,symbol"
//!     │
//!     ▼
//! SortKeyList [ comm ]──[ dso ]──[ symbol ]
//!                │          │          │
//!   cmp(a, b):  Equal ──► Equal ──► Less      → Less
//! ```
//!
//! ## Collapse vs Cmp
//!
//! `collapse` is the total order of the collapsed tree and therefore must be
//! a strict weak ordering. Most keys use the same function for both. Metric
//! keys (`period`, `tot_hitm`, ...) order entries by value but never split
//! buckets, so their `collapse` is always `Equal`. A list therefore needs at
//! least one active identity key.
//!
//! ## Output Order
//!
//! [`SortKeyList::output_cmp`] is the final display order. When the list has
//! no metric key, entries are ordered by descending period first and the
//! configured keys only break ties.

pub mod keys;

use std::cmp::Ordering;
use std::fmt;

use crate::domain::ConfigError;
use crate::hist::HistEntry;

pub use keys::{key_by_name, KEY_NAMES};

/// One aggregation dimension.
pub trait SortKey: fmt::Debug + Send + Sync {
    /// Name used in sort specs (`"symbol"`).
    fn name(&self) -> &'static str;

    /// Column header.
    fn header(&self) -> &'static str;

    /// Display order of two entries.
    fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering;

    /// Bucket identity and collapsed-tree order.
    fn collapse(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        self.cmp(left, right)
    }

    /// True when `collapse` differs from `cmp`.
    fn has_collapse(&self) -> bool {
        false
    }

    /// True for value columns (period, counters) as opposed to identity columns.
    fn is_metric(&self) -> bool {
        false
    }

    /// Column text for `entry`.
    fn format(&self, entry: &HistEntry) -> String;
}

#[derive(Debug)]
struct SortEntry {
    key: Box<dyn SortKey>,
    /// Column only; takes no part in ordering or bucketing.
    skip: bool,
}

/// Ordered, immutable list of sort keys.
#[derive(Debug, Default)]
pub struct SortKeyList {
    keys: Vec<SortEntry>,
}

impl SortKeyList {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a list from a comma-separated spec such as `"comm,-dso,symbol"`.
    ///
    /// A leading `-` adds the key as a display-only column.
    pub fn parse(spec: &str, cacheline_size: u64) -> Result<Self, ConfigError> {
        let mut list = Self::new();
        for token in spec.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            let (name, skip) = match token.strip_prefix('-') {
                Some(name) => (name, true),
                None => (token, false),
            };
            let key = key_by_name(name, cacheline_size)
                .ok_or_else(|| ConfigError::UnknownSortKey(name.to_string()))?;
            list.push(key, skip);
        }
        if list.keys.is_empty() {
            return Err(ConfigError::EmptySortKeys);
        }
        if list.active().all(|key| key.is_metric()) {
            return Err(ConfigError::NoIdentitySortKey(spec.to_string()));
        }
        Ok(list)
    }

    pub fn push(&mut self, key: Box<dyn SortKey>, skip: bool) {
        self.keys.push(SortEntry { key, skip });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.keys.iter().any(|e| e.key.name() == name)
    }

    /// Every key in configured order, skipped ones included.
    pub fn columns(&self) -> impl Iterator<Item = &dyn SortKey> + '_ {
        self.keys.iter().map(|e| e.key.as_ref())
    }

    fn active(&self) -> impl Iterator<Item = &dyn SortKey> + '_ {
        self.keys.iter().filter(|e| !e.skip).map(|e| e.key.as_ref())
    }

    /// Lexicographic display comparison over the non-skipped keys.
    #[must_use]
    pub fn cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        self.active()
            .map(|key| key.cmp(left, right))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Lexicographic bucket comparison over the non-skipped keys.
    #[must_use]
    pub fn collapse(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        self.active()
            .map(|key| key.collapse(left, right))
            .find(|ord| ord.is_ne())
            .unwrap_or(Ordering::Equal)
    }

    /// Final display order.
    #[must_use]
    pub fn output_cmp(&self, left: &HistEntry, right: &HistEntry) -> Ordering {
        if self.has_metric() {
            return self.cmp(left, right);
        }
        right
            .stat()
            .period
            .cmp(&left.stat().period)
            .then_with(|| self.cmp(left, right))
    }

    /// True when some active key buckets differently from how it sorts.
    #[must_use]
    pub fn needs_collapse(&self) -> bool {
        self.active().any(|key| key.has_collapse())
    }

    #[must_use]
    pub fn has_metric(&self) -> bool {
        self.active().any(|key| key.is_metric())
    }
}

impl fmt::Display for SortKeyList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, entry) in self.keys.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            if entry.skip {
                f.write_str("-")?;
            }
            f.write_str(entry.key.name())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_round_trips_display() {
        let list = SortKeyList::parse("comm, -dso ,symbol", 64).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list.to_string(), "comm,-dso,symbol");
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            SortKeyList::parse("", 64).unwrap_err(),
            ConfigError::EmptySortKeys
        );
        assert_eq!(
            SortKeyList::parse("symbol,nope", 64).unwrap_err(),
            ConfigError::UnknownSortKey("nope".to_string())
        );
    }

    #[test]
    fn test_metric_only_lists_rejected() {
        for spec in ["period", "sample,tot_hitm", "-symbol,period"] {
            assert_eq!(
                SortKeyList::parse(spec, 64).unwrap_err(),
                ConfigError::NoIdentitySortKey(spec.to_string())
            );
        }
        assert!(SortKeyList::parse("period,-dso,comm", 64).is_ok());
    }

    #[test]
    fn test_metric_and_collapse_flags() {
        let plain = SortKeyList::parse("comm,symbol", 64).unwrap();
        assert!(!plain.has_metric());
        assert!(!plain.needs_collapse());

        let metric = SortKeyList::parse("period,symbol", 64).unwrap();
        assert!(metric.has_metric());
        assert!(metric.needs_collapse());

        let skipped = SortKeyList::parse("-period,symbol", 64).unwrap();
        assert!(!skipped.has_metric());
    }

    #[test]
    fn test_every_known_key_parses() {
        for name in KEY_NAMES {
            let spec = format!("{name},comm");
            let list = SortKeyList::parse(&spec, 64).unwrap();
            assert!(list.contains(name));
        }
    }
}
