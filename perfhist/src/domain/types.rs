//! Newtype wrappers for identifiers
//!
//! Distinct types for process ids, thread ids and histogram entry handles so
//! they cannot be swapped by accident in function signatures.

use std::fmt;

use serde::Serialize;

/// Process ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PID:{}", self.0)
    }
}

/// Thread ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tid(pub i32);

impl fmt::Display for Tid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TID:{}", self.0)
    }
}

/// Stable handle of a histogram entry.
///
/// Assigned once when the entry is created and never reused within a table.
/// When collapse merges two entries the older bucket keeps its id. Pair
/// links between two tables are recorded as `EntryId`s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Pid(42).to_string(), "PID:42");
        assert_eq!(Tid(7).to_string(), "TID:7");
        assert_eq!(EntryId(3).to_string(), "#3");
    }

    #[test]
    fn test_entry_ids_order_by_creation() {
        assert!(EntryId(1) < EntryId(2));
    }
}
