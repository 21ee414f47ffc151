//! Histogram tables.
//!
//! A [`HistogramTable`] buckets resolved samples by the configured sort keys
//! and runs the maintenance cycle a report or live view needs:
//!
//! ```text
//! add_entry ─► collapse_resort ─► output_resort ─► (filter_by_* / decay_entries)
//!  (any thread)          (single consumer thread, in this order)
//! ```
//!
//! - [`input`]: double-buffered insertion shared with producer threads
//! - [`table`]: collapse and output views, totals
//! - [`filter`]: visibility masks
//! - `decay`: aging and eviction
//! - `link`: pairing with another table for diffs

mod decay;
pub mod entry;
pub mod filter;
pub mod input;
mod link;
pub mod stat;
pub mod table;

pub use entry::HistEntry;
pub use filter::HistFilter;
pub use input::EntryInput;
pub use stat::{percent, HistStat, MemStats};
pub use table::{HistTotals, HistogramTable};
