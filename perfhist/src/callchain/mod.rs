//! # Callchains
//!
//! Per-entry call-graph aggregation.
//!
//! ```text
//! RawSample.callchain ──► SampleProcessor ──► CallchainCursor
//! RawSample.branch_stack ─► remove_loops ──┘        │
//!                                                   ▼
//!                                  CallchainRoot::append (per entry)
//!                                                   │
//!                         collapse ──► CallchainRoot::merge
//!                                                   │
//!                                                   ▼
//!                        graph() / flat_paths() / folded()
//! ```
//!
//! - [`cursor`]: resolved frames of one sample
//! - [`loops`]: loop removal for branch-stack chains
//! - [`tree`]: the merged, hit-ranked tree
//! - [`traverse`]: lazy, restartable read-only walks

pub mod cursor;
pub mod loops;
pub mod traverse;
pub mod tree;

pub use cursor::{CallchainCursor, ChainFrame};
pub use loops::{remove_loops, LoopIterations};
pub use traverse::{FlatPath, GraphIter, GraphRow};
pub use tree::{CallchainNode, CallchainRoot, NodeFrame};
