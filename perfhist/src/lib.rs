//! # perfhist - Sample Histograms for Recorded Profiles
//!
//! perfhist aggregates profiling samples into sorted histograms keyed by a
//! user-chosen list of sort keys (command, DSO, symbol, cacheline, ...).
//! Every bucket accumulates period, sample counts, weights and memory-access
//! statistics, and optionally a call-graph tree of the callchains that hit it.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                  Replay file (threads, maps, samples)           │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ RawSample
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Pipeline (producer threads)                                    │
//! │   SampleProcessor: thread lookup, address resolution,           │
//! │   callchain + branch stack → CallchainCursor                    │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         │ ResolvedSample
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  HistogramTable (one per event)                                 │
//! │                                                                 │
//! │  ┌──────────────┐   ┌──────────────┐   ┌──────────────┐        │
//! │  │ EntryInput   │──▶│  collapsed   │──▶│   output     │        │
//! │  │ (2 buffers)  │   │ (merge keys) │   │ (by overhead)│        │
//! │  └──────────────┘   └──────────────┘   └──────────────┘        │
//! │         decay / filters / match+link across tables              │
//! └───────────────────────┬─────────────────────────────────────────┘
//!                         ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │   display (text)   │   export (JSON)   │   c2c   │   diff        │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Structure
//!
//! ### Aggregation
//!
//! - [`hist`]: the histogram table, entries, statistics, filters, decay and
//!   cross-table matching
//! - [`sort`]: sort keys and key lists (`comm,dso,symbol`, `-key` for
//!   display-only columns)
//! - [`callchain`]: per-entry call-graph trees, branch loop removal and
//!   graph/flat/folded traversal
//!
//! ### Input
//!
//! - [`machine`]: thread and symbol resolution traits plus an in-memory model
//! - [`replay`]: JSON replay files describing a recorded session
//! - [`pipeline`]: concurrent ingestion of raw samples
//! - [`sample`]: resolved samples as they enter a table
//!
//! ### Reports
//!
//! - [`session`]: one table per event; diff and cacheline reports
//! - [`display`]: plain-text rendering
//! - [`export`]: JSON documents
//!
//! ### Plumbing
//!
//! - [`cli`]: argument parsing and subcommand runners
//! - [`config`]: report configuration and its builder
//! - [`domain`]: identifier newtypes and error types
//!
//! ## Typical Usage
//!
//! ```bash
//! # Overhead by DSO and symbol, with caller-ordered call graphs
//! perfhist report run.json --sort dso,symbol -g graph,0.5,caller
//!
//! # What changed between two runs
//! perfhist diff before.json after.json --displacement
//!
//! # Cachelines with the most HITM loads
//! perfhist c2c mem.json
//! ```
//!
//! ## Key Concepts
//!
//! - **Period**: weight of one sample in event units (cycles, instructions)
//! - **Collapse**: merge entries equal under the collapse keys
//! - **Decay**: periodic aging so stale entries fall out of live views
//! - **HITM**: a load that hit a modified line in another core's cache
//! - **Placeholder**: an entry created in one table to pair with another

pub mod callchain;
pub mod cli;
pub mod config;
pub mod display;
pub mod domain;
pub mod export;
pub mod hist;
pub mod machine;
pub mod pipeline;
pub mod replay;
pub mod sample;
pub mod session;
pub mod sort;
