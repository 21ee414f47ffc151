//! CLI argument definitions

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use perfhist_common::DEFAULT_CACHELINE_SIZE;

use crate::config::{ReportConfig, DEFAULT_SORT_ORDER};
use crate::domain::ConfigError;

#[derive(Parser, Debug)]
#[command(
    name = "perfhist",
    about = "Aggregate recorded samples into sorted histograms",
    after_help = "\
EXAMPLES:
    perfhist report run.json --sort dso,symbol -g graph,0.5,caller
    perfhist diff before.json after.json --displacement
    perfhist c2c mem.json --json c2c.json
    perfhist top run.json --refresh-ms 500 --batch 1000"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sorted histogram of a replay file
    Report(ReportArgs),
    /// Compare two replay files
    Diff(DiffArgs),
    /// Cacheline contention report of memory samples
    C2c(C2cArgs),
    /// Live-style view: replay in batches with periodic resort and decay
    Top(TopArgs),
}

/// Options shared by every histogram-producing command.
#[derive(clap::Args, Debug, Clone)]
pub struct HistArgs {
    /// Comma-separated sort keys; prefix a key with '-' to show it without sorting by it
    #[arg(short, long, default_value = DEFAULT_SORT_ORDER)]
    pub sort: String,

    /// Callchain options: mode[,min_percent[,print_limit]][,caller|callee][,function|address][,branch]
    #[arg(short = 'g', long = "call-graph", value_name = "OPTS")]
    pub call_graph: Option<String>,

    /// Symbol substring that marks a callchain frame as the parent
    #[arg(short, long, value_name = "PATTERN")]
    pub parent: Option<String>,

    /// Hide entries without a parent (requires --parent)
    #[arg(short = 'x', long, requires = "parent")]
    pub exclude_other: bool,

    /// Drop unresolved callchain frames
    #[arg(long)]
    pub hide_unresolved: bool,

    /// Cacheline size in bytes for the dcacheline and offset keys
    #[arg(long, default_value_t = DEFAULT_CACHELINE_SIZE)]
    pub cacheline_size: u64,
}

impl HistArgs {
    pub fn config(&self) -> Result<ReportConfig, ConfigError> {
        let mut builder = ReportConfig::builder()
            .sort(&self.sort)
            .hide_unresolved(self.hide_unresolved)
            .cacheline_size(self.cacheline_size);
        if let Some(opts) = &self.call_graph {
            builder = builder.callchain(opts);
        }
        if let Some(pattern) = &self.parent {
            builder = builder.parent(pattern, self.exclude_other);
        }
        builder.build()
    }
}

#[derive(clap::Args, Debug)]
pub struct ReportArgs {
    /// Replay file (JSON)
    pub file: PathBuf,

    #[command(flatten)]
    pub hist: HistArgs,

    /// Only show entries in this DSO
    #[arg(long, value_name = "NAME")]
    pub dso: Option<String>,

    /// Only show entries of this thread
    #[arg(long)]
    pub tid: Option<i32>,

    /// Only show entries whose symbol contains this string
    #[arg(long, value_name = "SUBSTR")]
    pub symbol_filter: Option<String>,

    /// Producer threads used for ingestion
    #[arg(long, default_value = "1")]
    pub producers: usize,

    /// Write the report as JSON
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct DiffArgs {
    /// Baseline replay file
    pub baseline: PathBuf,

    /// New replay file
    pub new: PathBuf,

    #[command(flatten)]
    pub hist: HistArgs,

    /// Show how far each entry moved in the ranking
    #[arg(long)]
    pub displacement: bool,

    /// Write the diff as JSON
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct C2cArgs {
    /// Replay file with memory samples
    pub file: PathBuf,

    /// Cacheline size in bytes
    #[arg(long, default_value_t = DEFAULT_CACHELINE_SIZE)]
    pub cacheline_size: u64,

    /// Write the report as JSON
    #[arg(long, value_name = "FILE")]
    pub json: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
pub struct TopArgs {
    /// Replay file (JSON)
    pub file: PathBuf,

    #[command(flatten)]
    pub hist: HistArgs,

    /// Milliseconds between refreshes
    #[arg(long, default_value = "1000")]
    pub refresh_ms: u64,

    /// Samples fed per refresh
    #[arg(long, default_value = "1000")]
    pub batch: usize,

    /// Producer threads
    #[arg(long, default_value = "2")]
    pub producers: usize,

    /// Entries shown per refresh
    #[arg(long, default_value = "20")]
    pub limit: usize,

    /// Only evict decayed user-space entries
    #[arg(long, conflicts_with = "zap_kernel")]
    pub zap_user: bool,

    /// Only evict decayed kernel entries
    #[arg(long)]
    pub zap_kernel: bool,
}
