//! # perfhist - Main Entry Point
//!
//! Dispatches to the subcommand runners in [`perfhist::cli::commands`]:
//! - **report**: sorted histogram of one replay file
//! - **diff**: baseline vs new comparison
//! - **c2c**: cacheline contention breakdown
//! - **top**: batched replay with periodic resort and decay

use std::io::{self, BufWriter, Write};

use anyhow::Result;
use clap::Parser;
use log::info;

use perfhist::cli::{commands, Args, Command};
use perfhist::domain::{ConfigError, HistError};

// Exit codes
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_USAGE: i32 = 2;

fn main() {
    env_logger::init();
    let args = Args::parse();
    std::process::exit(match run(args) {
        Ok(()) => EXIT_SUCCESS,
        Err(e) => {
            let code = exit_code_for(&e);
            eprintln!("error: {e:#}");
            code
        }
    });
}

/// Bad sort keys and callchain options are usage errors.
fn exit_code_for(err: &anyhow::Error) -> i32 {
    let usage = err.downcast_ref::<ConfigError>().is_some()
        || matches!(err.downcast_ref::<HistError>(), Some(HistError::Config(_)));
    if usage {
        EXIT_USAGE
    } else {
        EXIT_ERROR
    }
}

#[tokio::main]
async fn run(args: Args) -> Result<()> {
    let mut out = BufWriter::new(io::stdout().lock());
    match &args.command {
        Command::Report(report) => {
            let session = commands::report(report, args.quiet, &mut out)?;
            info!("{} events reported", session.events().len());
        }
        Command::Diff(diff) => commands::diff(diff, args.quiet, &mut out)?,
        Command::C2c(c2c) => {
            commands::c2c(c2c, args.quiet, &mut out)?;
        }
        Command::Top(top) => {
            let summary = commands::top(top, args.quiet, &mut out).await?;
            if summary.interrupted && !args.quiet {
                eprintln!("Interrupted after {} refreshes", summary.refreshes);
            }
        }
    }
    out.flush()?;
    Ok(())
}
