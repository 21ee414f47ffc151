//! Command-line interface for perfhist
//!
//! Argument parsing lives in [`args`]; [`commands`] runs each subcommand
//! against a replay file and renders to any writer.

pub mod args;
pub mod commands;

pub use args::{Args, Command};
