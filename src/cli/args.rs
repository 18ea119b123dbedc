//! Defines the command-line arguments and subcommands for the Verdict CLI.
//!
//! This module uses the `clap` crate with its "derive" feature to create a
//! declarative and type-safe argument parsing structure.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// The main CLI argument structure.
#[derive(Debug, Parser)]
#[command(
    name = "verdict",
    version,
    about = "A declarative test runner for executables."
)]
pub struct VerdictArgs {
    #[command(subcommand)]
    pub command: Command,
}

/// An enumeration of all available CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Full pipeline: load, normalize, merge, execute and report.
    Run {
        /// The configuration document to run.
        #[arg(required = true)]
        config: PathBuf,
        /// Worker pool size for independent test cases.
        #[arg(short, long)]
        jobs: Option<usize>,
        /// Run-level default seed (a test's own `seed` wins).
        #[arg(long)]
        seed: Option<u64>,
        /// Stop a stream's checks at the first failure.
        #[arg(long)]
        fail_fast: bool,
        /// Capture bound per stream, in bytes.
        #[arg(long)]
        max_capture: Option<usize>,
        /// Increase verbosity (repeatable).
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,
        /// Disable colored output.
        #[arg(long)]
        no_color: bool,
    },
    /// Validate a configuration document without executing it.
    Check {
        /// The configuration document to validate.
        #[arg(required = true)]
        config: PathBuf,
    },
    /// Print the fully resolved (merged) test tree.
    Merged {
        /// The configuration document to resolve.
        #[arg(required = true)]
        config: PathBuf,
    },
    /// List all built-in operations.
    ListOps,
    /// Find configuration documents under a directory.
    Discover {
        /// The directory to search.
        #[arg(default_value = ".")]
        dir: PathBuf,
    },
}
