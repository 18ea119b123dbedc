//! The Verdict command-line interface.
//!
//! This module is the entry point for all CLI commands and orchestrates
//! the core library functions. Exit codes: 0 when every test passed,
//! 1 on failing tests, 2 on an invalid configuration.

use std::path::Path;
use std::process;

use clap::Parser;
use walkdir::WalkDir;

use crate::cli::args::{Command, VerdictArgs};
use crate::errors::print_error;
use crate::loader::{self, Format};
use crate::merge::merge_spec;
use crate::pipeline::CheckPolicy;
use crate::registry::{OpRegistry, BUILTIN_CHECKS, BUILTIN_FILTERS};
use crate::report::{print_report, ReportConfig};
use crate::runner::{run_file, RunConfig};
use crate::schema;

pub mod args;

const EXIT_FAILURES: i32 = 1;
const EXIT_CONFIG: i32 = 2;

/// The main entry point for the CLI.
pub fn run() {
    let args = VerdictArgs::parse();

    let code = match args.command {
        Command::Run {
            config,
            jobs,
            seed,
            fail_fast,
            max_capture,
            verbose,
            no_color,
        } => handle_run(&config, jobs, seed, fail_fast, max_capture, verbose, no_color),
        Command::Check { config } => handle_check(&config),
        Command::Merged { config } => handle_merged(&config),
        Command::ListOps => handle_list_ops(),
        Command::Discover { dir } => handle_discover(&dir),
    };

    process::exit(code);
}

#[allow(clippy::too_many_arguments)]
fn handle_run(
    config: &Path,
    jobs: Option<usize>,
    seed: Option<u64>,
    fail_fast: bool,
    max_capture: Option<usize>,
    verbose: u8,
    no_color: bool,
) -> i32 {
    let registry = OpRegistry::new();
    let mut run_config = RunConfig {
        jobs,
        seed,
        policy: if fail_fast {
            CheckPolicy::FailFast
        } else {
            CheckPolicy::ReportAll
        },
        ..RunConfig::default()
    };
    if let Some(max_capture) = max_capture {
        run_config.max_capture = max_capture;
    }

    match run_file(config, Format::Auto, &registry, &run_config) {
        Ok(report) => {
            let mut report_config = ReportConfig {
                verbosity: verbose,
                ..ReportConfig::default()
            };
            if no_color {
                report_config.use_colors = false;
            }
            if print_report(&report, &report_config) {
                0
            } else {
                EXIT_FAILURES
            }
        }
        Err(e) => {
            print_error(e);
            EXIT_CONFIG
        }
    }
}

/// Validate without executing: load, normalize, merge.
fn handle_check(config: &Path) -> i32 {
    let registry = OpRegistry::new();
    let resolved = loader::load_file(config, Format::Auto).and_then(|(raw, source)| {
        let spec = schema::normalize(&raw, &registry, &source)?;
        merge_spec(&spec, &source)
    });

    match resolved {
        Ok(forest) => {
            let leaves: usize = forest.iter().map(count_leaves).sum();
            println!("Configuration looks good ({} runnable tests).", leaves);
            0
        }
        Err(e) => {
            print_error(e);
            EXIT_CONFIG
        }
    }
}

fn count_leaves(node: &crate::merge::EffectiveNode) -> usize {
    if node.is_leaf() {
        1
    } else {
        node.children.iter().map(count_leaves).sum()
    }
}

/// Dump the fully resolved effective tree for diagnostics.
fn handle_merged(config: &Path) -> i32 {
    let registry = OpRegistry::new();
    let resolved = loader::load_file(config, Format::Auto).and_then(|(raw, source)| {
        let spec = schema::normalize(&raw, &registry, &source)?;
        merge_spec(&spec, &source)
    });

    match resolved {
        Ok(forest) => match serde_yaml::to_string(&forest) {
            Ok(dump) => {
                println!("{}", dump);
                0
            }
            Err(e) => {
                eprintln!("failed to serialize merged tree: {}", e);
                EXIT_CONFIG
            }
        },
        Err(e) => {
            print_error(e);
            EXIT_CONFIG
        }
    }
}

fn handle_list_ops() -> i32 {
    println!("filters:");
    for name in BUILTIN_FILTERS {
        println!("  {}", name);
    }
    println!("checks:");
    for name in BUILTIN_CHECKS {
        println!("  {}", name);
    }
    0
}

/// List configuration documents under a directory tree.
fn handle_discover(dir: &Path) -> i32 {
    let mut found = 0usize;
    for entry in WalkDir::new(dir).into_iter().filter_map(|e| e.ok()) {
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let by_extension = path
            .extension()
            .map(|ext| ext == "yaml" || ext == "yml" || ext == "json")
            .unwrap_or(false);
        if by_extension && looks_like_spec(path) {
            println!("{}", path.display());
            found += 1;
        }
    }
    if found == 0 {
        eprintln!("no configuration documents found under {}", dir.display());
    }
    0
}

/// Cheap structural probe: a spec document has `tests` and `exec` roots.
fn looks_like_spec(path: &Path) -> bool {
    let Ok((raw, _)) = loader::load_file(path, Format::Auto) else {
        return false;
    };
    let Some(map) = raw.as_mapping() else {
        return false;
    };
    let key = |k: &str| serde_yaml::Value::String(k.to_string());
    map.contains_key(&key("tests")) && map.contains_key(&key("exec"))
}
