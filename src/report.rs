//! Console rendering of a run report.
//!
//! Walks the result tree and prints one line per node with its dotted id,
//! name and colored status, failure details underneath, and a summary
//! line. Purely a consumer of the result model; nothing here feeds back
//! into execution.

use std::io::Write;

use difference::{Changeset, Difference};
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};
use unicode_width::UnicodeWidthStr;

use crate::results::{CaseResult, CheckOutcome, ResultNode, RunReport, Status};

/// Reporter options.
pub struct ReportConfig {
    pub use_colors: bool,
    /// 0: statuses and failures. 1: filter traces and stream values on
    /// failure. 2: everything, including passing checks.
    pub verbosity: u8,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            use_colors: atty::is(atty::Stream::Stdout),
            verbosity: 0,
        }
    }
}

impl ReportConfig {
    fn stream(&self) -> StandardStream {
        let choice = if self.use_colors {
            ColorChoice::Auto
        } else {
            ColorChoice::Never
        };
        StandardStream::stdout(choice)
    }
}

fn status_color(status: Status) -> Color {
    match status {
        Status::Passed => Color::Green,
        Status::Failed => Color::Red,
        Status::TimedOut => Color::Yellow,
        Status::Errored => Color::Magenta,
    }
}

fn print_status(stdout: &mut StandardStream, status: Status) {
    let _ = stdout.set_color(
        ColorSpec::new()
            .set_fg(Some(status_color(status)))
            .set_bold(true),
    );
    let _ = write!(stdout, "{}", status.label());
    let _ = stdout.reset();
    let _ = writeln!(stdout);
}

/// Width of the id+name column, for status alignment.
fn label_width(node: &ResultNode) -> usize {
    let own = node.id.pad("  ").width()
        + node.id.to_string().width()
        + 2
        + node.name.width();
    node.children
        .iter()
        .map(label_width)
        .fold(own, usize::max)
}

fn print_outcome(stdout: &mut StandardStream, outcome: &CheckOutcome, indent: &str, verbose: bool) {
    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
    let _ = writeln!(stdout, "{}✗ [{}] {}", indent, outcome.check, outcome.message);
    let _ = stdout.reset();
    if let Some(explain) = &outcome.explain {
        let _ = writeln!(stdout, "{}  note: {}", indent, explain);
    }
    if verbose {
        if let (Some(expected), Some(actual)) = (&outcome.expected, &outcome.actual) {
            let changeset = Changeset::new(expected, actual, "\n");
            print_diff(stdout, &changeset.diffs, indent);
        }
    }
}

fn print_diff(stdout: &mut StandardStream, diffs: &[Difference], indent: &str) {
    for diff in diffs {
        match diff {
            Difference::Same(x) => {
                let _ = stdout.reset();
                for line in x.lines() {
                    let _ = writeln!(stdout, "{}   {}", indent, line);
                }
            }
            Difference::Add(x) => {
                let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)));
                for line in x.lines() {
                    let _ = writeln!(stdout, "{}  +{}", indent, line);
                }
            }
            Difference::Rem(x) => {
                let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Red)));
                for line in x.lines() {
                    let _ = writeln!(stdout, "{}  -{}", indent, line);
                }
            }
        }
    }
    let _ = stdout.reset();
}

fn print_case(
    stdout: &mut StandardStream,
    case: &CaseResult,
    indent: &str,
    config: &ReportConfig,
) {
    if !case.label.is_empty() || case.status != Status::Passed {
        let label = if case.label.is_empty() {
            "·"
        } else {
            case.label.as_str()
        };
        let _ = write!(stdout, "{}{} ", indent, label);
        print_status(stdout, case.status);
    }
    if let Some(error) = &case.error {
        let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Magenta)));
        let _ = writeln!(stdout, "{}  {}", indent, error);
        let _ = stdout.reset();
    }

    for iteration in &case.iterations {
        let failures = iteration.failures();
        if failures.is_empty() && config.verbosity < 2 {
            continue;
        }
        if case.iterations.len() > 1 {
            let _ = writeln!(stdout, "{}  iteration {}:", indent, iteration.index);
        }
        for outcome in failures {
            print_outcome(stdout, outcome, &format!("{}  ", indent), config.verbosity >= 1);
        }
        if config.verbosity >= 2 {
            for stream in &iteration.streams {
                for outcome in stream.outcomes.iter().filter(|o| o.passed) {
                    let _ = stdout.set_color(ColorSpec::new().set_fg(Some(Color::Green)));
                    let _ = writeln!(stdout, "{}  ✓ [{}] {}", indent, outcome.check, outcome.stream);
                    let _ = stdout.reset();
                }
            }
        }
        if config.verbosity >= 1 {
            for stream in &iteration.streams {
                if !stream.failed() {
                    continue;
                }
                for filter in &stream.filters {
                    let _ = writeln!(
                        stdout,
                        "{}  filter {}: {:?} -> {:?}",
                        indent, filter.name, filter.before, filter.after
                    );
                }
            }
        }
    }
}

fn print_node(
    stdout: &mut StandardStream,
    node: &ResultNode,
    width: usize,
    config: &ReportConfig,
) {
    let label = format!("{}{}  {}", node.id.pad("  "), node.id, node.name);
    let padding = width.saturating_sub(label.width()) + 2;
    let _ = write!(stdout, "{}{} ", label, ".".repeat(padding));
    print_status(stdout, node.status);

    let indent = format!("{}    ", node.id.pad("  "));
    for case in &node.cases {
        print_case(stdout, case, &indent, config);
    }
    for child in &node.children {
        print_node(stdout, child, width, config);
    }
}

/// Render the whole run to stdout and return the overall pass flag.
pub fn print_report(report: &RunReport, config: &ReportConfig) -> bool {
    let mut stdout = config.stream();
    let width = report.tests.iter().map(label_width).max().unwrap_or(0);

    for node in &report.tests {
        print_node(&mut stdout, node, width, config);
    }

    let counts = report.counts();
    let _ = writeln!(stdout);
    let summary = format!(
        "{} passed, {} failed, {} timed out, {} errored in {:.2}s",
        counts.passed,
        counts.failed,
        counts.timed_out,
        counts.errored,
        report.duration.as_secs_f64()
    );
    let passed = report.passed();
    let _ = stdout.set_color(
        ColorSpec::new()
            .set_fg(Some(if passed { Color::Green } else { Color::Red }))
            .set_bold(true),
    );
    let _ = writeln!(stdout, "{}", summary);
    let _ = stdout.reset();
    passed
}
