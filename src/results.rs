//! Result tree consumed by reporters.
//!
//! Mirrors the test tree: group nodes aggregate their children, leaf nodes
//! carry one entry per planned repeat group with per-iteration outcomes.
//! Reporters (console, exporters) read this tree and never interpret the
//! DSL themselves.

use std::time::Duration;

use serde::Serialize;

use crate::ids::TestId;

/// Final state of a node or case.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Status {
    Passed,
    Failed,
    /// Wall-clock or CPU-time expiry; the process group was killed.
    TimedOut,
    /// Infrastructure failure: the process never ran (or a hook broke).
    Errored,
}

impl Status {
    pub fn is_pass(self) -> bool {
        self == Status::Passed
    }

    fn rank(self) -> u8 {
        match self {
            Status::Passed => 0,
            Status::Failed => 1,
            Status::TimedOut => 2,
            Status::Errored => 3,
        }
    }

    /// The more severe of two statuses, for aggregation.
    pub fn worst(self, other: Status) -> Status {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Status::Passed => "PASS",
            Status::Failed => "FAIL",
            Status::TimedOut => "TIMEOUT",
            Status::Errored => "ERROR",
        }
    }
}

/// One check's outcome: pass/fail plus the rendered explanation.
#[derive(Debug, Clone, Serialize)]
pub struct CheckOutcome {
    /// Operation name (`contains`, `lt`, ...).
    pub check: String,
    /// Stream the check ran against (`stdout`, `stderr`, a file name,
    /// `exit`, or a capture sub-stream like `stdout::capture[1]`).
    pub stream: String,
    pub passed: bool,
    /// Failure detail, or `ok` on success.
    pub message: String,
    /// Rendered `explain` template, when the check declared one.
    pub explain: Option<String>,
    /// Expected/actual values where the check has a meaningful pair
    /// (equality and comparison failures), for diff rendering.
    pub expected: Option<String>,
    pub actual: Option<String>,
}

/// How one filter transformed the running value (verbose reporting).
#[derive(Debug, Clone, Serialize)]
pub struct FilterApplication {
    pub name: String,
    pub before: String,
    pub after: String,
}

/// Outcome of one stream's filter/check pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct StreamReport {
    pub name: String,
    pub original: String,
    pub filtered: String,
    pub truncated: bool,
    pub filters: Vec<FilterApplication>,
    pub outcomes: Vec<CheckOutcome>,
}

impl StreamReport {
    pub fn failed(&self) -> bool {
        self.outcomes.iter().any(|o| !o.passed)
    }
}

/// Result of a single execution of a test body.
#[derive(Debug, Clone, Serialize)]
pub struct IterationResult {
    /// 1-based iteration index within the repeat group.
    pub index: u32,
    pub command: String,
    pub exit_code: Option<i32>,
    pub expected_exit: Option<i32>,
    pub duration: Duration,
    pub streams: Vec<StreamReport>,
    pub exit_outcome: Option<CheckOutcome>,
}

impl IterationResult {
    pub fn failures(&self) -> Vec<&CheckOutcome> {
        let mut failures: Vec<&CheckOutcome> = self
            .streams
            .iter()
            .flat_map(|s| s.outcomes.iter().filter(|o| !o.passed))
            .collect();
        if let Some(outcome) = &self.exit_outcome {
            if !outcome.passed {
                failures.push(outcome);
            }
        }
        failures
    }
}

/// Wall-clock duration of each phase of a repeat group.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PhaseDurations {
    pub setup: Duration,
    pub exec: Duration,
    pub teardown: Duration,
}

/// One repeat group: a leaf under one matrix assignment.
#[derive(Debug, Clone, Serialize)]
pub struct CaseResult {
    /// Matrix assignment label (`[n=2, mode=fast]`), empty without a matrix.
    pub label: String,
    pub status: Status,
    /// Infrastructure error detail for `Errored`/`TimedOut` cases.
    pub error: Option<String>,
    pub iterations: Vec<IterationResult>,
    pub durations: PhaseDurations,
}

/// One node of the result tree.
#[derive(Debug, Clone, Serialize)]
pub struct ResultNode {
    pub id: TestId,
    pub name: String,
    pub description: Option<String>,
    pub status: Status,
    /// Leaf nodes: one entry per planned repeat group. Group nodes: empty.
    pub cases: Vec<CaseResult>,
    pub children: Vec<ResultNode>,
}

impl ResultNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Tallies over leaf cases.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct Counts {
    pub passed: usize,
    pub failed: usize,
    pub timed_out: usize,
    pub errored: usize,
}

impl Counts {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.timed_out + self.errored
    }

    fn add(&mut self, status: Status) {
        match status {
            Status::Passed => self.passed += 1,
            Status::Failed => self.failed += 1,
            Status::TimedOut => self.timed_out += 1,
            Status::Errored => self.errored += 1,
        }
    }
}

/// The complete run: the result forest plus totals.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tests: Vec<ResultNode>,
    pub duration: Duration,
}

impl RunReport {
    /// The run passes iff every leaf case passed.
    pub fn passed(&self) -> bool {
        self.tests.iter().all(|t| t.status.is_pass())
    }

    pub fn counts(&self) -> Counts {
        let mut counts = Counts::default();
        fn walk(node: &ResultNode, counts: &mut Counts) {
            for case in &node.cases {
                counts.add(case.status);
            }
            for child in &node.children {
                walk(child, counts);
            }
        }
        for node in &self.tests {
            walk(node, &mut counts);
        }
        counts
    }
}
