//! Canonical data model for the test DSL.
//!
//! The normalizer (`schema::normalize`) converts the permissive document
//! forms into exactly these types; everything downstream (merge, plan,
//! pipeline) works on canonical values only. All types serialize so the
//! fully merged tree can be dumped for diagnostics.

use serde::{Deserialize, Serialize};

pub mod normalize;

pub use normalize::normalize;

// ============================================================================
// EXECUTION CONTEXT
// ============================================================================

/// Command line: a single program path or an argv sequence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CmdLine {
    Line(String),
    Argv(Vec<String>),
}

impl CmdLine {
    /// Split into (program, leading arguments).
    pub fn split(&self) -> (String, Vec<String>) {
        match self {
            CmdLine::Line(line) => (line.clone(), Vec::new()),
            CmdLine::Argv(argv) => {
                let mut iter = argv.iter();
                let program = iter.next().cloned().unwrap_or_default();
                (program, iter.cloned().collect())
            }
        }
    }
}

/// Stdin payload: verbatim text or a line sequence joined at spawn time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StdinSpec {
    Text(String),
    Lines(Vec<String>),
}

/// Resource limits applied at spawn time where the host supports them.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Limits {
    /// CPU time in seconds.
    pub cpu: Option<u64>,
    /// Address space in bytes.
    pub memory: Option<u64>,
    /// Open file descriptors.
    pub nofile: Option<u64>,
}

impl Limits {
    pub fn is_empty(&self) -> bool {
        self.cpu.is_none() && self.memory.is_none() && self.nofile.is_none()
    }
}

/// Execution settings for a node. Every field is optional: absence defers
/// to the nearest ancestor's value (`env` and `args` extend instead of
/// replacing).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ExecContext {
    pub cmd: Option<CmdLine>,
    /// Timeout in seconds.
    pub timeout: Option<f64>,
    pub stdin: Option<StdinSpec>,
    /// Joiner for the line form of `stdin`. Defaults to a newline.
    pub stdin_join: Option<String>,
    pub args: Vec<String>,
    pub env: im::HashMap<String, String>,
    pub cwd: Option<String>,
    pub shell: Option<bool>,
    #[serde(default)]
    pub limits: Limits,
}

// ============================================================================
// OPERATIONS
// ============================================================================

/// One canonical stream operation. Filters transform the running value,
/// checks evaluate it and yield an outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    // Filters
    Trim,
    Lower,
    Upper,
    Sub {
        regex: String,
        repl: String,
        flags: Option<String>,
    },
    MapEval {
        expr: String,
    },

    // Checks
    Match {
        regex: String,
        flags: Option<String>,
        explain: Option<String>,
    },
    Contains {
        value: String,
        explain: Option<String>,
    },
    NotContains {
        value: String,
        explain: Option<String>,
    },
    Equals {
        value: String,
        explain: Option<String>,
    },
    NotEquals {
        value: String,
        explain: Option<String>,
    },
    Lt {
        value: f64,
        explain: Option<String>,
    },
    Lte {
        value: f64,
        explain: Option<String>,
    },
    Gt {
        value: f64,
        explain: Option<String>,
    },
    Gte {
        value: f64,
        explain: Option<String>,
    },
    CheckEval {
        expr: String,
        explain: Option<String>,
    },
    Capture {
        regex: String,
        flags: Option<String>,
        group: usize,
        tests: Vec<Op>,
        explain: Option<String>,
    },

    /// A registered plugin operation. `filter` records which category the
    /// name resolved to at normalization time.
    Plugin {
        name: String,
        value: serde_yaml::Value,
        filter: bool,
        explain: Option<String>,
    },
}

impl Op {
    /// The operation name as written in documents.
    pub fn name(&self) -> &str {
        match self {
            Op::Trim => "trim",
            Op::Lower => "lower",
            Op::Upper => "upper",
            Op::Sub { .. } => "sub",
            Op::MapEval { .. } => "map_eval",
            Op::Match { .. } => "match",
            Op::Contains { .. } => "contains",
            Op::NotContains { .. } => "not_contains",
            Op::Equals { .. } => "equals",
            Op::NotEquals { .. } => "not_equals",
            Op::Lt { .. } => "lt",
            Op::Lte { .. } => "lte",
            Op::Gt { .. } => "gt",
            Op::Gte { .. } => "gte",
            Op::CheckEval { .. } => "check_eval",
            Op::Capture { .. } => "capture",
            Op::Plugin { name, .. } => name,
        }
    }

    pub fn is_filter(&self) -> bool {
        match self {
            Op::Trim | Op::Lower | Op::Upper | Op::Sub { .. } | Op::MapEval { .. } => true,
            Op::Plugin { filter, .. } => *filter,
            _ => false,
        }
    }

    pub fn explain(&self) -> Option<&str> {
        match self {
            Op::Match { explain, .. }
            | Op::Contains { explain, .. }
            | Op::NotContains { explain, .. }
            | Op::Equals { explain, .. }
            | Op::NotEquals { explain, .. }
            | Op::Lt { explain, .. }
            | Op::Lte { explain, .. }
            | Op::Gt { explain, .. }
            | Op::Gte { explain, .. }
            | Op::CheckEval { explain, .. }
            | Op::Capture { explain, .. }
            | Op::Plugin { explain, .. } => explain.as_deref(),
            _ => None,
        }
    }
}

// ============================================================================
// HOOKS, MATRIX, EXIT
// ============================================================================

/// A setup/teardown step: a shell command or a context evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Hook {
    pub kind: HookKind,
    pub body: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookKind {
    Run,
    Eval,
}

/// A matrix value: one concrete assignment for a parameterized variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Num(f64),
    Str(String),
}

impl Scalar {
    /// Canonical textual form: booleans as `true`/`false`, integral
    /// numbers without a fractional part.
    pub fn canonical_text(&self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Num(n) => {
                if n.fract() == 0.0 && n.abs() < 1e15 {
                    format!("{}", *n as i64)
                } else {
                    format!("{}", n)
                }
            }
            Scalar::Str(s) => s.clone(),
        }
    }
}

/// Expected exit code with an optional explanation template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExitSpec {
    pub code: i32,
    pub explain: Option<String>,
}

// ============================================================================
// TEST TREE
// ============================================================================

/// One node of the declarative test tree. Inner nodes group children;
/// leaves (no `tests`) are runnable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestNode {
    pub name: String,
    pub description: Option<String>,

    /// Own execution overrides, resolved against ancestors by the merger.
    pub exec: ExecContext,

    /// Own filters, appended to the inherited list.
    pub filters: Vec<Op>,
    pub setup: Vec<Hook>,
    pub teardown: Vec<Hook>,

    pub repeat: u32,
    /// Variable name -> value list, in declaration order.
    pub matrix: Vec<(String, Vec<Scalar>)>,
    pub seed: Option<u64>,

    /// Stream specs apply only at this node, never inherited.
    pub stdout: Vec<Op>,
    pub stderr: Vec<Op>,
    pub files: Vec<(String, Vec<Op>)>,
    pub exit: Option<ExitSpec>,

    pub tests: Vec<TestNode>,
}

impl TestNode {
    pub fn is_leaf(&self) -> bool {
        self.tests.is_empty()
    }
}

/// The root document: version, root execution context, root filters and
/// the ordered test forest. Immutable once normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spec {
    pub version: u32,
    pub exec: ExecContext,
    pub filters: Vec<Op>,
    pub tests: Vec<TestNode>,
}
