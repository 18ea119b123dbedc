//! Suite execution and aggregation.
//!
//! Walks the effective tree, expands leaves through the planner and runs
//! repeat groups on a bounded rayon pool. Each group blocks one worker
//! through Setup -> Executing -> Pipeline -> Teardown; iterations inside a
//! group run sequentially and share one execution context. A parent's
//! status is computed only after all of its children finished; independent
//! subtrees never block each other.

use std::path::Path;
use std::time::{Duration, Instant};

use rayon::prelude::*;

use crate::context::{ExecutionContext, Value};
use crate::errors::{SourceContext, VerdictError};
use crate::exec::{self, ExecOutcome, Invocation, DEFAULT_MAX_CAPTURE};
use crate::loader::{self, Format};
use crate::merge::{merge_spec, EffectiveNode};
use crate::pipeline::{evaluate_stream, CheckPolicy};
use crate::plan::{plan_leaf, PlannedCase};
use crate::registry::OpRegistry;
use crate::results::{
    CaseResult, CheckOutcome, IterationResult, PhaseDurations, ResultNode, RunReport, Status,
    StreamReport,
};
use crate::schema::{self, CmdLine, Hook, HookKind, Scalar, Spec, StdinSpec};

/// Run options. The pool size is a knob, never a correctness requirement.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Worker pool size; `None` uses the rayon default.
    pub jobs: Option<usize>,
    pub policy: CheckPolicy,
    /// Run-level default seed; a node's own `seed` wins.
    pub seed: Option<u64>,
    /// Capture bound per stream, in bytes.
    pub max_capture: usize,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            jobs: None,
            policy: CheckPolicy::ReportAll,
            seed: None,
            max_capture: DEFAULT_MAX_CAPTURE,
        }
    }
}

fn scalar_value(scalar: &Scalar) -> Value {
    match scalar {
        Scalar::Num(n) => Value::Num(*n),
        Scalar::Bool(b) => Value::Bool(*b),
        Scalar::Str(s) => Value::Str(s.clone()),
    }
}

// ============================================================================
// PER-CASE EXECUTION
// ============================================================================

/// Run a setup/teardown hook. `run` steps go through the shell with the
/// node's environment and working directory; `eval` steps run in the
/// context. A non-zero exit or an evaluation failure is a hook failure.
fn run_hook(
    hook: &Hook,
    node: &EffectiveNode,
    ctx: &mut ExecutionContext,
) -> Result<(), String> {
    let body = ctx.render(&hook.body).map_err(|e| e.to_string())?;
    match hook.kind {
        HookKind::Eval => ctx.execute(&body).map_err(|e| e.to_string()),
        HookKind::Run => {
            let mut invocation = Invocation::new(body.clone());
            invocation.shell = true;
            invocation.env = node.exec.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            invocation.cwd = node.exec.cwd.clone().map(Into::into);
            match exec::run(&invocation) {
                ExecOutcome::Completed {
                    exit_code: Some(0), ..
                } => Ok(()),
                ExecOutcome::Completed { exit_code, .. } => Err(format!(
                    "hook '{}' exited with {:?}",
                    body, exit_code
                )),
                ExecOutcome::TimedOut { .. } => Err(format!("hook '{}' timed out", body)),
                ExecOutcome::SpawnFailed { message } => {
                    Err(format!("hook '{}' failed to start: {}", body, message))
                }
            }
        }
    }
}

/// Resolve the rendered stdin payload for one iteration.
fn render_stdin(
    node: &EffectiveNode,
    ctx: &mut ExecutionContext,
) -> Result<Option<String>, VerdictError> {
    match &node.exec.stdin {
        None => Ok(None),
        Some(StdinSpec::Text(text)) => Ok(Some(ctx.render(text)?)),
        Some(StdinSpec::Lines(lines)) => {
            let joiner = node.exec.stdin_join.clone().unwrap_or_else(|| "\n".to_string());
            let rendered = ctx.render_all(lines)?;
            Ok(Some(rendered.join(&joiner)))
        }
    }
}

fn build_invocation(
    node: &EffectiveNode,
    args: Vec<String>,
    stdin: Option<String>,
    max_capture: usize,
) -> Invocation {
    let (program, mut argv) = node
        .exec
        .cmd
        .as_ref()
        .map(CmdLine::split)
        .unwrap_or_else(|| (String::new(), Vec::new()));
    argv.extend(args);

    Invocation {
        program,
        args: argv,
        shell: node.exec.shell.unwrap_or(false),
        env: node.exec.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
        cwd: node.exec.cwd.clone().map(Into::into),
        stdin,
        timeout: node.exec.timeout.map(Duration::from_secs_f64),
        limits: node.exec.limits.clone(),
        max_capture,
    }
}

/// Evaluate the exit expectation, when the node declares one.
fn exit_outcome(
    node: &EffectiveNode,
    exit_code: Option<i32>,
    signal: Option<i32>,
    ctx: &mut ExecutionContext,
) -> Option<CheckOutcome> {
    let expected = node.exit.as_ref()?;
    let (passed, message) = match exit_code {
        Some(code) if code == expected.code => (true, "ok".to_string()),
        Some(code) => (
            false,
            format!("expected exit status {} but received {}", expected.code, code),
        ),
        None => (
            false,
            format!(
                "expected exit status {} but the process died on signal {:?}",
                expected.code, signal
            ),
        ),
    };
    let explain = if passed {
        None
    } else {
        expected.explain.as_ref().map(|template| {
            ctx.render(template)
                .unwrap_or_else(|_| template.to_string())
        })
    };
    Some(CheckOutcome {
        check: "exit".to_string(),
        stream: "exit".to_string(),
        passed,
        message,
        explain,
        expected: Some(expected.code.to_string()),
        actual: exit_code.map(|c| c.to_string()),
    })
}

/// File streams: the declared file must exist after execution; its absence
/// is itself a failed outcome for that stream, not a crash.
fn evaluate_file_stream(
    name: &str,
    ops: &[schema::Op],
    node: &EffectiveNode,
    ctx: &mut ExecutionContext,
    registry: &OpRegistry,
    policy: CheckPolicy,
) -> StreamReport {
    let path = match &node.exec.cwd {
        Some(cwd) => Path::new(cwd).join(name),
        None => Path::new(name).to_path_buf(),
    };
    match std::fs::read_to_string(&path) {
        Ok(content) => evaluate_stream(ops, &node.filters, &content, name, ctx, registry, policy),
        Err(e) => StreamReport {
            name: name.to_string(),
            original: String::new(),
            filtered: String::new(),
            truncated: false,
            filters: Vec::new(),
            outcomes: vec![CheckOutcome {
                check: "exists".to_string(),
                stream: name.to_string(),
                passed: false,
                message: format!("file '{}' not found ({})", path.display(), e),
                explain: None,
                expected: None,
                actual: None,
            }],
        },
    }
}

/// Execute one planned repeat group.
///
/// State machine: Pending -> Setup -> Executing -> {Completed | TimedOut |
/// ExecError}. From Completed every check stage runs even after earlier
/// failures; TimedOut/ExecError skip straight to Teardown since stream
/// content is undefined.
fn execute_case(
    node: &EffectiveNode,
    planned: &PlannedCase,
    registry: &OpRegistry,
    config: &RunConfig,
) -> CaseResult {
    let mut ctx = ExecutionContext::from_seed(planned.seed);
    for (name, scalar) in &planned.assignment {
        ctx.set_var(name, scalar_value(scalar));
    }

    let mut durations = PhaseDurations::default();
    let mut iterations = Vec::new();
    let mut status = Status::Passed;
    let mut error = None;

    // Setup runs once before the first iteration.
    let setup_start = Instant::now();
    for hook in &node.setup {
        if let Err(message) = run_hook(hook, node, &mut ctx) {
            durations.setup = setup_start.elapsed();
            return CaseResult {
                label: planned.label(),
                status: Status::Errored,
                error: Some(format!("setup failed: {}", message)),
                iterations,
                durations,
            };
        }
    }
    durations.setup = setup_start.elapsed();

    for index in 1..=planned.repeat {
        ctx.set_var("index", Value::Num(f64::from(index)));

        let args = match ctx.render_all(&node.exec.args) {
            Ok(args) => args,
            Err(e) => {
                status = Status::Errored;
                error = Some(e.to_string());
                break;
            }
        };
        let stdin = match render_stdin(node, &mut ctx) {
            Ok(stdin) => stdin,
            Err(e) => {
                status = Status::Errored;
                error = Some(e.to_string());
                break;
            }
        };

        let invocation = build_invocation(node, args, stdin, config.max_capture);
        let command = invocation.command_line();

        match exec::run(&invocation) {
            ExecOutcome::SpawnFailed { message } => {
                status = Status::Errored;
                error = Some(format!("failed to run '{}': {}", command, message));
                break;
            }
            ExecOutcome::TimedOut { duration } => {
                durations.exec += duration;
                status = Status::TimedOut;
                error = Some(format!(
                    "'{}' timed out after {:.3}s",
                    command,
                    duration.as_secs_f64()
                ));
                break;
            }
            ExecOutcome::Completed {
                exit_code,
                signal,
                stdout,
                stderr,
                duration,
            } => {
                durations.exec += duration;

                // Every stage runs even when an earlier one already
                // failed, to maximize diagnostic yield.
                let mut streams = Vec::new();
                let mut report = evaluate_stream(
                    &node.stdout,
                    &node.filters,
                    &stdout.text,
                    "stdout",
                    &mut ctx,
                    registry,
                    config.policy,
                );
                report.truncated = stdout.truncated;
                streams.push(report);

                let mut report = evaluate_stream(
                    &node.stderr,
                    &node.filters,
                    &stderr.text,
                    "stderr",
                    &mut ctx,
                    registry,
                    config.policy,
                );
                report.truncated = stderr.truncated;
                streams.push(report);

                for (name, ops) in &node.files {
                    streams.push(evaluate_file_stream(
                        name,
                        ops,
                        node,
                        &mut ctx,
                        registry,
                        config.policy,
                    ));
                }

                let exit = exit_outcome(node, exit_code, signal, &mut ctx);

                let iteration = IterationResult {
                    index,
                    command,
                    exit_code,
                    expected_exit: node.exit.as_ref().map(|e| e.code),
                    duration,
                    streams,
                    exit_outcome: exit,
                };
                if !iteration.failures().is_empty() {
                    status = status.worst(Status::Failed);
                }
                iterations.push(iteration);
            }
        }
    }

    // Teardown always runs, even after TimedOut/ExecError.
    let teardown_start = Instant::now();
    for hook in &node.teardown {
        if let Err(message) = run_hook(hook, node, &mut ctx) {
            status = status.worst(Status::Errored);
            if error.is_none() {
                error = Some(format!("teardown failed: {}", message));
            }
        }
    }
    durations.teardown = teardown_start.elapsed();

    CaseResult {
        label: planned.label(),
        status,
        error,
        iterations,
        durations,
    }
}

// ============================================================================
// TREE EXECUTION
// ============================================================================

fn execute_node(node: &EffectiveNode, registry: &OpRegistry, config: &RunConfig) -> ResultNode {
    if node.is_leaf() {
        let cases: Vec<CaseResult> = plan_leaf(node, config.seed)
            .par_iter()
            .map(|planned| execute_case(node, planned, registry, config))
            .collect();
        let status = cases
            .iter()
            .fold(Status::Passed, |acc, case| acc.worst(case.status));
        ResultNode {
            id: node.id.clone(),
            name: node.name.clone(),
            description: node.description.clone(),
            status,
            cases,
            children: Vec::new(),
        }
    } else {
        // Join barrier: the parent's status exists only after all
        // children's results are finalized.
        let children: Vec<ResultNode> = node
            .children
            .par_iter()
            .map(|child| execute_node(child, registry, config))
            .collect();
        let status = children
            .iter()
            .fold(Status::Passed, |acc, child| acc.worst(child.status));
        ResultNode {
            id: node.id.clone(),
            name: node.name.clone(),
            description: node.description.clone(),
            status,
            cases: Vec::new(),
            children,
        }
    }
}

fn execute_forest(
    forest: &[EffectiveNode],
    registry: &OpRegistry,
    config: &RunConfig,
) -> RunReport {
    let started = Instant::now();
    let run = || {
        forest
            .par_iter()
            .map(|node| execute_node(node, registry, config))
            .collect::<Vec<_>>()
    };

    let tests = match config.jobs {
        Some(jobs) => {
            match rayon::ThreadPoolBuilder::new().num_threads(jobs.max(1)).build() {
                Ok(pool) => pool.install(run),
                // Pool creation failing is not worth aborting a run over.
                Err(_) => run(),
            }
        }
        None => run(),
    };

    RunReport {
        tests,
        duration: started.elapsed(),
    }
}

// ============================================================================
// ENTRY POINTS
// ============================================================================

/// Core entry contract: run a normalized spec, producing the result tree.
pub fn run(
    spec: &Spec,
    registry: &OpRegistry,
    config: &RunConfig,
) -> Result<RunReport, VerdictError> {
    let source = SourceContext::fallback("runner::run");
    let forest = merge_spec(spec, &source)?;
    Ok(execute_forest(&forest, registry, config))
}

/// Load, normalize, merge and execute a document held in memory.
pub fn run_str(
    text: &str,
    name: &str,
    format: Format,
    registry: &OpRegistry,
    config: &RunConfig,
) -> Result<RunReport, VerdictError> {
    let raw = loader::load_str(text, name, format)?;
    let source = SourceContext::from_document(name, text);
    let spec = schema::normalize(&raw, registry, &source)?;
    let forest = merge_spec(&spec, &source)?;
    Ok(execute_forest(&forest, registry, config))
}

/// Load, normalize, merge and execute a document from disk.
pub fn run_file(
    path: impl AsRef<Path>,
    format: Format,
    registry: &OpRegistry,
    config: &RunConfig,
) -> Result<RunReport, VerdictError> {
    let (raw, source) = loader::load_file(path, format)?;
    let spec = schema::normalize(&raw, registry, &source)?;
    let forest = merge_spec(&spec, &source)?;
    Ok(execute_forest(&forest, registry, config))
}
