//! Stream filter/check pipeline.
//!
//! Applies a stream's operations strictly in declared order: filters
//! transform the running value, checks evaluate it and append one outcome
//! each without altering what later operations see. `capture` forks a
//! derived value for its nested operations. Evaluation failures become
//! failed outcomes for that one operation, never a fault.

use regex::Regex;

use crate::context::{ExecutionContext, Value};
use crate::registry::OpRegistry;
use crate::results::{CheckOutcome, FilterApplication, StreamReport};
use crate::schema::Op;
use crate::schema::normalize::apply_flags;

/// Whether a failing check stops the rest of its stream. Report-all is the
/// default: every check always runs for maximal diagnostic yield.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckPolicy {
    #[default]
    ReportAll,
    FailFast,
}

/// Shorten long stream values for failure messages.
fn preview(value: &str) -> String {
    const LIMIT: usize = 120;
    if value.chars().count() <= LIMIT {
        return value.to_string();
    }
    let head: String = value.chars().take(LIMIT).collect();
    format!("{}...", head)
}

fn compile(pattern: &str, flags: Option<&str>) -> Result<Regex, String> {
    Regex::new(&apply_flags(pattern, flags)).map_err(|e| e.to_string())
}

fn outcome(check: &str, stream: &str, passed: bool, message: String) -> CheckOutcome {
    CheckOutcome {
        check: check.to_string(),
        stream: stream.to_string(),
        passed,
        message,
        explain: None,
        expected: None,
        actual: None,
    }
}

/// Render a check's `explain` template with the current value bound. A
/// template that itself fails to evaluate is reported verbatim rather
/// than masking the check's outcome.
fn render_explain(op: &Op, value: &str, ctx: &mut ExecutionContext) -> Option<String> {
    let template = op.explain()?;
    let previous = ctx.var("value").cloned();
    ctx.set_var("value", Value::Str(value.to_string()));
    let rendered = ctx.render(template).unwrap_or_else(|_| template.to_string());
    match previous {
        Some(v) => ctx.set_var("value", v),
        None => {
            ctx.remove_var("value");
        }
    }
    Some(rendered)
}

/// Coerce the stream value for numeric checks. Failure yields a failed
/// outcome with a coercion explanation rather than aborting the stream.
fn coerce_number(value: &str) -> Result<f64, String> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| format!("cannot convert {:?} to a number", preview(value)))
}

fn numeric_check(
    name: &str,
    stream: &str,
    value: &str,
    threshold: f64,
    wording: &str,
    compare: impl Fn(f64, f64) -> bool,
) -> CheckOutcome {
    match coerce_number(value) {
        Ok(actual) if compare(actual, threshold) => outcome(name, stream, true, "ok".into()),
        Ok(actual) => outcome(
            name,
            stream,
            false,
            format!("{} ({}) is not {} {}", stream, actual, wording, threshold),
        ),
        Err(coercion) => outcome(name, stream, false, format!("{} {}", stream, coercion)),
    }
}

/// Run one check against the current value. `capture` appends one outcome
/// per nested check; every other kind appends exactly one.
fn run_check(
    op: &Op,
    value: &str,
    stream: &str,
    ctx: &mut ExecutionContext,
    registry: &OpRegistry,
    policy: CheckPolicy,
    outcomes: &mut Vec<CheckOutcome>,
) {
    // Capture forks its own sub-stream and reports through the nested ops.
    if let Op::Capture {
        regex,
        flags,
        group,
        tests,
        ..
    } = op
    {
        run_capture(
            regex, flags, *group, tests, value, stream, ctx, registry, policy, outcomes,
        );
        return;
    }

    let result = match op {
        Op::Match { regex, flags, .. } => match compile(regex, flags.as_deref()) {
            Ok(re) if re.is_match(value) => outcome("match", stream, true, "ok".into()),
            Ok(_) => outcome(
                "match",
                stream,
                false,
                format!("{} does not match /{}/ on {:?}", stream, regex, preview(value)),
            ),
            Err(e) => outcome("match", stream, false, format!("invalid regex: {}", e)),
        },
        // Comparison values are templates: `equals: "{{ x }}"` compares
        // against the rendered value. A rendering failure fails the check.
        Op::Contains { value: expected, .. } => match ctx.render(expected) {
            Err(e) => outcome("contains", stream, false, e.to_string()),
            Ok(expected) => {
                if value.contains(&expected) {
                    outcome("contains", stream, true, "ok".into())
                } else {
                    outcome(
                        "contains",
                        stream,
                        false,
                        format!(
                            "{} does not contain {:?}. Found {:?} instead.",
                            stream,
                            expected,
                            preview(value)
                        ),
                    )
                }
            }
        },
        Op::NotContains { value: expected, .. } => match ctx.render(expected) {
            Err(e) => outcome("not_contains", stream, false, e.to_string()),
            Ok(expected) => {
                if value.contains(&expected) {
                    outcome(
                        "not_contains",
                        stream,
                        false,
                        format!("{} unexpectedly contains {:?}.", stream, expected),
                    )
                } else {
                    outcome("not_contains", stream, true, "ok".into())
                }
            }
        },
        Op::Equals { value: expected, .. } => match ctx.render(expected) {
            Err(e) => outcome("equals", stream, false, e.to_string()),
            Ok(expected) => {
                if value == expected {
                    outcome("equals", stream, true, "ok".into())
                } else {
                    let mut o = outcome(
                        "equals",
                        stream,
                        false,
                        format!(
                            "{:?} does not equal {:?} on {}.",
                            preview(value),
                            expected,
                            stream
                        ),
                    );
                    o.expected = Some(expected);
                    o.actual = Some(value.to_string());
                    o
                }
            }
        },
        Op::NotEquals { value: expected, .. } => match ctx.render(expected) {
            Err(e) => outcome("not_equals", stream, false, e.to_string()),
            Ok(expected) => {
                if value == expected {
                    outcome(
                        "not_equals",
                        stream,
                        false,
                        format!("{} unexpectedly equals {:?}.", stream, expected),
                    )
                } else {
                    outcome("not_equals", stream, true, "ok".into())
                }
            }
        },
        Op::Lt { value: threshold, .. } => {
            numeric_check("lt", stream, value, *threshold, "less than", |a, b| a < b)
        }
        Op::Lte { value: threshold, .. } => numeric_check(
            "lte",
            stream,
            value,
            *threshold,
            "less than or equal to",
            |a, b| a <= b,
        ),
        Op::Gt { value: threshold, .. } => numeric_check(
            "gt",
            stream,
            value,
            *threshold,
            "greater than",
            |a, b| a > b,
        ),
        Op::Gte { value: threshold, .. } => numeric_check(
            "gte",
            stream,
            value,
            *threshold,
            "greater than or equal to",
            |a, b| a >= b,
        ),
        Op::CheckEval { expr, .. } => match ctx.evaluate_with_value(expr, value) {
            Ok(result) if result.is_truthy() => outcome("check_eval", stream, true, "ok".into()),
            Ok(_) => outcome(
                "check_eval",
                stream,
                false,
                format!(
                    "expression {:?} evaluated to false for {:?}",
                    expr,
                    preview(value)
                ),
            ),
            Err(e) => outcome("check_eval", stream, false, e.to_string()),
        },
        Op::Plugin {
            name,
            value: config,
            ..
        } => match registry.plugin_check(name) {
            Some(f) => match f(value, config) {
                Ok(()) => outcome(name, stream, true, "ok".into()),
                Err(message) => outcome(name, stream, false, message),
            },
            None => outcome(
                name,
                stream,
                false,
                format!("plugin check '{}' is no longer registered", name),
            ),
        },
        // Filters and capture never reach this point.
        _ => return,
    };

    let mut result = result;
    if !result.passed {
        result.explain = render_explain(op, value, ctx);
    }
    outcomes.push(result);
}

/// Extract a regex group from the value and run the nested operations on
/// the captured substring as an independent sub-stream. Without a match
/// every nested check fails with an explicit "no match" outcome.
#[allow(clippy::too_many_arguments)]
fn run_capture(
    regex: &str,
    flags: &Option<String>,
    group: usize,
    tests: &[Op],
    value: &str,
    stream: &str,
    ctx: &mut ExecutionContext,
    registry: &OpRegistry,
    policy: CheckPolicy,
    outcomes: &mut Vec<CheckOutcome>,
) {
    let sub_stream = format!("{}::capture[{}]", stream, group);

    let captured = match compile(regex, flags.as_deref()) {
        Ok(re) => re
            .captures(value)
            .and_then(|caps| caps.get(group))
            .map(|m| m.as_str().to_string()),
        Err(e) => {
            outcomes.push(outcome(
                "capture",
                stream,
                false,
                format!("invalid regex: {}", e),
            ));
            return;
        }
    };

    match captured {
        Some(captured) => {
            let nested = evaluate_stream(tests, &[], &captured, &sub_stream, ctx, registry, policy);
            outcomes.extend(nested.outcomes);
        }
        None => {
            let reason = format!(
                "capture /{}/ found no match on {} ({:?})",
                regex,
                stream,
                preview(value)
            );
            for op in tests.iter().filter(|op| !op.is_filter()) {
                outcomes.push(outcome(op.name(), &sub_stream, false, reason.clone()));
            }
            // A capture with no nested checks still reports its own miss.
            if tests.iter().all(|op| op.is_filter()) {
                outcomes.push(outcome("capture", stream, false, reason));
            }
        }
    }
}

/// Apply one filter to the running value. On failure the value passes
/// through unchanged and a failed outcome records why.
fn run_filter(
    op: &Op,
    value: String,
    stream: &str,
    ctx: &mut ExecutionContext,
    registry: &OpRegistry,
    history: &mut Vec<FilterApplication>,
    outcomes: &mut Vec<CheckOutcome>,
) -> String {
    let before = value.clone();
    let applied: Result<String, String> = match op {
        Op::Trim => Ok(value.trim().to_string()),
        Op::Lower => Ok(value.to_lowercase()),
        Op::Upper => Ok(value.to_uppercase()),
        Op::Sub { regex, repl, flags } => compile(regex, flags.as_deref())
            .map(|re| re.replace_all(&value, repl.as_str()).into_owned()),
        Op::MapEval { expr } => ctx
            .evaluate_with_value(expr, &value)
            .map(|v| v.to_string())
            .map_err(|e| e.to_string()),
        Op::Plugin { name, value: config, .. } => match registry.plugin_filter(name) {
            Some(f) => f(&value, config),
            None => Err(format!("plugin filter '{}' is no longer registered", name)),
        },
        _ => Ok(value),
    };

    match applied {
        Ok(after) => {
            history.push(FilterApplication {
                name: op.name().to_string(),
                before,
                after: after.clone(),
            });
            after
        }
        Err(message) => {
            outcomes.push(outcome(op.name(), stream, false, message));
            before
        }
    }
}

/// Apply a stream's ordered operations against a captured value.
///
/// `global_filters` (the merged filter list) run first, then the stream's
/// own operations in declaration order.
pub fn evaluate_stream(
    ops: &[Op],
    global_filters: &[Op],
    value: &str,
    stream: &str,
    ctx: &mut ExecutionContext,
    registry: &OpRegistry,
    policy: CheckPolicy,
) -> StreamReport {
    let mut history = Vec::new();
    let mut outcomes = Vec::new();
    let mut current = value.to_string();

    for op in global_filters {
        current = run_filter(op, current, stream, ctx, registry, &mut history, &mut outcomes);
    }

    for op in ops {
        if policy == CheckPolicy::FailFast && outcomes.iter().any(|o: &CheckOutcome| !o.passed) {
            break;
        }
        if op.is_filter() {
            current = run_filter(op, current, stream, ctx, registry, &mut history, &mut outcomes);
        } else {
            run_check(op, &current, stream, ctx, registry, policy, &mut outcomes);
        }
    }

    StreamReport {
        name: stream.to_string(),
        original: value.to_string(),
        filtered: current,
        truncated: false,
        filters: history,
        outcomes,
    }
}
