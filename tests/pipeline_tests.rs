//! Stream pipeline semantics: strict declaration order, non-mutating
//! checks, numeric coercion, capture sub-streams and the check policy.

use verdict::context::ExecutionContext;
use verdict::pipeline::{evaluate_stream, CheckPolicy};
use verdict::registry::OpRegistry;
use verdict::results::StreamReport;
use verdict::schema::Op;

fn eval(ops: Vec<Op>, value: &str) -> StreamReport {
    let mut ctx = ExecutionContext::seeded(0);
    let registry = OpRegistry::new();
    evaluate_stream(
        &ops,
        &[],
        value,
        "stdout",
        &mut ctx,
        &registry,
        CheckPolicy::ReportAll,
    )
}

fn contains(value: &str) -> Op {
    Op::Contains {
        value: value.to_string(),
        explain: None,
    }
}

#[test]
fn filters_transform_in_declared_order() {
    let report = eval(vec![Op::Trim, Op::Upper], "  hello  ");
    assert_eq!(report.filtered, "HELLO");
    assert_eq!(report.filters.len(), 2);
    assert_eq!(report.filters[0].name, "trim");
    assert_eq!(report.filters[0].after, "hello");
}

#[test]
fn each_check_sees_the_value_at_its_position() {
    // check before the filter sees the raw value, check after sees the
    // filtered one.
    let report = eval(
        vec![contains("  x"), Op::Trim, contains("x")],
        "  x  ",
    );
    assert!(report.outcomes.iter().all(|o| o.passed));
    assert_eq!(report.filtered, "x");
}

#[test]
fn checks_do_not_mutate_the_stream_value() {
    let report = eval(
        vec![
            Op::Equals {
                value: "same".to_string(),
                explain: None,
            },
            contains("same"),
        ],
        "same",
    );
    assert!(report.outcomes.iter().all(|o| o.passed));
    assert_eq!(report.filtered, "same");
}

#[test]
fn sub_replaces_all_occurrences() {
    let report = eval(
        vec![Op::Sub {
            regex: "\\d+".to_string(),
            repl: "N".to_string(),
            flags: None,
        }],
        "a1 b22 c333",
    );
    assert_eq!(report.filtered, "aN bN cN");
}

#[test]
fn numeric_comparisons_coerce_and_fail_gracefully() {
    let gt10 = |value: &str| {
        let report = eval(
            vec![Op::Gt {
                value: 10.0,
                explain: None,
            }],
            value,
        );
        report.outcomes[0].clone()
    };

    assert!(!gt10("9").passed);
    assert!(gt10("11").passed);

    // Non-numeric input fails that check with a coercion explanation
    // rather than aborting the stream.
    let coerced = gt10("abc");
    assert!(!coerced.passed);
    assert!(coerced.message.contains("cannot convert"), "{}", coerced.message);
}

#[test]
fn capture_extracts_group_one_and_runs_nested_checks() {
    let report = eval(
        vec![Op::Capture {
            regex: "(\\d+)".to_string(),
            flags: None,
            group: 1,
            tests: vec![Op::Lt {
                value: 4.0,
                explain: None,
            }],
            explain: None,
        }],
        "7 apples",
    );

    assert_eq!(report.outcomes.len(), 1);
    let nested = &report.outcomes[0];
    assert_eq!(nested.check, "lt");
    assert_eq!(nested.stream, "stdout::capture[1]");
    assert!(!nested.passed);
    // The failure explanation references the captured "7".
    assert!(nested.message.contains('7'), "{}", nested.message);
}

#[test]
fn capture_without_a_match_fails_every_nested_check() {
    let report = eval(
        vec![Op::Capture {
            regex: "(\\d+)".to_string(),
            flags: None,
            group: 1,
            tests: vec![
                Op::Lt {
                    value: 4.0,
                    explain: None,
                },
                contains("anything"),
            ],
            explain: None,
        }],
        "no numbers here",
    );

    assert_eq!(report.outcomes.len(), 2);
    for outcome in &report.outcomes {
        assert!(!outcome.passed);
        assert!(outcome.message.contains("no match"), "{}", outcome.message);
    }
}

#[test]
fn map_eval_transforms_through_the_sandbox() {
    let report = eval(
        vec![
            Op::MapEval {
                expr: "upper(trim(value))".to_string(),
            },
            contains("HELLO"),
        ],
        "  hello  ",
    );
    assert!(report.outcomes.iter().all(|o| o.passed));
    assert_eq!(report.filtered, "HELLO");
}

#[test]
fn map_eval_failure_is_an_outcome_not_a_fault() {
    let report = eval(
        vec![Op::MapEval {
            expr: "boom(value)".to_string(),
        }],
        "input",
    );
    assert_eq!(report.outcomes.len(), 1);
    assert!(!report.outcomes[0].passed);
    // The value passes through unchanged for later operations.
    assert_eq!(report.filtered, "input");
}

#[test]
fn check_eval_passes_on_truthy_results() {
    let report = eval(
        vec![Op::CheckEval {
            expr: "len(value) >= 3 && contains(value, 'el')".to_string(),
            explain: None,
        }],
        "hello",
    );
    assert!(report.outcomes[0].passed);
}

#[test]
fn match_respects_flags() {
    let report = eval(
        vec![Op::Match {
            regex: "^world".to_string(),
            flags: Some("im".to_string()),
            explain: None,
        }],
        "Hello\nWORLD",
    );
    assert!(report.outcomes[0].passed);
}

#[test]
fn explain_templates_render_on_failure() {
    let report = eval(
        vec![Op::Equals {
            value: "expected".to_string(),
            explain: Some("wanted expected, saw {{ value }}".to_string()),
        }],
        "actual",
    );
    let outcome = &report.outcomes[0];
    assert!(!outcome.passed);
    assert_eq!(
        outcome.explain.as_deref(),
        Some("wanted expected, saw actual")
    );
}

#[test]
fn report_all_policy_evaluates_every_check() {
    let report = eval(vec![contains("missing"), contains("input")], "input");
    assert_eq!(report.outcomes.len(), 2);
    assert!(!report.outcomes[0].passed);
    assert!(report.outcomes[1].passed);
}

#[test]
fn fail_fast_policy_short_circuits_the_stream() {
    let mut ctx = ExecutionContext::seeded(0);
    let registry = OpRegistry::new();
    let report = evaluate_stream(
        &[contains("missing"), contains("input")],
        &[],
        "input",
        "stdout",
        &mut ctx,
        &registry,
        CheckPolicy::FailFast,
    );
    assert_eq!(report.outcomes.len(), 1);
    assert!(!report.outcomes[0].passed);
}

#[test]
fn global_filters_run_before_stream_ops() {
    let mut ctx = ExecutionContext::seeded(0);
    let registry = OpRegistry::new();
    let report = evaluate_stream(
        &[contains("HELLO")],
        &[Op::Trim, Op::Upper],
        "  hello  ",
        "stdout",
        &mut ctx,
        &registry,
        CheckPolicy::ReportAll,
    );
    assert!(report.outcomes[0].passed);
}

#[test]
fn plugin_ops_execute_through_the_registry() {
    let mut registry = OpRegistry::new();
    registry.register_filter("strip_digits", |value, _| {
        Ok(value.chars().filter(|c| !c.is_ascii_digit()).collect())
    });
    registry.register_check("is_short", |value, _| {
        if value.len() <= 5 {
            Ok(())
        } else {
            Err(format!("value {:?} is too long", value))
        }
    });

    let mut ctx = ExecutionContext::seeded(0);
    let ops = vec![
        Op::Plugin {
            name: "strip_digits".to_string(),
            value: serde_yaml::Value::Null,
            filter: true,
            explain: None,
        },
        Op::Plugin {
            name: "is_short".to_string(),
            value: serde_yaml::Value::Null,
            filter: false,
            explain: None,
        },
    ];
    let report = evaluate_stream(
        &ops,
        &[],
        "a1b2c3",
        "stdout",
        &mut ctx,
        &registry,
        CheckPolicy::ReportAll,
    );
    assert_eq!(report.filtered, "abc");
    assert!(report.outcomes[0].passed);
}
