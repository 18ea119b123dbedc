//! Normalization behavior: dual forms, Perl-style regex syntax, unknown
//! operation diagnostics, and structural validation.

mod common;

use common::{normalize_ok, normalize_yaml};
use verdict::schema::{CmdLine, Op, Scalar, StdinSpec};
use verdict::ErrorKind;

const MINIMAL: &str = "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: placeholder
";

fn with_stdout_ops(ops_yaml: &str) -> String {
    format!(
        "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: t
    stdout:
{}
",
        ops_yaml
    )
}

#[test]
fn minimal_document_normalizes() {
    let spec = normalize_ok(MINIMAL);
    assert_eq!(spec.version, 1);
    assert_eq!(spec.exec.cmd, Some(CmdLine::Line("/bin/echo".to_string())));
    assert_eq!(spec.tests.len(), 1);
    assert!(spec.tests[0].is_leaf());
}

#[test]
fn compact_and_canonical_forms_are_confluent() {
    let compact = with_stdout_ops("      - contains: Version");
    let canonical = with_stdout_ops("      - contains: { value: Version }");
    let a = normalize_ok(&compact);
    let b = normalize_ok(&canonical);
    assert_eq!(a.tests[0].stdout, b.tests[0].stdout);
    assert_eq!(
        a.tests[0].stdout[0],
        Op::Contains {
            value: "Version".to_string(),
            explain: None,
        }
    );
}

#[test]
fn explain_spellings_are_tolerated() {
    for key in ["explain", "explanation", "explaination"] {
        let doc = with_stdout_ops(&format!(
            "      - equals: {{ value: ok, {}: \"should be ok\" }}",
            key
        ));
        let spec = normalize_ok(&doc);
        assert_eq!(
            spec.tests[0].stdout[0],
            Op::Equals {
                value: "ok".to_string(),
                explain: Some("should be ok".to_string()),
            }
        );
    }
}

#[test]
fn scalar_comparison_values_coerce_to_strings() {
    let spec = normalize_ok(&with_stdout_ops("      - equals: 42"));
    assert_eq!(
        spec.tests[0].stdout[0],
        Op::Equals {
            value: "42".to_string(),
            explain: None,
        }
    );
}

#[test]
fn numeric_checks_accept_numeric_strings() {
    let spec = normalize_ok(&with_stdout_ops("      - gt: \"10\""));
    assert_eq!(
        spec.tests[0].stdout[0],
        Op::Gt {
            value: 10.0,
            explain: None,
        }
    );
}

#[test]
fn perl_match_form_normalizes_pattern_and_flags() {
    let spec = normalize_ok(&with_stdout_ops("      - match: \"m/ver\\\\d+/i\""));
    assert_eq!(
        spec.tests[0].stdout[0],
        Op::Match {
            regex: "ver\\d+".to_string(),
            flags: Some("i".to_string()),
            explain: None,
        }
    );
}

#[test]
fn perl_sub_form_supports_alternate_delimiters() {
    let spec = normalize_ok(&with_stdout_ops("      - sub: \"s|foo|bar|g\""));
    assert_eq!(
        spec.tests[0].stdout[0],
        Op::Sub {
            regex: "foo".to_string(),
            repl: "bar".to_string(),
            flags: Some("g".to_string()),
        }
    );
}

#[test]
fn plain_sub_string_deletes_matches() {
    let spec = normalize_ok(&with_stdout_ops("      - sub: \"\\\\s+\""));
    assert_eq!(
        spec.tests[0].stdout[0],
        Op::Sub {
            regex: "\\s+".to_string(),
            repl: String::new(),
            flags: None,
        }
    );
}

#[test]
fn invalid_regexes_are_rejected_at_normalization_time() {
    let err = normalize_yaml(&with_stdout_ops("      - match: \"(unclosed\"")).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidShape { .. }));
}

#[test]
fn unknown_operations_get_suggestions() {
    let err = normalize_yaml(&with_stdout_ops("      - containz: x")).unwrap_err();
    match err.kind {
        ErrorKind::UnknownOp {
            ref path,
            ref name,
            ref suggestions,
        } => {
            assert_eq!(name, "containz");
            assert!(path.contains("stdout"), "path was {:?}", path);
            assert_eq!(suggestions.first().map(String::as_str), Some("contains"));
        }
        other => panic!("expected UnknownOp, got {:?}", other),
    }
}

#[test]
fn checks_cannot_appear_in_filter_lists() {
    let doc = "
version: 1
exec:
  cmd: /bin/echo
filters:
  - contains: nope
tests:
  - name: t
";
    let err = normalize_yaml(doc).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidShape { .. }));
}

#[test]
fn capture_normalizes_nested_tests_and_defaults_group() {
    let doc = with_stdout_ops(
        "      - capture:
          regex: \"(\\\\d+)\"
          tests:
            - lt: 4",
    );
    let spec = normalize_ok(&doc);
    match &spec.tests[0].stdout[0] {
        Op::Capture {
            regex,
            group,
            tests,
            ..
        } => {
            assert_eq!(regex, "(\\d+)");
            assert_eq!(*group, 1);
            assert_eq!(
                tests[0],
                Op::Lt {
                    value: 4.0,
                    explain: None,
                }
            );
        }
        other => panic!("expected a capture, got {:?}", other),
    }
}

#[test]
fn exec_args_accept_scalars_and_coerce_canonically() {
    let doc = "
version: 1
exec:
  cmd: /bin/echo
  args: [1, 2.5, true, text]
tests:
  - name: t
";
    let spec = normalize_ok(doc);
    assert_eq!(spec.exec.args, vec!["1", "2.5", "true", "text"]);
}

#[test]
fn stdin_accepts_text_and_line_forms() {
    let text_form = "
version: 1
exec:
  cmd: /bin/cat
  stdin: hello
tests:
  - name: t
";
    let spec = normalize_ok(text_form);
    assert_eq!(spec.exec.stdin, Some(StdinSpec::Text("hello".to_string())));

    let line_form = "
version: 1
exec:
  cmd: /bin/cat
  stdin: [a, b]
tests:
  - name: t
";
    let spec = normalize_ok(line_form);
    assert_eq!(
        spec.exec.stdin,
        Some(StdinSpec::Lines(vec!["a".to_string(), "b".to_string()]))
    );
}

#[test]
fn matrix_preserves_declaration_order_and_types() {
    let doc = "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: t
    matrix:
      n: [1, 2]
      mode: [fast, slow]
";
    let spec = normalize_ok(doc);
    let matrix = &spec.tests[0].matrix;
    assert_eq!(matrix[0].0, "n");
    assert_eq!(matrix[0].1, vec![Scalar::Num(1.0), Scalar::Num(2.0)]);
    assert_eq!(matrix[1].0, "mode");
}

#[test]
fn empty_matrix_lists_are_rejected() {
    let doc = "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: t
    matrix:
      n: []
";
    let err = normalize_yaml(doc).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidShape { .. }));
}

#[test]
fn exit_accepts_bare_and_canonical_forms() {
    let bare = "
version: 1
exec:
  cmd: /bin/true
tests:
  - name: t
    exit: 0
";
    let spec = normalize_ok(bare);
    assert_eq!(spec.tests[0].exit.as_ref().map(|e| e.code), Some(0));

    let canonical = "
version: 1
exec:
  cmd: /bin/true
tests:
  - name: t
    exit: { value: 3, explain: \"must fail with 3\" }
";
    let spec = normalize_ok(canonical);
    let exit = spec.tests[0].exit.as_ref().expect("exit spec");
    assert_eq!(exit.code, 3);
    assert_eq!(exit.explain.as_deref(), Some("must fail with 3"));
}

#[test]
fn files_accept_all_three_entry_forms() {
    let doc = "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: t
    files:
      plain.txt:
        - contains: a
      wrapped.txt:
        ops:
          - contains: b
      split.txt:
        filters:
          - trim: {}
        checks:
          - contains: c
";
    let spec = normalize_ok(doc);
    let files = &spec.tests[0].files;
    assert_eq!(files.len(), 3);
    assert_eq!(files[0].0, "plain.txt");
    assert_eq!(files[2].1.len(), 2);
    assert!(files[2].1[0].is_filter());
}

#[test]
fn hooks_must_be_run_or_eval() {
    let doc = "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: t
    setup:
      - compile: gcc main.c
";
    let err = normalize_yaml(doc).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::InvalidShape { .. }));
}

#[test]
fn parse_errors_carry_positions() {
    let err = normalize_yaml("version: [unclosed").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Parse { .. }));
    assert!(err.kind.is_global());
}
