//! End-to-end execution against real processes: spawn semantics, error
//! isolation, timeouts, repeat groups, matrix expansion and concurrency.

mod common;

use std::time::Instant;

use common::{run_yaml, run_yaml_with};
use verdict::pipeline::CheckPolicy;
use verdict::results::{ResultNode, RunReport, Status};
use verdict::runner::RunConfig;

fn leaf_statuses(report: &RunReport) -> Vec<(String, Status)> {
    fn walk(node: &ResultNode, out: &mut Vec<(String, Status)>) {
        if node.is_leaf() {
            out.push((node.name.clone(), node.status));
        }
        for child in &node.children {
            walk(child, out);
        }
    }
    let mut out = Vec::new();
    for node in &report.tests {
        walk(node, &mut out);
    }
    out
}

fn find_leaf<'a>(report: &'a RunReport, name: &str) -> &'a ResultNode {
    fn walk<'a>(node: &'a ResultNode, name: &str) -> Option<&'a ResultNode> {
        if node.name == name {
            return Some(node);
        }
        node.children.iter().find_map(|c| walk(c, name))
    }
    report
        .tests
        .iter()
        .find_map(|n| walk(n, name))
        .unwrap_or_else(|| panic!("no node named {:?}", name))
}

#[test]
fn a_passing_echo_test_passes() {
    let report = run_yaml(
        "
version: 1
exec:
  cmd: /bin/echo
  args: [hello world]
tests:
  - name: greets
    stdout:
      - trim: {}
      - equals: hello world
    exit: 0
",
    );
    assert!(report.passed());
    let counts = report.counts();
    assert_eq!(counts.passed, 1);
    assert_eq!(counts.total(), 1);
}

#[test]
fn failing_checks_fail_the_case_but_report_every_stage() {
    let report = run_yaml(
        "
version: 1
exec:
  cmd: /bin/echo
  args: [hello]
tests:
  - name: wrong
    stdout:
      - contains: nope
    stderr:
      - equals: \"\"
    exit: 0
",
    );
    assert!(!report.passed());
    let node = find_leaf(&report, "wrong");
    assert_eq!(node.status, Status::Failed);

    // Later stages still ran after the stdout failure.
    let iteration = &node.cases[0].iterations[0];
    assert_eq!(iteration.streams.len(), 2);
    assert!(iteration.streams[1].outcomes[0].passed);
    assert!(iteration.exit_outcome.as_ref().map(|o| o.passed).unwrap_or(false));
}

#[test]
fn a_missing_binary_errors_only_its_own_case() {
    let report = run_yaml(
        "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: broken
    exec:
      cmd: /nonexistent/binary-xyz
  - name: healthy
    args: [ok]
    stdout:
      - contains: ok
",
    );
    assert!(!report.passed());
    let statuses = leaf_statuses(&report);
    assert_eq!(
        statuses,
        vec![
            ("broken".to_string(), Status::Errored),
            ("healthy".to_string(), Status::Passed),
        ]
    );

    let broken = find_leaf(&report, "broken");
    let error = broken.cases[0].error.as_deref().unwrap_or_default();
    assert!(error.contains("/nonexistent/binary-xyz"), "{}", error);
}

#[test]
fn timeouts_are_distinct_from_failures_and_errors() {
    let started = Instant::now();
    let report = run_yaml(
        "
version: 1
exec:
  cmd: /bin/sleep
  args: [5]
  timeout: 0.2
tests:
  - name: slow
",
    );
    // The process group was killed; nothing waited the full five seconds.
    assert!(started.elapsed().as_secs_f64() < 3.0);

    let node = find_leaf(&report, "slow");
    assert_eq!(node.status, Status::TimedOut);
    assert_eq!(report.counts().timed_out, 1);
}

#[test]
fn repeat_iterations_share_one_context() {
    let report = run_yaml(
        "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: counting
    setup:
      - eval: \"x = 3\"
    args: [\"{{ x++ }}\"]
    repeat: 2
",
    );
    let node = find_leaf(&report, "counting");
    let commands: Vec<&str> = node.cases[0]
        .iterations
        .iter()
        .map(|i| i.command.as_str())
        .collect();
    // x++ renders the current value and then increments, persisting
    // across iterations of the same repeat group.
    assert_eq!(commands, vec!["/bin/echo 3", "/bin/echo 4"]);
}

#[test]
fn the_implicit_index_variable_counts_iterations() {
    let report = run_yaml(
        "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: indexed
    args: [\"{{ index }}\"]
    repeat: 3
    stdout:
      - trim: {}
      - equals: \"{{ index }}\"
",
    );
    assert!(report.passed());
    let node = find_leaf(&report, "indexed");
    assert_eq!(node.cases[0].iterations.len(), 3);
    assert_eq!(node.cases[0].iterations[2].command, "/bin/echo 3");
}

#[test]
fn matrix_combinations_run_as_independent_cases() {
    let report = run_yaml(
        "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: parameterized
    matrix:
      n: [1, 2]
      mode: [fast, slow]
    args: [\"{{ mode }}-{{ n }}\"]
    stdout:
      - trim: {}
      - equals: \"{{ mode }}-{{ n }}\"
",
    );
    assert!(report.passed());
    let node = find_leaf(&report, "parameterized");
    assert_eq!(node.cases.len(), 4);
    let labels: Vec<&str> = node.cases.iter().map(|c| c.label.as_str()).collect();
    assert!(labels.contains(&"[n=1, mode=fast]"));
    assert!(labels.contains(&"[n=2, mode=slow]"));
}

#[test]
fn exit_codes_are_checked_when_declared() {
    let report = run_yaml(
        "
version: 1
exec:
  cmd: [/bin/sh, -c, \"exit 3\"]
tests:
  - name: expected-failure
    exit: 3
  - name: surprise
    exit: 0
",
    );
    let statuses = leaf_statuses(&report);
    assert_eq!(statuses[0], ("expected-failure".to_string(), Status::Passed));
    assert_eq!(statuses[1], ("surprise".to_string(), Status::Failed));

    let surprise = find_leaf(&report, "surprise");
    let outcome = surprise.cases[0].iterations[0]
        .exit_outcome
        .as_ref()
        .expect("exit outcome");
    assert!(outcome.message.contains("expected exit status 0"));
    assert!(outcome.message.contains('3'));
}

#[test]
fn stdin_is_fed_to_the_process() {
    let report = run_yaml(
        "
version: 1
exec:
  cmd: /bin/cat
  stdin: hello from stdin
tests:
  - name: cats
    stdout:
      - equals: hello from stdin
",
    );
    assert!(report.passed());
}

#[test]
fn stdin_line_sequences_join_with_newlines() {
    let report = run_yaml(
        "
version: 1
exec:
  cmd: /bin/cat
  stdin: [first, second]
tests:
  - name: joined
    stdout:
      - equals: \"first\\nsecond\"
",
    );
    assert!(report.passed());
}

#[test]
fn file_streams_check_written_files() {
    let dir = tempfile::tempdir().expect("tempdir");
    let doc = format!(
        "
version: 1
exec:
  cmd: [/bin/sh, -c, \"echo payload > out.txt\"]
  cwd: {}
tests:
  - name: writes-file
    files:
      out.txt:
        - trim: {{}}
        - equals: payload
  - name: forgets-file
    files:
      never-written.txt:
        - contains: anything
",
        dir.path().display()
    );
    let report = run_yaml(&doc);
    let statuses = leaf_statuses(&report);
    assert_eq!(statuses[0].1, Status::Passed);
    assert_eq!(statuses[1].1, Status::Failed);

    let missing = find_leaf(&report, "forgets-file");
    let outcome = &missing.cases[0].iterations[0].streams[2].outcomes[0];
    assert!(outcome.message.contains("not found"), "{}", outcome.message);
}

#[test]
fn env_additions_reach_the_child() {
    let report = run_yaml(
        "
version: 1
exec:
  cmd: [/bin/sh, -c, \"echo $GREETING\"]
  env:
    GREETING: bonjour
tests:
  - name: env
    stdout:
      - trim: {}
      - equals: bonjour
",
    );
    assert!(report.passed());
}

#[test]
fn teardown_runs_even_after_a_timeout() {
    let dir = tempfile::tempdir().expect("tempdir");
    let marker = dir.path().join("teardown-ran");
    let doc = format!(
        "
version: 1
exec:
  cmd: /bin/sleep
  args: [5]
  timeout: 0.2
tests:
  - name: slow
    teardown:
      - run: \"touch {}\"
",
        marker.display()
    );
    let report = run_yaml(&doc);
    assert_eq!(find_leaf(&report, "slow").status, Status::TimedOut);
    assert!(marker.exists(), "teardown hook did not run");
}

#[test]
fn failing_setup_errors_the_case() {
    let report = run_yaml(
        "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: bad-setup
    setup:
      - run: \"exit 9\"
",
    );
    let node = find_leaf(&report, "bad-setup");
    assert_eq!(node.status, Status::Errored);
    assert!(node.cases[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("setup failed"));
}

#[test]
fn outcomes_match_between_sequential_and_concurrent_runs() {
    let doc = "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: suite-a
    tests:
      - name: a1
        args: [one]
        stdout: [{ contains: one }]
      - name: a2
        args: [two]
        stdout: [{ contains: wrong }]
  - name: suite-b
    tests:
      - name: b1
        args: [three]
        stdout: [{ contains: three }]
      - name: b2
        exec:
          cmd: /nonexistent/binary-xyz
";
    let sequential = run_yaml_with(
        doc,
        &RunConfig {
            jobs: Some(1),
            ..RunConfig::default()
        },
    );
    let concurrent = run_yaml_with(
        doc,
        &RunConfig {
            jobs: Some(4),
            ..RunConfig::default()
        },
    );
    assert_eq!(leaf_statuses(&sequential), leaf_statuses(&concurrent));
}

#[test]
fn seeded_runs_are_reproducible() {
    let doc = "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: random
    seed: 12345
    args: [\"{{ randint(0, 1000000) }}\"]
";
    let first = run_yaml(doc);
    let second = run_yaml(doc);
    let a = &find_leaf(&first, "random").cases[0].iterations[0].command;
    let b = &find_leaf(&second, "random").cases[0].iterations[0].command;
    assert_eq!(a, b);
}

#[test]
fn fail_fast_policy_reaches_the_pipeline() {
    let doc = "
version: 1
exec:
  cmd: /bin/echo
  args: [hello]
tests:
  - name: t
    stdout:
      - contains: nope
      - contains: hello
";
    let report = run_yaml_with(
        doc,
        &RunConfig {
            policy: CheckPolicy::FailFast,
            ..RunConfig::default()
        },
    );
    let node = find_leaf(&report, "t");
    assert_eq!(node.cases[0].iterations[0].streams[0].outcomes.len(), 1);
}

#[test]
fn oversized_output_is_truncated_with_a_marker() {
    let doc = "
version: 1
exec:
  cmd: /bin/echo
  args: [aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa]
tests:
  - name: chatty
    stdout:
      - contains: aaaa
";
    let report = run_yaml_with(
        doc,
        &RunConfig {
            max_capture: 16,
            ..RunConfig::default()
        },
    );
    let node = find_leaf(&report, "chatty");
    let stream = &node.cases[0].iterations[0].streams[0];
    assert!(stream.truncated);
    assert!(
        stream.original.contains("truncated"),
        "marker missing from {:?}",
        stream.original
    );
}

#[test]
fn phase_durations_are_recorded() {
    let report = run_yaml(
        "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: timed
    setup:
      - run: \"true\"
",
    );
    let case = &find_leaf(&report, "timed").cases[0];
    assert!(case.durations.setup.as_nanos() > 0);
    assert!(case.durations.exec.as_nanos() > 0);
}
