//! Inheritance merge: add-only composition, presence overlay, stream
//! locality and idempotence.

mod common;

use common::{merge_ok, merge_yaml};
use verdict::schema::{CmdLine, Op};
use verdict::ErrorKind;

#[test]
fn filters_concatenate_ancestor_first() {
    let forest = merge_ok(
        "
version: 1
exec:
  cmd: /bin/echo
filters:
  - trim: {}
tests:
  - name: parent
    filters:
      - lower: {}
    tests:
      - name: child
        filters:
          - upper: {}
",
    );
    let parent = &forest[0];
    let child = &parent.children[0];
    assert_eq!(parent.filters, vec![Op::Trim, Op::Lower]);
    assert_eq!(child.filters, vec![Op::Trim, Op::Lower, Op::Upper]);
}

#[test]
fn empty_list_literal_is_a_no_op() {
    let forest = merge_ok(
        "
version: 1
exec:
  cmd: /bin/echo
filters:
  - trim: {}
tests:
  - name: child
    filters: []
",
    );
    // Declaring an empty list neither replaces nor clears inherited entries.
    assert_eq!(forest[0].filters, vec![Op::Trim]);
}

#[test]
fn scalars_resolve_by_presence() {
    let forest = merge_ok(
        "
version: 1
exec:
  cmd: /bin/echo
  timeout: 5
  cwd: /tmp
tests:
  - name: parent
    exec:
      timeout: 1
    tests:
      - name: child
",
    );
    let parent = &forest[0];
    let child = &parent.children[0];
    // The child's own absence defers to the nearest ancestor's value.
    assert_eq!(parent.exec.timeout, Some(1.0));
    assert_eq!(child.exec.timeout, Some(1.0));
    assert_eq!(child.exec.cwd.as_deref(), Some("/tmp"));
    assert_eq!(child.exec.cmd, Some(CmdLine::Line("/bin/echo".to_string())));
}

#[test]
fn env_extends_and_overrides_per_key() {
    let forest = merge_ok(
        "
version: 1
exec:
  cmd: /bin/echo
  env:
    A: root
    B: root
tests:
  - name: child
    exec:
      env:
        B: child
        C: child
",
    );
    let env = &forest[0].exec.env;
    assert_eq!(env.get("A").map(String::as_str), Some("root"));
    assert_eq!(env.get("B").map(String::as_str), Some("child"));
    assert_eq!(env.get("C").map(String::as_str), Some("child"));
}

#[test]
fn args_concatenate_ancestor_first() {
    let forest = merge_ok(
        "
version: 1
exec:
  cmd: /bin/echo
  args: [--base]
tests:
  - name: child
    args: [--extra]
",
    );
    assert_eq!(forest[0].exec.args, vec!["--base", "--extra"]);
}

#[test]
fn setup_and_teardown_concatenate_ancestor_first() {
    let forest = merge_ok(
        "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: parent
    setup:
      - eval: \"a = 1\"
    teardown:
      - eval: \"b = 1\"
    tests:
      - name: child
        setup:
          - eval: \"c = 1\"
        teardown:
          - eval: \"d = 1\"
",
    );
    let child = &forest[0].children[0];
    let setup: Vec<&str> = child.setup.iter().map(|h| h.body.as_str()).collect();
    let teardown: Vec<&str> = child.teardown.iter().map(|h| h.body.as_str()).collect();
    assert_eq!(setup, vec!["a = 1", "c = 1"]);
    assert_eq!(teardown, vec!["b = 1", "d = 1"]);
}

#[test]
fn streams_apply_only_at_the_declaring_node() {
    let forest = merge_ok(
        "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: parent
    stdout:
      - contains: parent-only
    tests:
      - name: child
",
    );
    let parent = &forest[0];
    let child = &parent.children[0];
    assert_eq!(parent.stdout.len(), 1);
    assert!(child.stdout.is_empty());
    assert!(child.exit.is_none());
}

#[test]
fn merge_is_idempotent() {
    let doc = "
version: 1
exec:
  cmd: /bin/echo
  args: [--v]
filters:
  - trim: {}
tests:
  - name: parent
    filters:
      - lower: {}
    tests:
      - name: child
";
    let once = merge_ok(doc);
    let twice = merge_ok(doc);
    assert_eq!(once, twice);
}

#[test]
fn a_leaf_without_a_command_is_rejected() {
    let err = merge_yaml(
        "
version: 1
exec:
  timeout: 1
tests:
  - name: orphan
",
    )
    .unwrap_err();
    match err.kind {
        ErrorKind::Merge { ref path, .. } => assert!(path.contains("orphan")),
        other => panic!("expected a merge error, got {:?}", other),
    }
    assert!(err.kind.is_global());
}

#[test]
fn seed_inherits_by_presence() {
    let forest = merge_ok(
        "
version: 1
exec:
  cmd: /bin/echo
tests:
  - name: parent
    seed: 99
    tests:
      - name: child
      - name: overridden
        seed: 7
",
    );
    assert_eq!(forest[0].children[0].seed, Some(99));
    assert_eq!(forest[0].children[1].seed, Some(7));
}
