//! Add-only inheritance merge.
//!
//! Walks the normalized tree root-to-leaf and computes every node's
//! *effective* configuration: scalars resolve by presence (a node's own
//! value wins, absence defers to the nearest ancestor), `env` extends
//! key-wise, `args`/`filters`/`setup`/`teardown` concatenate ancestor
//! entries first. Stream specs (`stdout`/`stderr`/`files`/`exit`) apply
//! only at the declaring node and are copied verbatim. Descendants can
//! never remove or replace what an ancestor declared, and an empty list
//! literal is a no-op.

use serde::{Deserialize, Serialize};

use crate::errors::{unspanned, ErrorKind, ErrorReporting, PhaseContext, SourceContext, VerdictError};
use crate::ids::TestId;
use crate::schema::{ExecContext, ExitSpec, Hook, Limits, Op, Scalar, Spec, TestNode};

/// A tree node with every inheritable field fully resolved - no further
/// ancestor lookups are needed downstream. Serializable so the resolved
/// tree can be dumped for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EffectiveNode {
    pub id: TestId,
    pub name: String,
    pub description: Option<String>,

    pub exec: ExecContext,
    pub filters: Vec<Op>,
    pub setup: Vec<Hook>,
    pub teardown: Vec<Hook>,

    pub repeat: u32,
    pub matrix: Vec<(String, Vec<Scalar>)>,
    pub seed: Option<u64>,

    pub stdout: Vec<Op>,
    pub stderr: Vec<Op>,
    pub files: Vec<(String, Vec<Op>)>,
    pub exit: Option<ExitSpec>,

    pub children: Vec<EffectiveNode>,
}

impl EffectiveNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

/// Overlay a node's own execution settings on the inherited context.
fn overlay_exec(inherited: &ExecContext, own: &ExecContext) -> ExecContext {
    let mut env = inherited.env.clone();
    for (k, v) in &own.env {
        env.insert(k.clone(), v.clone());
    }

    let mut args = inherited.args.clone();
    args.extend(own.args.iter().cloned());

    ExecContext {
        cmd: own.cmd.clone().or_else(|| inherited.cmd.clone()),
        timeout: own.timeout.or(inherited.timeout),
        stdin: own.stdin.clone().or_else(|| inherited.stdin.clone()),
        stdin_join: own
            .stdin_join
            .clone()
            .or_else(|| inherited.stdin_join.clone()),
        args,
        env,
        cwd: own.cwd.clone().or_else(|| inherited.cwd.clone()),
        shell: own.shell.or(inherited.shell),
        limits: Limits {
            cpu: own.limits.cpu.or(inherited.limits.cpu),
            memory: own.limits.memory.or(inherited.limits.memory),
            nofile: own.limits.nofile.or(inherited.limits.nofile),
        },
    }
}

fn concat<T: Clone>(inherited: &[T], own: &[T]) -> Vec<T> {
    let mut out = Vec::with_capacity(inherited.len() + own.len());
    out.extend_from_slice(inherited);
    out.extend_from_slice(own);
    out
}

struct Inherited {
    exec: ExecContext,
    filters: Vec<Op>,
    setup: Vec<Hook>,
    teardown: Vec<Hook>,
    seed: Option<u64>,
}

fn merge_node(
    node: &TestNode,
    id: TestId,
    inherited: &Inherited,
    ctx: &PhaseContext,
) -> Result<EffectiveNode, VerdictError> {
    let exec = overlay_exec(&inherited.exec, &node.exec);
    let filters = concat(&inherited.filters, &node.filters);
    let setup = concat(&inherited.setup, &node.setup);
    let teardown = concat(&inherited.teardown, &node.teardown);
    let seed = node.seed.or(inherited.seed);

    // Leaves spawn processes; a leaf without any resolved command cannot
    // run and the document as a whole is rejected before execution.
    if node.is_leaf() && exec.cmd.is_none() {
        return Err(ctx.report(
            ErrorKind::Merge {
                path: format!("test {} ({})", id, node.name),
                message: "no 'cmd' resolved from this node or its ancestors".to_string(),
            },
            unspanned(),
        ));
    }

    let next = Inherited {
        exec: exec.clone(),
        filters: filters.clone(),
        setup: setup.clone(),
        teardown: teardown.clone(),
        seed,
    };

    let children = node
        .tests
        .iter()
        .enumerate()
        .map(|(i, child)| merge_node(child, id.child(i + 1), &next, ctx))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(EffectiveNode {
        id,
        name: node.name.clone(),
        description: node.description.clone(),
        exec,
        filters,
        setup,
        teardown,
        repeat: node.repeat,
        matrix: node.matrix.clone(),
        seed,
        stdout: node.stdout.clone(),
        stderr: node.stderr.clone(),
        files: node.files.clone(),
        exit: node.exit.clone(),
        children,
    })
}

/// Compute the effective forest for a normalized spec.
pub fn merge_spec(spec: &Spec, source: &SourceContext) -> Result<Vec<EffectiveNode>, VerdictError> {
    let ctx = PhaseContext::new(source.clone(), "merge");
    let base = Inherited {
        exec: spec.exec.clone(),
        filters: spec.filters.clone(),
        setup: Vec::new(),
        teardown: Vec::new(),
        seed: None,
    };

    spec.tests
        .iter()
        .enumerate()
        .map(|(i, node)| merge_node(node, TestId::root(i + 1), &base, &ctx))
        .collect()
}
