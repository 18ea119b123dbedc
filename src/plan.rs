//! Test-plan expansion.
//!
//! Expands each effective leaf into concrete repeat groups: one per matrix
//! combination (cartesian product in declaration order, last variable
//! fastest), each carrying `repeat` sequential iterations and its own
//! deterministic 32-byte seed. Distinct combinations are fully independent
//! and may run concurrently; iterations inside one group share a single
//! execution context by construction.

use sha2::{Digest, Sha256};

use crate::merge::EffectiveNode;
use crate::schema::Scalar;

/// One planned repeat group: an effective leaf under one concrete matrix
/// assignment.
#[derive(Debug, Clone)]
pub struct PlannedCase {
    /// Position of this combination within the leaf's expansion (0-based).
    pub combo_index: usize,
    /// Concrete variable assignment, in matrix declaration order.
    pub assignment: Vec<(String, Scalar)>,
    /// Sequential iterations sharing one execution context.
    pub repeat: u32,
    /// Seed for the group's RNG.
    pub seed: [u8; 32],
}

impl PlannedCase {
    /// Display label suffix for this combination (`[n=2, mode=fast]`),
    /// empty without a matrix.
    pub fn label(&self) -> String {
        if self.assignment.is_empty() {
            return String::new();
        }
        let inner: Vec<String> = self
            .assignment
            .iter()
            .map(|(name, value)| format!("{}={}", name, value.canonical_text()))
            .collect();
        format!("[{}]", inner.join(", "))
    }
}

/// Derive a repeat group's seed from the resolved base seed, the node's
/// position in the tree and the combination index. Identical inputs always
/// produce identical RNG streams; distinct combinations never share one.
fn derive_seed(base: u64, node: &EffectiveNode, combo_index: usize) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(base.to_le_bytes());
    hasher.update(node.id.to_string().as_bytes());
    hasher.update((combo_index as u64).to_le_bytes());
    hasher.finalize().into()
}

/// Expand one effective leaf into its planned repeat groups.
///
/// Seed precedence: the node's own (inherited) `seed`, then the run-level
/// default, then fresh entropy.
pub fn plan_leaf(node: &EffectiveNode, default_seed: Option<u64>) -> Vec<PlannedCase> {
    let base = node
        .seed
        .or(default_seed)
        .unwrap_or_else(rand::random::<u64>);

    let combos = cartesian(&node.matrix);
    combos
        .into_iter()
        .enumerate()
        .map(|(combo_index, assignment)| PlannedCase {
            combo_index,
            assignment,
            repeat: node.repeat.max(1),
            seed: derive_seed(base, node, combo_index),
        })
        .collect()
}

/// Cartesian product over the matrix value lists. An empty matrix yields
/// exactly one empty assignment (the unparameterized case).
fn cartesian(matrix: &[(String, Vec<Scalar>)]) -> Vec<Vec<(String, Scalar)>> {
    let mut combos: Vec<Vec<(String, Scalar)>> = vec![Vec::new()];
    for (name, values) in matrix {
        let mut next = Vec::with_capacity(combos.len() * values.len());
        for combo in &combos {
            for value in values {
                let mut extended = combo.clone();
                extended.push((name.clone(), value.clone()));
                next.push(extended);
            }
        }
        combos = next;
    }
    combos
}

/// Total number of runnable iterations under a forest, for progress
/// reporting.
pub fn count_iterations(nodes: &[EffectiveNode]) -> usize {
    nodes
        .iter()
        .map(|node| {
            if node.is_leaf() {
                let combos: usize = node
                    .matrix
                    .iter()
                    .map(|(_, values)| values.len())
                    .product();
                combos.max(1) * node.repeat.max(1) as usize
            } else {
                count_iterations(&node.children)
            }
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TestId;
    use crate::schema::ExecContext;

    fn leaf(matrix: Vec<(String, Vec<Scalar>)>, repeat: u32, seed: Option<u64>) -> EffectiveNode {
        EffectiveNode {
            id: TestId::root(1),
            name: "leaf".to_string(),
            description: None,
            exec: ExecContext::default(),
            filters: Vec::new(),
            setup: Vec::new(),
            teardown: Vec::new(),
            repeat,
            matrix,
            seed,
            stdout: Vec::new(),
            stderr: Vec::new(),
            files: Vec::new(),
            exit: None,
            children: Vec::new(),
        }
    }

    #[test]
    fn matrix_expands_to_the_cartesian_product() {
        let node = leaf(
            vec![
                ("a".to_string(), vec![Scalar::Num(1.0), Scalar::Num(2.0)]),
                (
                    "b".to_string(),
                    vec![Scalar::Str("x".into()), Scalar::Str("y".into())],
                ),
            ],
            1,
            Some(0),
        );
        let cases = plan_leaf(&node, None);
        assert_eq!(cases.len(), 4);
        // Last declared variable varies fastest.
        assert_eq!(cases[0].label(), "[a=1, b=x]");
        assert_eq!(cases[1].label(), "[a=1, b=y]");
        assert_eq!(cases[2].label(), "[a=2, b=x]");
        assert_eq!(cases[3].label(), "[a=2, b=y]");
    }

    #[test]
    fn no_matrix_means_one_case() {
        let cases = plan_leaf(&leaf(Vec::new(), 3, Some(0)), None);
        assert_eq!(cases.len(), 1);
        assert_eq!(cases[0].repeat, 3);
        assert_eq!(cases[0].label(), "");
    }

    #[test]
    fn seeds_are_deterministic_and_distinct_per_combination() {
        let node = leaf(
            vec![("n".to_string(), vec![Scalar::Num(1.0), Scalar::Num(2.0)])],
            1,
            Some(99),
        );
        let first = plan_leaf(&node, None);
        let second = plan_leaf(&node, None);
        assert_eq!(first[0].seed, second[0].seed);
        assert_ne!(first[0].seed, first[1].seed);
    }
}
