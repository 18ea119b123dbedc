//! Hierarchical test identifiers.
//!
//! A `TestId` is an immutable sequence of 1-based integers rendered with
//! dots (`1.2.3`), mirroring the position of a node in the test tree.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestId(Vec<usize>);

impl TestId {
    pub fn root(index: usize) -> Self {
        TestId(vec![index])
    }

    /// Identifier of the `index`-th child (1-based).
    pub fn child(&self, index: usize) -> Self {
        let mut parts = self.0.clone();
        parts.push(index);
        TestId(parts)
    }

    pub fn parts(&self) -> &[usize] {
        &self.0
    }

    /// Nesting depth; the root level is 1.
    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Indentation for hierarchical rendering.
    pub fn pad(&self, fill: &str) -> String {
        fill.repeat(self.0.len().saturating_sub(1))
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for part in &self.0 {
            if !first {
                write!(f, ".")?;
            }
            write!(f, "{}", part)?;
            first = false;
        }
        Ok(())
    }
}
