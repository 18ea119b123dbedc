//! Per-test-case execution context.
//!
//! Owns the variable mapping and the seeded RNG for one test case, renders
//! `{{ ... }}` templates, and implements the increment forms `x++` / `++x`.
//! All other expressions are delegated to the restricted evaluator in
//! [`expr`]. Nothing here is shared between test cases; the planner hands
//! every repeat group its own context.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;
use regex::Regex;

use crate::errors::{ErrorReporting, PhaseContext, SourceContext, VerdictError};

pub mod expr;

pub use expr::{EvalEnv, Value};

static MUSTACHE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)\{\{\s*(.+?)\s*\}\}").expect("static regex"));
static POST_INC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([A-Za-z_][A-Za-z0-9_]*)\s*\+\+$").expect("static regex"));
static PRE_INC_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\+\+\s*([A-Za-z_][A-Za-z0-9_]*)$").expect("static regex"));

/// Mutable variable state and RNG for one test case.
pub struct ExecutionContext {
    vars: HashMap<String, Value>,
    prng: Xoshiro256StarStar,
    reporter: PhaseContext,
}

impl ExecutionContext {
    /// Create a context from a full 32-byte seed (the planner derives one
    /// per repeat group).
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            vars: HashMap::new(),
            prng: Xoshiro256StarStar::from_seed(seed),
            reporter: PhaseContext::new(SourceContext::fallback("execution context"), "context"),
        }
    }

    /// Convenience constructor from a plain integer seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            vars: HashMap::new(),
            prng: Xoshiro256StarStar::seed_from_u64(seed),
            reporter: PhaseContext::new(SourceContext::fallback("execution context"), "context"),
        }
    }

    /// Set a variable in the context.
    pub fn set_var(&mut self, name: &str, value: Value) {
        self.vars.insert(name.to_string(), value);
    }

    /// Get a variable from the context.
    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// Remove a variable from the context.
    pub fn remove_var(&mut self, name: &str) -> Option<Value> {
        self.vars.remove(name)
    }

    // ------------------------------------------------------------------------
    // Expression evaluation
    // ------------------------------------------------------------------------

    /// Evaluate one expression. The two increment forms are recognized
    /// before generic parsing; everything else goes through the restricted
    /// evaluator.
    pub fn evaluate(&mut self, expression: &str) -> Result<Value, VerdictError> {
        let trimmed = expression.trim();

        if let Some(caps) = POST_INC_RE.captures(trimmed) {
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            return self.post_increment(name);
        }
        if let Some(caps) = PRE_INC_RE.captures(trimmed) {
            let name = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
            return self.pre_increment(name);
        }

        expr::evaluate(trimmed, self)
            .map_err(|message| self.reporter.eval_failure(trimmed, &message))
    }

    /// Evaluate a `check_eval`/`map_eval` body with the stream value bound
    /// to `value`. The binding is scoped to this one evaluation.
    pub fn evaluate_with_value(
        &mut self,
        expression: &str,
        value: &str,
    ) -> Result<Value, VerdictError> {
        let previous = self.vars.insert("value".to_string(), Value::Str(value.to_string()));
        let result = self.evaluate(expression);
        match previous {
            Some(v) => {
                self.vars.insert("value".to_string(), v);
            }
            None => {
                self.vars.remove("value");
            }
        }
        result
    }

    /// Run one `eval` hook statement (`name = expr`, an increment form, or
    /// a bare expression).
    pub fn execute(&mut self, statement: &str) -> Result<(), VerdictError> {
        let trimmed = statement.trim();
        if POST_INC_RE.is_match(trimmed) || PRE_INC_RE.is_match(trimmed) {
            return self.evaluate(trimmed).map(|_| ());
        }
        let binding = expr::evaluate_statement(trimmed, self)
            .map_err(|message| self.reporter.eval_failure(trimmed, &message))?;
        if let Some((name, value)) = binding {
            self.vars.insert(name, value);
        }
        Ok(())
    }

    fn numeric_var(&mut self, name: &str) -> Result<f64, VerdictError> {
        match self.vars.get(name) {
            Some(value) => value.as_num().ok_or_else(|| {
                self.reporter
                    .coercion_failure(&value.to_string(), "a number")
            }),
            None => Err(self
                .reporter
                .eval_failure(name, &format!("unknown identifier '{}'", name))),
        }
    }

    /// `x++`: use the current value, then increment.
    fn post_increment(&mut self, name: &str) -> Result<Value, VerdictError> {
        let current = self.numeric_var(name)?;
        self.vars.insert(name.to_string(), Value::Num(current + 1.0));
        Ok(Value::Num(current))
    }

    /// `++x`: increment, then use the new value.
    fn pre_increment(&mut self, name: &str) -> Result<Value, VerdictError> {
        let current = self.numeric_var(name)?;
        let next = current + 1.0;
        self.vars.insert(name.to_string(), Value::Num(next));
        Ok(Value::Num(next))
    }

    // ------------------------------------------------------------------------
    // Template rendering
    // ------------------------------------------------------------------------

    /// Replace each `{{ ... }}` span with the string form of its evaluated
    /// expression.
    pub fn render(&mut self, template: &str) -> Result<String, VerdictError> {
        let mut out = String::with_capacity(template.len());
        let mut last = 0;
        // Collect spans first: the replacement evaluation needs `&mut self`.
        let spans: Vec<(usize, usize, String)> = MUSTACHE_RE
            .captures_iter(template)
            .map(|caps| {
                let whole = caps.get(0).expect("capture 0 always present");
                let inner = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
                (whole.start(), whole.end(), inner.to_string())
            })
            .collect();

        for (start, end, inner) in spans {
            out.push_str(&template[last..start]);
            let value = self.evaluate(&inner)?;
            out.push_str(&value.to_string());
            last = end;
        }
        out.push_str(&template[last..]);
        Ok(out)
    }

    /// Render each element of a string list (args and stdin line forms).
    pub fn render_all(&mut self, templates: &[String]) -> Result<Vec<String>, VerdictError> {
        templates.iter().map(|t| self.render(t)).collect()
    }
}

impl EvalEnv for ExecutionContext {
    fn get_var(&self, name: &str) -> Option<Value> {
        self.vars.get(name).cloned()
    }

    fn rand_unit(&mut self) -> f64 {
        self.prng.gen::<f64>()
    }

    fn rand_range(&mut self, lo: i64, hi: i64) -> i64 {
        self.prng.gen_range(lo..=hi)
    }
}
