//! Operation registry.
//!
//! Built-in filter and check names form a closed table; plugins register
//! additional operations behind one interface per category (filter:
//! value -> value, check: value -> outcome). The normalizer consults the
//! registry to resolve names, the pipeline to execute plugin ops.

use std::sync::Arc;

use im::HashMap;
use once_cell::sync::Lazy;

/// Filter plugin signature: transform the running stream value.
/// The second argument is the operation's configuration value as written
/// in the document (canonicalized, `explain` stripped).
pub type PluginFilterFn =
    Arc<dyn Fn(&str, &serde_yaml::Value) -> Result<String, String> + Send + Sync>;

/// Check plugin signature: `Ok(())` passes, `Err(message)` is a failed
/// outcome with that message.
pub type PluginCheckFn =
    Arc<dyn Fn(&str, &serde_yaml::Value) -> Result<(), String> + Send + Sync>;

/// Filter operations built into the engine.
pub const BUILTIN_FILTERS: &[&str] = &["trim", "lower", "upper", "sub", "map_eval"];

/// Check operations built into the engine.
pub const BUILTIN_CHECKS: &[&str] = &[
    "match",
    "contains",
    "not_contains",
    "equals",
    "not_equals",
    "lt",
    "lte",
    "gt",
    "gte",
    "check_eval",
    "capture",
];

static BUILTIN_NAMES: Lazy<Vec<&'static str>> = Lazy::new(|| {
    let mut names = Vec::with_capacity(BUILTIN_FILTERS.len() + BUILTIN_CHECKS.len());
    names.extend_from_slice(BUILTIN_FILTERS);
    names.extend_from_slice(BUILTIN_CHECKS);
    names
});

/// How a name resolved against the registry.
#[derive(Clone)]
pub enum Resolution {
    BuiltinFilter,
    BuiltinCheck,
    PluginFilter(PluginFilterFn),
    PluginCheck(PluginCheckFn),
}

impl Resolution {
    pub fn is_filter(&self) -> bool {
        matches!(self, Resolution::BuiltinFilter | Resolution::PluginFilter(_))
    }
}

/// Registry for all operations, inspectable at runtime.
#[derive(Clone, Default)]
pub struct OpRegistry {
    filters: HashMap<String, PluginFilterFn>,
    checks: HashMap<String, PluginCheckFn>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    // API for extensibility. Later registrations shadow earlier ones.
    pub fn register_filter(
        &mut self,
        name: &str,
        func: impl Fn(&str, &serde_yaml::Value) -> Result<String, String> + Send + Sync + 'static,
    ) {
        self.filters.insert(name.to_string(), Arc::new(func));
    }

    pub fn register_check(
        &mut self,
        name: &str,
        func: impl Fn(&str, &serde_yaml::Value) -> Result<(), String> + Send + Sync + 'static,
    ) {
        self.checks.insert(name.to_string(), Arc::new(func));
    }

    /// Resolve an operation name. Built-ins win over plugins so a plugin
    /// cannot silently change core semantics.
    pub fn resolve(&self, name: &str) -> Option<Resolution> {
        if BUILTIN_FILTERS.contains(&name) {
            return Some(Resolution::BuiltinFilter);
        }
        if BUILTIN_CHECKS.contains(&name) {
            return Some(Resolution::BuiltinCheck);
        }
        if let Some(f) = self.filters.get(name) {
            return Some(Resolution::PluginFilter(f.clone()));
        }
        if let Some(c) = self.checks.get(name) {
            return Some(Resolution::PluginCheck(c.clone()));
        }
        None
    }

    pub fn plugin_filter(&self, name: &str) -> Option<PluginFilterFn> {
        self.filters.get(name).cloned()
    }

    pub fn plugin_check(&self, name: &str) -> Option<PluginCheckFn> {
        self.checks.get(name).cloned()
    }

    pub fn has(&self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Every known operation name: built-ins plus registered plugins.
    pub fn known_names(&self) -> Vec<String> {
        let mut names: Vec<String> = BUILTIN_NAMES.iter().map(|n| n.to_string()).collect();
        names.extend(self.filters.keys().cloned());
        names.extend(self.checks.keys().cloned());
        names.sort();
        names.dedup();
        names
    }

    /// Rank known names by edit distance to `name` for the "did you mean"
    /// diagnostic. Only close misses (distance <= 2, or <= a third of the
    /// name's length) are offered.
    pub fn suggest(&self, name: &str) -> Vec<String> {
        let cutoff = 2.max(name.len() / 3);
        let mut ranked: Vec<(usize, String)> = self
            .known_names()
            .into_iter()
            .map(|candidate| (levenshtein(name, &candidate), candidate))
            .filter(|(d, _)| *d <= cutoff)
            .collect();
        ranked.sort();
        ranked.into_iter().take(3).map(|(_, n)| n).collect()
    }
}

/// Classic two-row Levenshtein distance. The registry is small, so there
/// is no need for anything smarter.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}
