//! Shared helpers for integration tests.

#![allow(dead_code)]

use verdict::errors::{SourceContext, VerdictError};
use verdict::loader::{load_str, Format};
use verdict::merge::{merge_spec, EffectiveNode};
use verdict::registry::OpRegistry;
use verdict::results::RunReport;
use verdict::runner::{run_str, RunConfig};
use verdict::schema::{normalize, Spec};

/// Normalize a YAML document against the built-in registry.
pub fn normalize_yaml(text: &str) -> Result<Spec, VerdictError> {
    let raw = load_str(text, "<test>", Format::Yaml)?;
    let registry = OpRegistry::new();
    let source = SourceContext::from_document("<test>", text);
    normalize(&raw, &registry, &source)
}

pub fn normalize_ok(text: &str) -> Spec {
    match normalize_yaml(text) {
        Ok(spec) => spec,
        Err(e) => panic!("expected a valid document, got: {}", e),
    }
}

/// Normalize and merge.
pub fn merge_yaml(text: &str) -> Result<Vec<EffectiveNode>, VerdictError> {
    let spec = normalize_yaml(text)?;
    let source = SourceContext::from_document("<test>", text);
    merge_spec(&spec, &source)
}

pub fn merge_ok(text: &str) -> Vec<EffectiveNode> {
    match merge_yaml(text) {
        Ok(forest) => forest,
        Err(e) => panic!("expected a mergeable document, got: {}", e),
    }
}

/// Run a whole document with the given config.
pub fn run_yaml_with(text: &str, config: &RunConfig) -> RunReport {
    let registry = OpRegistry::new();
    match run_str(text, "<test>", Format::Yaml, &registry, config) {
        Ok(report) => report,
        Err(e) => panic!("expected a runnable document, got: {}", e),
    }
}

/// Run a whole document with default settings.
pub fn run_yaml(text: &str) -> RunReport {
    run_yaml_with(text, &RunConfig::default())
}
