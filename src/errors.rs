//! Verdict error handling.
//!
//! One error type for the whole engine. The `kind` carries the taxonomy
//! (parse, schema, merge, eval, exec), the `source_info` ties the error to
//! the configuration document, and the `diagnostic_info` feeds miette's
//! rendering (code, help).

use std::fmt;
use std::sync::Arc;

use miette::{Diagnostic, LabeledSpan, NamedSource, SourceSpan};

// ============================================================================
// SOURCE CONTEXT - Error reporting infrastructure
// ============================================================================

/// Source context for error reporting: the configuration document (or a
/// fallback label when no document is in play, e.g. I/O failures).
#[derive(Debug, Clone)]
pub struct SourceContext {
    pub name: String,
    pub content: String,
}

impl SourceContext {
    /// Create a source context from real document content.
    pub fn from_document(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content: content.into(),
        }
    }

    /// Create a fallback when no document content is available.
    pub fn fallback(context: &str) -> Self {
        Self {
            name: "fallback".to_string(),
            content: format!("# {}", context),
        }
    }

    /// Convert to NamedSource for use with miette error reporting.
    pub fn to_named_source(&self) -> Arc<NamedSource<String>> {
        Arc::new(NamedSource::new(self.name.clone(), self.content.clone()))
    }
}

impl Default for SourceContext {
    fn default() -> Self {
        Self::fallback("default context")
    }
}

// ============================================================================
// ERROR TYPE
// ============================================================================

/// The single error type - kind, location, diagnostics.
#[derive(Debug)]
pub struct VerdictError {
    /// What went wrong (type-specific data).
    pub kind: ErrorKind,
    /// Where it happened.
    pub source_info: SourceInfo,
    /// How to help (auto-populated based on kind).
    pub diagnostic_info: DiagnosticInfo,
}

/// All error kinds as a closed enum.
///
/// `Parse`, `UnknownOp`/`InvalidShape` and `Merge` are global: they abort
/// the run before any process is spawned. The remaining kinds are local to
/// one test case and convert into a failed/errored outcome for that case
/// only.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ErrorKind {
    // Global errors - the document itself is unusable
    #[error("parse error: {message}")]
    Parse { message: String },
    #[error("unknown operation '{name}' at {path}")]
    UnknownOp {
        path: String,
        name: String,
        suggestions: Vec<String>,
    },
    #[error("invalid configuration at {path}: {message}")]
    InvalidShape { path: String, message: String },
    #[error("incompatible override at {path}: {message}")]
    Merge { path: String, message: String },

    // Local errors - confined to one test case
    #[error("failed to evaluate '{expression}': {message}")]
    Eval { expression: String, message: String },
    #[error("cannot convert {value:?} to {wanted}")]
    Coercion { value: String, wanted: String },
    #[error("failed to run '{command}': {message}")]
    Exec { command: String, message: String },
    #[error("timed out after {seconds} seconds")]
    Timeout { seconds: f64 },
    #[error("i/o error on '{path}': {message}")]
    Io { path: String, message: String },
}

/// Location information tying an error to the configuration document.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub source: Arc<NamedSource<String>>,
    pub primary_span: SourceSpan,
    pub phase: String,
}

/// Diagnostic enhancement data.
#[derive(Debug, Clone)]
pub struct DiagnosticInfo {
    pub help: Option<String>,
    pub error_code: String,
}

impl ErrorKind {
    /// Error category, used for propagation decisions and test assertions.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Parse { .. } => ErrorCategory::Parse,
            Self::UnknownOp { .. } | Self::InvalidShape { .. } => ErrorCategory::Schema,
            Self::Merge { .. } => ErrorCategory::Merge,
            Self::Eval { .. } | Self::Coercion { .. } => ErrorCategory::Eval,
            Self::Exec { .. } | Self::Timeout { .. } | Self::Io { .. } => ErrorCategory::Exec,
        }
    }

    /// True when the error aborts the whole run rather than a single case.
    pub fn is_global(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Parse | ErrorCategory::Schema | ErrorCategory::Merge
        )
    }

    /// Error code suffix for diagnostic codes.
    pub const fn code_suffix(&self) -> &'static str {
        match self {
            Self::Parse { .. } => "parse",
            Self::UnknownOp { .. } => "unknown_op",
            Self::InvalidShape { .. } => "invalid_shape",
            Self::Merge { .. } => "merge",
            Self::Eval { .. } => "eval",
            Self::Coercion { .. } => "coercion",
            Self::Exec { .. } => "exec",
            Self::Timeout { .. } => "timeout",
            Self::Io { .. } => "io",
        }
    }

    /// Default help text attached when the reporting context has none.
    fn default_help(&self) -> Option<String> {
        match self {
            Self::UnknownOp {
                name, suggestions, ..
            } => {
                let mut help = String::new();
                if let Some(best) = suggestions.first() {
                    help.push_str(&format!("did you mean `{}`? ", best));
                }
                help.push_str(&format!(
                    "If this is a plugin operation, try installing `verdict-{}`.",
                    name
                ));
                Some(help)
            }
            Self::Coercion { wanted, .. } => Some(format!(
                "numeric checks require the value to parse as {}",
                wanted
            )),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Parse,
    Schema,
    Merge,
    Eval,
    Exec,
}

impl std::error::Error for VerdictError {}

impl fmt::Display for VerdictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl Diagnostic for VerdictError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(&self.diagnostic_info.error_code))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.diagnostic_info
            .help
            .as_ref()
            .map(|h| Box::new(h) as Box<dyn fmt::Display>)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let labels = vec![LabeledSpan::new_with_span(
            Some(self.primary_label()),
            self.source_info.primary_span,
        )];
        Some(Box::new(labels.into_iter()))
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        Some(&*self.source_info.source)
    }
}

impl VerdictError {
    fn primary_label(&self) -> String {
        match &self.kind {
            ErrorKind::Parse { .. } => "invalid syntax".into(),
            ErrorKind::UnknownOp { .. } => "unknown operation".into(),
            ErrorKind::InvalidShape { .. } => "invalid shape".into(),
            ErrorKind::Merge { .. } => "incompatible override".into(),
            ErrorKind::Eval { .. } => "evaluation failed".into(),
            ErrorKind::Coercion { .. } => "not a number".into(),
            ErrorKind::Exec { .. } => "could not execute".into(),
            ErrorKind::Timeout { .. } => "timed out".into(),
            ErrorKind::Io { .. } => "i/o failure".into(),
        }
    }
}

// ============================================================================
// ERROR CREATION
// ============================================================================

/// Context-aware error creation - each phase knows how to create
/// appropriately sourced errors.
pub trait ErrorReporting {
    /// Create an error with context-appropriate enhancements.
    fn report(&self, kind: ErrorKind, span: SourceSpan) -> VerdictError;

    fn invalid_shape(&self, path: &str, message: &str, span: SourceSpan) -> VerdictError {
        self.report(
            ErrorKind::InvalidShape {
                path: path.into(),
                message: message.into(),
            },
            span,
        )
    }

    fn eval_failure(&self, expression: &str, message: &str) -> VerdictError {
        self.report(
            ErrorKind::Eval {
                expression: expression.into(),
                message: message.into(),
            },
            unspanned(),
        )
    }

    fn coercion_failure(&self, value: &str, wanted: &str) -> VerdictError {
        self.report(
            ErrorKind::Coercion {
                value: value.into(),
                wanted: wanted.into(),
            },
            unspanned(),
        )
    }
}

/// General-purpose error creation context used by every phase.
pub struct PhaseContext {
    pub source: SourceContext,
    pub phase: String,
}

impl PhaseContext {
    pub fn new(source: SourceContext, phase: impl Into<String>) -> Self {
        Self {
            source,
            phase: phase.into(),
        }
    }
}

impl ErrorReporting for PhaseContext {
    fn report(&self, kind: ErrorKind, span: SourceSpan) -> VerdictError {
        let error_code = format!("verdict::{}::{}", self.phase, kind.code_suffix());
        let help = kind.default_help();

        VerdictError {
            kind,
            source_info: SourceInfo {
                source: self.source.to_named_source(),
                primary_span: span,
                phase: self.phase.clone(),
            },
            diagnostic_info: DiagnosticInfo { help, error_code },
        }
    }
}

/// Placeholder span for errors not tied to a document location (process
/// failures, internal state). Makes the empty span explicit and searchable.
pub fn unspanned() -> SourceSpan {
    SourceSpan::from(0..0)
}

/// Convert a 1-based line/column pair into a byte span over `text`.
/// Used by the loader to place parser-reported positions.
pub fn position_span(text: &str, line: usize, column: usize) -> SourceSpan {
    let mut offset = 0usize;
    for (idx, l) in text.split_inclusive('\n').enumerate() {
        if idx + 1 == line {
            offset += column.saturating_sub(1).min(l.len());
            return SourceSpan::from(offset..offset.min(text.len()));
        }
        offset += l.len();
    }
    SourceSpan::from(text.len()..text.len())
}

/// Prints a VerdictError with full miette diagnostics.
pub fn print_error(error: VerdictError) {
    use miette::Report;
    let report = Report::new(error);
    eprintln!("{report:?}");
}
