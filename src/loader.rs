//! Format-agnostic document loading.
//!
//! Turns YAML or JSON text into a raw `serde_yaml::Value` tree with no
//! knowledge of the DSL. Syntax errors carry the reporting parser's
//! line/column, converted to a span over the document for diagnostics.

use std::path::Path;

use crate::errors::{
    position_span, unspanned, DiagnosticInfo, ErrorKind, SourceContext, SourceInfo, VerdictError,
};

/// Input format hint. `Auto` resolves from the file extension when loading
/// a file, otherwise tries JSON first and YAML second.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Format {
    #[default]
    Auto,
    Json,
    Yaml,
}

impl Format {
    fn from_extension(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Format::Json,
            Some("yml") | Some("yaml") => Format::Yaml,
            _ => Format::Auto,
        }
    }
}

fn parse_error(
    source: &SourceContext,
    message: String,
    span: miette::SourceSpan,
) -> VerdictError {
    let kind = ErrorKind::Parse { message };
    VerdictError {
        source_info: SourceInfo {
            source: source.to_named_source(),
            primary_span: span,
            phase: "loader".to_string(),
        },
        diagnostic_info: DiagnosticInfo {
            help: None,
            error_code: format!("verdict::loader::{}", kind.code_suffix()),
        },
        kind,
    }
}

fn try_json(text: &str, source: &SourceContext) -> Result<serde_yaml::Value, VerdictError> {
    match serde_json::from_str::<serde_json::Value>(text) {
        Ok(value) => serde_yaml::to_value(&value)
            .map_err(|e| parse_error(source, e.to_string(), unspanned())),
        Err(e) => {
            let span = position_span(text, e.line(), e.column());
            Err(parse_error(source, format!("[json] {}", e), span))
        }
    }
}

fn try_yaml(text: &str, source: &SourceContext) -> Result<serde_yaml::Value, VerdictError> {
    serde_yaml::from_str::<serde_yaml::Value>(text).map_err(|e| {
        let span = e
            .location()
            .map(|loc| position_span(text, loc.line(), loc.column()))
            .unwrap_or_else(unspanned);
        parse_error(source, format!("[yaml] {}", e), span)
    })
}

/// Load a YAML or JSON document from text.
///
/// `name` identifies the document in error messages (file name or
/// `<string>` for inline content).
pub fn load_str(text: &str, name: &str, format: Format) -> Result<serde_yaml::Value, VerdictError> {
    let source = SourceContext::from_document(name, text);
    match format {
        Format::Json => try_json(text, &source),
        Format::Yaml => try_yaml(text, &source),
        Format::Auto => {
            // JSON documents are the stricter dialect, try them first so a
            // JSON typo is reported by the JSON parser.
            match try_json(text, &source) {
                Ok(value) => Ok(value),
                Err(_) => try_yaml(text, &source),
            }
        }
    }
}

/// Load a document from a file, resolving `Auto` from the extension.
pub fn load_file(
    path: impl AsRef<Path>,
    format: Format,
) -> Result<(serde_yaml::Value, SourceContext), VerdictError> {
    let path = path.as_ref();
    let format = match format {
        Format::Auto => Format::from_extension(path),
        other => other,
    };

    let text = std::fs::read_to_string(path).map_err(|e| {
        let source = SourceContext::fallback("loader::load_file");
        let kind = ErrorKind::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        };
        VerdictError {
            source_info: SourceInfo {
                source: source.to_named_source(),
                primary_span: unspanned(),
                phase: "loader".to_string(),
            },
            diagnostic_info: DiagnosticInfo {
                help: None,
                error_code: format!("verdict::loader::{}", kind.code_suffix()),
            },
            kind,
        }
    })?;

    let name = path.display().to_string();
    let value = load_str(&text, &name, format)?;
    Ok((value, SourceContext::from_document(name, text)))
}
