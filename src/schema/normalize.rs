//! Permissive-to-canonical normalization.
//!
//! Every operation accepts a compact form (`contains: "X"`) and a
//! canonical form (`contains: {value: "X"}`); both normalize to the same
//! canonical object, and re-normalizing a canonical object is a no-op.
//! Regex-bearing operations additionally accept Perl-style delimited
//! forms (`m/.../flags`, `s|...|...|flags`). Unknown operation names
//! resolve against the registry and fail with ranked suggestions.

use serde_yaml::{Mapping, Value};

use crate::errors::{unspanned, ErrorKind, ErrorReporting, PhaseContext, SourceContext, VerdictError};
use crate::registry::{OpRegistry, Resolution};
use crate::schema::{
    CmdLine, ExecContext, ExitSpec, Hook, HookKind, Limits, Op, Scalar, Spec, StdinSpec, TestNode,
};

// ============================================================================
// PERL-STYLE DELIMITED REGEX FORMS
// ============================================================================

/// A parsed Perl-style delimited pattern.
#[derive(Debug, PartialEq)]
pub(crate) enum PerlForm {
    Match {
        regex: String,
        flags: Option<String>,
    },
    Sub {
        regex: String,
        repl: String,
        flags: Option<String>,
    },
}

/// Parse `m<d>regex<d>flags` / `s<d>regex<d>repl<d>flags` where `<d>` is
/// the first punctuation character after the leading letter. Splitting is
/// greedy on the pattern: the last delimiters win, so unescaped delimiter
/// characters may appear inside the regex. Returns `None` for anything
/// else, which is then treated as a plain regex.
pub(crate) fn parse_perl_like(pattern: &str) -> Option<PerlForm> {
    let mut chars = pattern.chars();
    let letter = chars.next()?;
    let delim = chars.next()?;
    if !delim.is_ascii_punctuation() {
        return None;
    }
    let body = &pattern[letter.len_utf8() + delim.len_utf8()..];

    let flags_of = |raw: &str| -> Option<Option<String>> {
        if raw.is_empty() {
            Some(None)
        } else if raw.chars().all(|c| c.is_ascii_alphabetic()) {
            Some(Some(raw.to_string()))
        } else {
            None
        }
    };

    match letter {
        'm' => {
            let at = body.rfind(delim)?;
            let flags = flags_of(&body[at + delim.len_utf8()..])?;
            Some(PerlForm::Match {
                regex: body[..at].to_string(),
                flags,
            })
        }
        's' => {
            let flags_at = body.rfind(delim)?;
            let flags = flags_of(&body[flags_at + delim.len_utf8()..])?;
            let head = &body[..flags_at];
            let repl_at = head.rfind(delim)?;
            Some(PerlForm::Sub {
                regex: head[..repl_at].to_string(),
                repl: head[repl_at + delim.len_utf8()..].to_string(),
                flags,
            })
        }
        _ => None,
    }
}

/// Prefix a pattern with the recognized inline flag modes. Only `imsx`
/// influence matching; other letters (e.g. the habitual `g`) are carried
/// in the canonical object but have no effect on the compiled pattern.
pub(crate) fn apply_flags(regex: &str, flags: Option<&str>) -> String {
    let Some(flags) = flags else {
        return regex.to_string();
    };
    let modes: String = flags.chars().filter(|c| "imsx".contains(*c)).collect();
    if modes.is_empty() {
        regex.to_string()
    } else {
        format!("(?{}){}", modes, regex)
    }
}

// ============================================================================
// RAW VALUE HELPERS
// ============================================================================

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Sequence(_) => "a list",
        Value::Mapping(_) => "a mapping",
        Value::Tagged(_) => "a tagged value",
    }
}

fn shape_error(ctx: &PhaseContext, path: &str, message: impl Into<String>) -> VerdictError {
    ctx.invalid_shape(path, &message.into(), unspanned())
}

fn as_mapping<'a>(
    value: &'a Value,
    path: &str,
    ctx: &PhaseContext,
) -> Result<&'a Mapping, VerdictError> {
    value
        .as_mapping()
        .ok_or_else(|| shape_error(ctx, path, format!("expected a mapping, got {}", type_name(value))))
}

fn get<'a>(map: &'a Mapping, key: &str) -> Option<&'a Value> {
    map.get(&Value::String(key.to_string()))
}

/// Coerce a scalar to its string form. Args, env values and string-check
/// operands all accept bare numbers and booleans.
fn scalar_to_string(value: &Value, path: &str, ctx: &PhaseContext) -> Result<String, VerdictError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Bool(b) => Ok(b.to_string()),
        Value::Number(n) => Ok(Scalar::from_yaml_number(n).canonical_text()),
        other => Err(shape_error(
            ctx,
            path,
            format!("expected a scalar, got {}", type_name(other)),
        )),
    }
}

fn as_f64(value: &Value, path: &str, ctx: &PhaseContext) -> Result<f64, VerdictError> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| shape_error(ctx, path, "expected a number")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| shape_error(ctx, path, format!("expected a number, got {:?}", s))),
        other => Err(shape_error(
            ctx,
            path,
            format!("expected a number, got {}", type_name(other)),
        )),
    }
}

fn as_u64(value: &Value, path: &str, ctx: &PhaseContext) -> Result<u64, VerdictError> {
    value
        .as_u64()
        .ok_or_else(|| shape_error(ctx, path, format!("expected a non-negative integer, got {}", type_name(value))))
}

fn as_bool(value: &Value, path: &str, ctx: &PhaseContext) -> Result<bool, VerdictError> {
    value
        .as_bool()
        .ok_or_else(|| shape_error(ctx, path, format!("expected a boolean, got {}", type_name(value))))
}

fn as_scalar(value: &Value, path: &str, ctx: &PhaseContext) -> Result<Scalar, VerdictError> {
    match value {
        Value::Bool(b) => Ok(Scalar::Bool(*b)),
        Value::Number(n) => Ok(Scalar::from_yaml_number(n)),
        Value::String(s) => Ok(Scalar::Str(s.clone())),
        other => Err(shape_error(
            ctx,
            path,
            format!("expected a scalar, got {}", type_name(other)),
        )),
    }
}

impl Scalar {
    fn from_yaml_number(n: &serde_yaml::Number) -> Scalar {
        Scalar::Num(n.as_f64().unwrap_or(0.0))
    }
}

/// Coerce a scalar-or-list into a string list (args accept both forms).
fn as_str_list(value: &Value, path: &str, ctx: &PhaseContext) -> Result<Vec<String>, VerdictError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| scalar_to_string(item, &format!("{}[{}]", path, i), ctx))
            .collect(),
        scalar => Ok(vec![scalar_to_string(scalar, path, ctx)?]),
    }
}

/// The explanation key, tolerating the common misspellings.
fn take_explain(map: &Mapping) -> Option<String> {
    for key in ["explain", "explanation", "explaination"] {
        if let Some(Value::String(s)) = get(map, key) {
            return Some(s.clone());
        }
    }
    None
}

fn compile_check(regex: &str, flags: Option<&str>, path: &str, ctx: &PhaseContext) -> Result<(), VerdictError> {
    regex::Regex::new(&apply_flags(regex, flags))
        .map(|_| ())
        .map_err(|e| shape_error(ctx, path, format!("invalid regex: {}", e)))
}

// ============================================================================
// OPERATION NORMALIZATION
// ============================================================================

/// Normalize one `{name: value}` operation.
fn normalize_op(
    name: &str,
    value: &Value,
    path: &str,
    registry: &OpRegistry,
    ctx: &PhaseContext,
) -> Result<Op, VerdictError> {
    match name {
        "trim" => Ok(Op::Trim),
        "lower" => Ok(Op::Lower),
        "upper" => Ok(Op::Upper),
        "sub" => normalize_sub(value, path, ctx),
        "map_eval" => normalize_map_eval(value, path, ctx),
        "match" => normalize_match(value, path, ctx),
        "contains" => {
            normalize_string_check(value, path, ctx, |value, explain| Op::Contains { value, explain })
        }
        "not_contains" => normalize_string_check(value, path, ctx, |value, explain| Op::NotContains {
            value,
            explain,
        }),
        "equals" => {
            normalize_string_check(value, path, ctx, |value, explain| Op::Equals { value, explain })
        }
        "not_equals" => normalize_string_check(value, path, ctx, |value, explain| Op::NotEquals {
            value,
            explain,
        }),
        "lt" => normalize_number_check(value, path, ctx, |value, explain| Op::Lt { value, explain }),
        "lte" => normalize_number_check(value, path, ctx, |value, explain| Op::Lte { value, explain }),
        "gt" => normalize_number_check(value, path, ctx, |value, explain| Op::Gt { value, explain }),
        "gte" => normalize_number_check(value, path, ctx, |value, explain| Op::Gte { value, explain }),
        "check_eval" => normalize_check_eval(value, path, ctx),
        "capture" => normalize_capture(value, path, registry, ctx),
        other => normalize_plugin(other, value, path, registry, ctx),
    }
}

fn normalize_plugin(
    name: &str,
    value: &Value,
    path: &str,
    registry: &OpRegistry,
    ctx: &PhaseContext,
) -> Result<Op, VerdictError> {
    match registry.resolve(name) {
        Some(resolution) => {
            let (value, explain) = match value {
                Value::Mapping(map) => {
                    let mut stripped = map.clone();
                    for key in ["explain", "explanation", "explaination"] {
                        stripped.remove(&Value::String(key.to_string()));
                    }
                    (Value::Mapping(stripped), take_explain(map))
                }
                other => (other.clone(), None),
            };
            Ok(Op::Plugin {
                name: name.to_string(),
                value,
                filter: resolution.is_filter(),
                explain,
            })
        }
        None => Err(ctx.report(
            ErrorKind::UnknownOp {
                path: path.to_string(),
                name: name.to_string(),
                suggestions: registry.suggest(name),
            },
            unspanned(),
        )),
    }
}

fn normalize_sub(value: &Value, path: &str, ctx: &PhaseContext) -> Result<Op, VerdictError> {
    let (regex, repl, flags) = match value {
        Value::String(s) => match parse_perl_like(s) {
            Some(PerlForm::Sub { regex, repl, flags }) => (regex, repl, flags),
            // Plain string: delete every occurrence.
            _ => (s.clone(), String::new(), None),
        },
        Value::Mapping(map) => {
            let regex = get(map, "regex")
                .ok_or_else(|| shape_error(ctx, path, "sub requires a 'regex' key"))
                .and_then(|v| scalar_to_string(v, &format!("{}.regex", path), ctx))?;
            let repl = match get(map, "repl") {
                Some(v) => scalar_to_string(v, &format!("{}.repl", path), ctx)?,
                None => String::new(),
            };
            let flags = match get(map, "flags") {
                Some(Value::Null) | None => None,
                Some(v) => Some(scalar_to_string(v, &format!("{}.flags", path), ctx)?),
            };
            (regex, repl, flags)
        }
        other => {
            return Err(shape_error(
                ctx,
                path,
                format!("sub expects a pattern string or mapping, got {}", type_name(other)),
            ))
        }
    };
    compile_check(&regex, flags.as_deref(), path, ctx)?;
    Ok(Op::Sub { regex, repl, flags })
}

fn normalize_match(value: &Value, path: &str, ctx: &PhaseContext) -> Result<Op, VerdictError> {
    let (regex, flags, explain) = match value {
        Value::String(s) => match parse_perl_like(s) {
            Some(PerlForm::Match { regex, flags }) => (regex, flags, None),
            _ => (s.clone(), None, None),
        },
        Value::Mapping(map) => {
            let raw = get(map, "regex")
                .ok_or_else(|| shape_error(ctx, path, "match requires a 'regex' key"))
                .and_then(|v| scalar_to_string(v, &format!("{}.regex", path), ctx))?;
            let (regex, mut flags) = match parse_perl_like(&raw) {
                Some(PerlForm::Match { regex, flags }) => (regex, flags),
                _ => (raw, None),
            };
            if flags.is_none() {
                if let Some(v) = get(map, "flags") {
                    if !v.is_null() {
                        flags = Some(scalar_to_string(v, &format!("{}.flags", path), ctx)?);
                    }
                }
            }
            (regex, flags, take_explain(map))
        }
        other => {
            return Err(shape_error(
                ctx,
                path,
                format!("match expects a pattern string or mapping, got {}", type_name(other)),
            ))
        }
    };
    compile_check(&regex, flags.as_deref(), path, ctx)?;
    Ok(Op::Match { regex, flags, explain })
}

fn normalize_string_check(
    value: &Value,
    path: &str,
    ctx: &PhaseContext,
    build: impl FnOnce(String, Option<String>) -> Op,
) -> Result<Op, VerdictError> {
    match value {
        Value::Mapping(map) => {
            let v = get(map, "value")
                .ok_or_else(|| shape_error(ctx, path, "canonical form requires a 'value' key"))
                .and_then(|v| scalar_to_string(v, &format!("{}.value", path), ctx))?;
            Ok(build(v, take_explain(map)))
        }
        scalar => Ok(build(scalar_to_string(scalar, path, ctx)?, None)),
    }
}

fn normalize_number_check(
    value: &Value,
    path: &str,
    ctx: &PhaseContext,
    build: impl FnOnce(f64, Option<String>) -> Op,
) -> Result<Op, VerdictError> {
    match value {
        Value::Mapping(map) => {
            let v = get(map, "value")
                .ok_or_else(|| shape_error(ctx, path, "canonical form requires a 'value' key"))
                .and_then(|v| as_f64(v, &format!("{}.value", path), ctx))?;
            Ok(build(v, take_explain(map)))
        }
        scalar => Ok(build(as_f64(scalar, path, ctx)?, None)),
    }
}

fn normalize_check_eval(value: &Value, path: &str, ctx: &PhaseContext) -> Result<Op, VerdictError> {
    match value {
        Value::String(expr) => Ok(Op::CheckEval {
            expr: expr.clone(),
            explain: None,
        }),
        Value::Mapping(map) => {
            let expr = get(map, "expr")
                .ok_or_else(|| shape_error(ctx, path, "check_eval requires an 'expr' key"))
                .and_then(|v| scalar_to_string(v, &format!("{}.expr", path), ctx))?;
            Ok(Op::CheckEval {
                expr,
                explain: take_explain(map),
            })
        }
        other => Err(shape_error(
            ctx,
            path,
            format!("check_eval expects an expression string, got {}", type_name(other)),
        )),
    }
}

fn normalize_map_eval(value: &Value, path: &str, ctx: &PhaseContext) -> Result<Op, VerdictError> {
    match value {
        Value::String(expr) => Ok(Op::MapEval { expr: expr.clone() }),
        Value::Mapping(map) => {
            let expr = get(map, "expr")
                .ok_or_else(|| shape_error(ctx, path, "map_eval requires an 'expr' key"))
                .and_then(|v| scalar_to_string(v, &format!("{}.expr", path), ctx))?;
            Ok(Op::MapEval { expr })
        }
        other => Err(shape_error(
            ctx,
            path,
            format!("map_eval expects an expression string, got {}", type_name(other)),
        )),
    }
}

fn normalize_capture(
    value: &Value,
    path: &str,
    registry: &OpRegistry,
    ctx: &PhaseContext,
) -> Result<Op, VerdictError> {
    let map = as_mapping(value, path, ctx)?;

    let raw = get(map, "regex")
        .ok_or_else(|| shape_error(ctx, path, "capture requires a 'regex' key"))
        .and_then(|v| scalar_to_string(v, &format!("{}.regex", path), ctx))?;
    let (regex, mut flags) = match parse_perl_like(&raw) {
        Some(PerlForm::Match { regex, flags }) => (regex, flags),
        _ => (raw, None),
    };
    if flags.is_none() {
        if let Some(v) = get(map, "flags") {
            if !v.is_null() {
                flags = Some(scalar_to_string(v, &format!("{}.flags", path), ctx)?);
            }
        }
    }
    compile_check(&regex, flags.as_deref(), path, ctx)?;

    let group = match get(map, "group") {
        Some(v) => as_u64(v, &format!("{}.group", path), ctx)? as usize,
        None => 1,
    };

    let tests = match get(map, "tests") {
        Some(v) => normalize_stream_ops(v, &format!("{}.tests", path), registry, ctx)?,
        None => Vec::new(),
    };

    Ok(Op::Capture {
        regex,
        flags,
        group,
        tests,
        explain: take_explain(map),
    })
}

/// Normalize an ordered op list (filters and checks interleaved).
fn normalize_stream_ops(
    value: &Value,
    path: &str,
    registry: &OpRegistry,
    ctx: &PhaseContext,
) -> Result<Vec<Op>, VerdictError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let path = format!("{}[{}]", path, i);
                let map = as_mapping(item, &path, ctx)?;
                if map.len() != 1 {
                    return Err(shape_error(
                        ctx,
                        &path,
                        "each operation must be a single-key mapping",
                    ));
                }
                let (key, val) = map.iter().next().expect("len checked above");
                let name = key
                    .as_str()
                    .ok_or_else(|| shape_error(ctx, &path, "operation names must be strings"))?;
                normalize_op(name, val, &path, registry, ctx)
            })
            .collect(),
        other => Err(shape_error(
            ctx,
            path,
            format!("a stream must be a list of operations, got {}", type_name(other)),
        )),
    }
}

/// Normalize a list where only filters are allowed (root/node `filters`).
fn normalize_filter_list(
    value: &Value,
    path: &str,
    registry: &OpRegistry,
    ctx: &PhaseContext,
) -> Result<Vec<Op>, VerdictError> {
    let ops = normalize_stream_ops(value, path, registry, ctx)?;
    for (i, op) in ops.iter().enumerate() {
        if !op.is_filter() {
            return Err(shape_error(
                ctx,
                &format!("{}[{}]", path, i),
                format!("'{}' is a check and cannot appear in a filter list", op.name()),
            ));
        }
    }
    Ok(ops)
}

// ============================================================================
// EXECUTION CONTEXT, HOOKS, FILES
// ============================================================================

fn normalize_exec(value: &Value, path: &str, ctx: &PhaseContext) -> Result<ExecContext, VerdictError> {
    let map = as_mapping(value, path, ctx)?;
    let mut exec = ExecContext::default();

    if let Some(v) = get(map, "cmd") {
        exec.cmd = Some(match v {
            Value::Sequence(items) => {
                if items.is_empty() {
                    return Err(shape_error(ctx, &format!("{}.cmd", path), "cmd must not be empty"));
                }
                CmdLine::Argv(as_str_list(v, &format!("{}.cmd", path), ctx)?)
            }
            scalar => CmdLine::Line(scalar_to_string(scalar, &format!("{}.cmd", path), ctx)?),
        });
    }
    if let Some(v) = get(map, "timeout") {
        if !v.is_null() {
            exec.timeout = Some(as_f64(v, &format!("{}.timeout", path), ctx)?);
        }
    }
    if let Some(v) = get(map, "stdin") {
        exec.stdin = normalize_stdin(v, &format!("{}.stdin", path), ctx)?;
    }
    if let Some(v) = get(map, "stdin_join") {
        if !v.is_null() {
            exec.stdin_join = Some(scalar_to_string(v, &format!("{}.stdin_join", path), ctx)?);
        }
    }
    if let Some(v) = get(map, "args") {
        exec.args = as_str_list(v, &format!("{}.args", path), ctx)?;
    }
    if let Some(v) = get(map, "env") {
        let env_path = format!("{}.env", path);
        let env_map = as_mapping(v, &env_path, ctx)?;
        for (k, val) in env_map {
            let key = k
                .as_str()
                .ok_or_else(|| shape_error(ctx, &env_path, "env keys must be strings"))?;
            let text = scalar_to_string(val, &format!("{}.{}", env_path, key), ctx)?;
            exec.env.insert(key.to_string(), text);
        }
    }
    if let Some(v) = get(map, "cwd") {
        if !v.is_null() {
            exec.cwd = Some(scalar_to_string(v, &format!("{}.cwd", path), ctx)?);
        }
    }
    if let Some(v) = get(map, "shell") {
        if !v.is_null() {
            exec.shell = Some(as_bool(v, &format!("{}.shell", path), ctx)?);
        }
    }
    if let Some(v) = get(map, "limits") {
        exec.limits = normalize_limits(v, &format!("{}.limits", path), ctx)?;
    }

    Ok(exec)
}

fn normalize_stdin(
    value: &Value,
    path: &str,
    ctx: &PhaseContext,
) -> Result<Option<StdinSpec>, VerdictError> {
    match value {
        Value::Null => Ok(None),
        Value::Sequence(items) => {
            let lines = items
                .iter()
                .enumerate()
                .map(|(i, item)| scalar_to_string(item, &format!("{}[{}]", path, i), ctx))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Some(StdinSpec::Lines(lines)))
        }
        scalar => Ok(Some(StdinSpec::Text(scalar_to_string(scalar, path, ctx)?))),
    }
}

fn normalize_limits(value: &Value, path: &str, ctx: &PhaseContext) -> Result<Limits, VerdictError> {
    let map = as_mapping(value, path, ctx)?;
    let mut limits = Limits::default();
    if let Some(v) = get(map, "cpu") {
        limits.cpu = Some(as_u64(v, &format!("{}.cpu", path), ctx)?);
    }
    for key in ["memory", "mem"] {
        if let Some(v) = get(map, key) {
            limits.memory = Some(as_u64(v, &format!("{}.{}", path, key), ctx)?);
        }
    }
    if let Some(v) = get(map, "nofile") {
        limits.nofile = Some(as_u64(v, &format!("{}.nofile", path), ctx)?);
    }
    Ok(limits)
}

fn normalize_hooks(
    value: &Value,
    path: &str,
    ctx: &PhaseContext,
) -> Result<Vec<Hook>, VerdictError> {
    match value {
        Value::Null => Ok(Vec::new()),
        Value::Sequence(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                let path = format!("{}[{}]", path, i);
                let map = as_mapping(item, &path, ctx)?;
                if map.len() != 1 {
                    return Err(shape_error(
                        ctx,
                        &path,
                        "a hook step must be {run: ...} or {eval: ...}",
                    ));
                }
                let (key, val) = map.iter().next().expect("len checked above");
                let kind = match key.as_str() {
                    Some("run") => HookKind::Run,
                    Some("eval") => HookKind::Eval,
                    _ => {
                        return Err(shape_error(
                            ctx,
                            &path,
                            "a hook step must be {run: ...} or {eval: ...}",
                        ))
                    }
                };
                Ok(Hook {
                    kind,
                    body: scalar_to_string(val, &path, ctx)?,
                })
            })
            .collect(),
        other => Err(shape_error(
            ctx,
            path,
            format!("hooks must be a list of steps, got {}", type_name(other)),
        )),
    }
}

fn normalize_files(
    value: &Value,
    path: &str,
    registry: &OpRegistry,
    ctx: &PhaseContext,
) -> Result<Vec<(String, Vec<Op>)>, VerdictError> {
    let map = as_mapping(value, path, ctx)?;
    let mut files = Vec::with_capacity(map.len());
    for (k, spec) in map {
        let name = k
            .as_str()
            .ok_or_else(|| shape_error(ctx, path, "file names must be strings"))?;
        let file_path = format!("{}.{}", path, name);
        let ops = match spec {
            Value::Sequence(_) => normalize_stream_ops(spec, &file_path, registry, ctx)?,
            Value::Mapping(inner) => {
                if let Some(ops) = get(inner, "ops") {
                    normalize_stream_ops(ops, &format!("{}.ops", file_path), registry, ctx)?
                } else if get(inner, "filters").is_some() || get(inner, "checks").is_some() {
                    let mut ops = match get(inner, "filters") {
                        Some(v) => normalize_filter_list(v, &format!("{}.filters", file_path), registry, ctx)?,
                        None => Vec::new(),
                    };
                    if let Some(v) = get(inner, "checks") {
                        ops.extend(normalize_stream_ops(v, &format!("{}.checks", file_path), registry, ctx)?);
                    }
                    ops
                } else {
                    return Err(shape_error(
                        ctx,
                        &file_path,
                        "a file entry must be an op list, {ops: [...]} or {filters/checks}",
                    ));
                }
            }
            other => {
                return Err(shape_error(
                    ctx,
                    &file_path,
                    format!("expected an op list, got {}", type_name(other)),
                ))
            }
        };
        files.push((name.to_string(), ops));
    }
    Ok(files)
}

fn normalize_matrix(
    value: &Value,
    path: &str,
    ctx: &PhaseContext,
) -> Result<Vec<(String, Vec<Scalar>)>, VerdictError> {
    let map = as_mapping(value, path, ctx)?;
    let mut matrix = Vec::with_capacity(map.len());
    for (k, values) in map {
        let name = k
            .as_str()
            .ok_or_else(|| shape_error(ctx, path, "matrix variable names must be strings"))?;
        let var_path = format!("{}.{}", path, name);
        let Value::Sequence(items) = values else {
            return Err(shape_error(ctx, &var_path, "matrix variables must list their values"));
        };
        if items.is_empty() {
            return Err(shape_error(ctx, &var_path, "matrix value lists must not be empty"));
        }
        let scalars = items
            .iter()
            .enumerate()
            .map(|(i, item)| as_scalar(item, &format!("{}[{}]", var_path, i), ctx))
            .collect::<Result<Vec<_>, _>>()?;
        matrix.push((name.to_string(), scalars));
    }
    Ok(matrix)
}

fn normalize_exit(value: &Value, path: &str, ctx: &PhaseContext) -> Result<Option<ExitSpec>, VerdictError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(_) => Ok(Some(ExitSpec {
            code: as_f64(value, path, ctx)? as i32,
            explain: None,
        })),
        Value::Mapping(map) => {
            let code = get(map, "value")
                .or_else(|| get(map, "code"))
                .ok_or_else(|| shape_error(ctx, path, "exit requires a 'value' key"))
                .and_then(|v| as_f64(v, &format!("{}.value", path), ctx))? as i32;
            Ok(Some(ExitSpec {
                code,
                explain: take_explain(map),
            }))
        }
        other => Err(shape_error(
            ctx,
            path,
            format!("exit expects an integer, got {}", type_name(other)),
        )),
    }
}

// ============================================================================
// TEST NODES AND THE ROOT DOCUMENT
// ============================================================================

fn normalize_test(
    value: &Value,
    path: &str,
    registry: &OpRegistry,
    ctx: &PhaseContext,
) -> Result<TestNode, VerdictError> {
    let map = as_mapping(value, path, ctx)?;

    let name = get(map, "name")
        .ok_or_else(|| shape_error(ctx, path, "every test needs a 'name'"))
        .and_then(|v| scalar_to_string(v, &format!("{}.name", path), ctx))?;

    let description = match get(map, "description") {
        Some(Value::Null) | None => None,
        Some(v) => Some(scalar_to_string(v, &format!("{}.description", path), ctx)?),
    };

    // Full `exec:` override plus the compact node-level shorthands
    // (args/stdin/timeout directly on the node).
    let mut exec = match get(map, "exec") {
        Some(v) => normalize_exec(v, &format!("{}.exec", path), ctx)?,
        None => ExecContext::default(),
    };
    if let Some(v) = get(map, "args") {
        exec.args = as_str_list(v, &format!("{}.args", path), ctx)?;
    }
    if let Some(v) = get(map, "stdin") {
        if let Some(stdin) = normalize_stdin(v, &format!("{}.stdin", path), ctx)? {
            exec.stdin = Some(stdin);
        }
    }
    if let Some(v) = get(map, "timeout") {
        if !v.is_null() {
            exec.timeout = Some(as_f64(v, &format!("{}.timeout", path), ctx)?);
        }
    }

    let filters = match get(map, "filters") {
        Some(v) => normalize_filter_list(v, &format!("{}.filters", path), registry, ctx)?,
        None => Vec::new(),
    };
    let setup = match get(map, "setup") {
        Some(v) => normalize_hooks(v, &format!("{}.setup", path), ctx)?,
        None => Vec::new(),
    };
    let teardown = match get(map, "teardown") {
        Some(v) => normalize_hooks(v, &format!("{}.teardown", path), ctx)?,
        None => Vec::new(),
    };

    let repeat = match get(map, "repeat") {
        Some(v) => (as_u64(v, &format!("{}.repeat", path), ctx)? as u32).max(1),
        None => 1,
    };
    let matrix = match get(map, "matrix") {
        Some(v) => normalize_matrix(v, &format!("{}.matrix", path), ctx)?,
        None => Vec::new(),
    };
    let seed = match get(map, "seed") {
        Some(Value::Null) | None => None,
        Some(v) => Some(as_u64(v, &format!("{}.seed", path), ctx)?),
    };

    let stdout = match get(map, "stdout") {
        Some(v) => normalize_stream_ops(v, &format!("{}.stdout", path), registry, ctx)?,
        None => Vec::new(),
    };
    let stderr = match get(map, "stderr") {
        Some(v) => normalize_stream_ops(v, &format!("{}.stderr", path), registry, ctx)?,
        None => Vec::new(),
    };
    let files = match get(map, "files") {
        Some(v) => normalize_files(v, &format!("{}.files", path), registry, ctx)?,
        None => Vec::new(),
    };
    let exit = match get(map, "exit") {
        Some(v) => normalize_exit(v, &format!("{}.exit", path), ctx)?,
        None => None,
    };

    let tests = match get(map, "tests") {
        Some(Value::Null) | None => Vec::new(),
        Some(Value::Sequence(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| normalize_test(item, &format!("{}.tests[{}]", path, i), registry, ctx))
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => {
            return Err(shape_error(
                ctx,
                &format!("{}.tests", path),
                format!("expected a list of tests, got {}", type_name(other)),
            ))
        }
    };

    Ok(TestNode {
        name,
        description,
        exec,
        filters,
        setup,
        teardown,
        repeat,
        matrix,
        seed,
        stdout,
        stderr,
        files,
        exit,
        tests,
    })
}

/// Normalize a raw loaded document into the canonical [`Spec`].
pub fn normalize(
    raw: &Value,
    registry: &OpRegistry,
    source: &SourceContext,
) -> Result<Spec, VerdictError> {
    let ctx = PhaseContext::new(source.clone(), "schema");
    let root = as_mapping(raw, "$", &ctx)?;

    let version = match get(root, "version") {
        Some(v) => as_u64(v, "version", &ctx)? as u32,
        None => 1,
    };

    let exec = get(root, "exec")
        .ok_or_else(|| shape_error(&ctx, "$", "the document needs a root 'exec' section"))
        .and_then(|v| normalize_exec(v, "exec", &ctx))?;

    let filters = match get(root, "filters") {
        Some(v) => normalize_filter_list(v, "filters", registry, &ctx)?,
        None => Vec::new(),
    };

    let tests = match get(root, "tests") {
        Some(Value::Sequence(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| normalize_test(item, &format!("tests[{}]", i), registry, &ctx))
            .collect::<Result<Vec<_>, _>>()?,
        Some(other) => {
            return Err(shape_error(
                &ctx,
                "tests",
                format!("expected a list of tests, got {}", type_name(other)),
            ))
        }
        None => return Err(shape_error(&ctx, "$", "the document needs a 'tests' section")),
    };

    Ok(Spec {
        version,
        exec,
        filters,
        tests,
    })
}
