//! Manifest and entry-point validation.
//!
//! Every violation is reported as [`RuntimeError::InvalidPlugin`] carrying a
//! short, human-readable reason such as `missing description` or
//! `parameter 'size' default is not an integer`.

use regex::Regex;
use serde_yaml::Value;
use std::collections::HashSet;
use std::path::Path;

use crate::errors::RuntimeError;
use crate::filter::AcceptedFilter;
use crate::launcher::ScriptType;
use crate::manifest::{
    constraints, EntryPoints, ParamValue, ParameterKind, ParameterSpec, PluginManifest,
    RawManifest, RawParameter,
};
use crate::manifest_parser::parse_manifest_header;

fn invalid(reason: impl Into<String>) -> RuntimeError {
    RuntimeError::InvalidPlugin(reason.into())
}

/// Validate a raw manifest into a plugin manifest.
pub fn validate_manifest(raw: RawManifest) -> Result<PluginManifest, RuntimeError> {
    let name = required_text("name", raw.name.as_ref())?;
    if name.len() > constraints::MAX_NAME_LENGTH {
        return Err(invalid(format!(
            "name exceeds {} characters",
            constraints::MAX_NAME_LENGTH
        )));
    }
    if name.chars().any(char::is_control) {
        return Err(invalid("name cannot contain control characters"));
    }

    let description = required_text("description", raw.description.as_ref())?;
    if description.len() > constraints::MAX_DESCRIPTION_LENGTH {
        return Err(invalid(format!(
            "description exceeds {} characters",
            constraints::MAX_DESCRIPTION_LENGTH
        )));
    }

    let input_types = required_text("input-types", raw.input_types.as_ref())?;

    let accepts_multiple_files = match raw.accepts_multiple_files {
        None => true,
        Some(Value::Bool(b)) => b,
        Some(_) => return Err(invalid("accepts-multiple-files must be a boolean")),
    };

    let parameters = validate_parameters(raw.parameters.as_ref())?;

    let entry = raw.entry_points.unwrap_or_default();
    let entry_points = EntryPoints {
        single: entry_handle("single", entry.single)?,
        batch: entry_handle("batch", entry.batch)?,
    };

    Ok(PluginManifest {
        name,
        description,
        accepted_filter: AcceptedFilter::parse(&input_types),
        parameters,
        accepts_multiple_files,
        entry_points,
    })
}

/// Required non-empty text field.
fn required_text(field: &str, value: Option<&Value>) -> Result<String, RuntimeError> {
    match value {
        None | Some(Value::Null) => Err(invalid(format!("missing {field}"))),
        Some(Value::String(s)) if s.trim().is_empty() => Err(invalid(format!("missing {field}"))),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(_) => Err(invalid(format!("{field} must be text"))),
    }
}

fn entry_handle(kind: &str, handle: Option<String>) -> Result<String, RuntimeError> {
    let handle = handle
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .ok_or_else(|| invalid(format!("missing {kind} entry point")))?;

    let mut chars = handle.chars();
    let valid = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(invalid(format!(
            "{kind} entry point '{handle}' is not a valid identifier"
        )));
    }
    Ok(handle)
}

fn validate_parameters(value: Option<&Value>) -> Result<Vec<ParameterSpec>, RuntimeError> {
    let items = match value {
        None | Some(Value::Null) => return Err(invalid("missing parameters")),
        Some(Value::Sequence(items)) => items,
        Some(_) => return Err(invalid("parameters must be a list")),
    };

    let mut seen = HashSet::new();
    let mut specs = Vec::with_capacity(items.len());
    for (idx, item) in items.iter().enumerate() {
        let raw: RawParameter = serde_yaml::from_value(item.clone())
            .map_err(|e| invalid(format!("parameter #{}: {e}", idx + 1)))?;
        let spec = validate_parameter(idx, raw)?;
        if !seen.insert(spec.name.clone()) {
            return Err(invalid(format!("duplicate parameter '{}'", spec.name)));
        }
        specs.push(spec);
    }
    Ok(specs)
}

/// Validate one parameter entry, including its default.
pub fn validate_parameter(idx: usize, raw: RawParameter) -> Result<ParameterSpec, RuntimeError> {
    let name = raw
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| invalid(format!("parameter #{} is missing a name", idx + 1)))?;
    validate_parameter_name(&name)?;

    let tag = raw
        .kind
        .ok_or_else(|| invalid(format!("parameter '{name}' is missing a type")))?;
    let kind = ParameterKind::from_tag(&tag)
        .ok_or_else(|| invalid(format!("parameter '{name}' has unknown type '{tag}'")))?;

    let choices = match (kind, raw.choices) {
        (ParameterKind::Choice, Some(values)) if !values.is_empty() => {
            let mut choices: Vec<String> = Vec::with_capacity(values.len());
            for value in &values {
                let choice = scalar_text(value).ok_or_else(|| {
                    invalid(format!("parameter '{name}' choices must be scalar values"))
                })?;
                if choices.contains(&choice) {
                    return Err(invalid(format!(
                        "parameter '{name}' lists choice '{choice}' twice"
                    )));
                }
                choices.push(choice);
            }
            choices
        }
        (ParameterKind::Choice, _) => {
            return Err(invalid(format!(
                "parameter '{name}' of type choice needs a non-empty choices list"
            )))
        }
        (_, Some(_)) => {
            return Err(invalid(format!(
                "parameter '{name}' declares choices but is not of type choice"
            )))
        }
        (_, None) => Vec::new(),
    };

    if !kind.is_numeric() && (raw.min.is_some() || raw.max.is_some()) {
        return Err(invalid(format!(
            "parameter '{name}' declares min/max but is not numeric"
        )));
    }
    if let (Some(min), Some(max)) = (raw.min, raw.max) {
        if min > max {
            return Err(invalid(format!(
                "parameter '{name}' has min {min} greater than max {max}"
            )));
        }
    }

    let default = raw
        .default
        .ok_or_else(|| invalid(format!("parameter '{name}' is missing a default")))?;
    let default = convert_default(&name, kind, &default, &choices)?;
    if let Some(reason) = range_violation(&default, raw.min, raw.max) {
        return Err(invalid(format!("parameter '{name}' default {reason}")));
    }

    Ok(ParameterSpec {
        name,
        kind,
        default,
        label: raw.label,
        description: raw.description,
        choices,
        min: raw.min,
        max: raw.max,
    })
}

/// Validate a parameter name usable as a `--<name>` flag.
pub fn validate_parameter_name(name: &str) -> Result<(), RuntimeError> {
    if name.starts_with('-') {
        return Err(invalid(format!("parameter '{name}' cannot start with '-'")));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
    {
        return Err(invalid(format!(
            "parameter '{name}' must contain only letters, digits, '_' and '-'"
        )));
    }
    if constraints::RESERVED_PARAMETER_NAMES.contains(&name) {
        return Err(invalid(format!("parameter name '{name}' is reserved")));
    }
    Ok(())
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Type-check a declared default against its kind.
fn convert_default(
    name: &str,
    kind: ParameterKind,
    value: &Value,
    choices: &[String],
) -> Result<ParamValue, RuntimeError> {
    let mismatch = || invalid(format!("parameter '{name}' default is not a {kind}"));
    match kind {
        ParameterKind::String => match value {
            Value::String(s) => Ok(ParamValue::String(s.clone())),
            _ => Err(mismatch()),
        },
        ParameterKind::Integer => value
            .as_i64()
            .map(ParamValue::Integer)
            .ok_or_else(|| invalid(format!("parameter '{name}' default is not an integer"))),
        ParameterKind::Float => value
            .as_f64()
            .filter(|f| f.is_finite())
            .map(ParamValue::Float)
            .ok_or_else(mismatch),
        ParameterKind::Boolean => value.as_bool().map(ParamValue::Boolean).ok_or_else(mismatch),
        ParameterKind::Choice => {
            let text = scalar_text(value).ok_or_else(mismatch)?;
            if choices.contains(&text) {
                Ok(ParamValue::Choice(text))
            } else {
                Err(invalid(format!(
                    "parameter '{name}' default '{text}' is not one of the choices"
                )))
            }
        }
    }
}

/// Describe a min/max violation, if any.
pub(crate) fn range_violation(value: &ParamValue, min: Option<f64>, max: Option<f64>) -> Option<String> {
    let v = value.as_f64()?;
    if let Some(min) = min {
        if v < min {
            return Some(format!("{value} is below the minimum {min}"));
        }
    }
    if let Some(max) = max {
        if v > max {
            return Some(format!("{value} is above the maximum {max}"));
        }
    }
    None
}

/// Check that the script source exposes both declared entry points.
///
/// Python handles must be top-level functions accepting the files, the
/// output directory and a `**` keyword collector; shell handles must be
/// defined functions. Executables are opaque and trusted as declared.
pub fn check_entry_points(
    manifest: &PluginManifest,
    script_type: ScriptType,
    source: &str,
) -> Result<(), RuntimeError> {
    for handle in [&manifest.entry_points.single, &manifest.entry_points.batch] {
        match script_type {
            ScriptType::Python => check_python_entry(handle, source)?,
            ScriptType::Shell => check_shell_entry(handle, source)?,
            ScriptType::Executable => {}
        }
    }
    Ok(())
}

fn missing_entry(handle: &str) -> RuntimeError {
    invalid(format!("no callable {handle}(files, output_dir, **params)"))
}

fn check_python_entry(handle: &str, source: &str) -> Result<(), RuntimeError> {
    let pattern = format!(r"(?m)^(?:async\s+)?def\s+{}\s*\(", regex::escape(handle));
    let re = Regex::new(&pattern).map_err(|e| invalid(format!("entry point pattern: {e}")))?;
    let found = re.find(source).ok_or_else(|| missing_entry(handle))?;
    let params = split_parameters(&source[found.end()..]).ok_or_else(|| missing_entry(handle))?;

    let mut positional = 0usize;
    let mut var_positional = false;
    let mut var_keyword = false;
    let mut keyword_only = false;
    for param in params.iter().map(|p| p.trim()).filter(|p| !p.is_empty()) {
        if param.starts_with("**") {
            var_keyword = true;
        } else if param == "*" {
            keyword_only = true;
        } else if param.starts_with('*') {
            var_positional = true;
            keyword_only = true;
        } else if param != "/" && !keyword_only {
            positional += 1;
        }
    }

    if (positional >= 2 || var_positional) && var_keyword {
        Ok(())
    } else {
        Err(invalid(format!(
            "entry point {handle} must accept (files, output_dir, **params)"
        )))
    }
}

/// Split a Python parameter list at top-level commas. `text` starts just
/// after the opening parenthesis; returns `None` if it is never closed.
fn split_parameters(text: &str) -> Option<Vec<&str>> {
    let mut params = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;

    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' if depth == 0 => {
                params.push(&text[start..i]);
                return Some(params);
            }
            ')' | ']' | '}' => depth = depth.saturating_sub(1),
            ',' if depth == 0 => {
                params.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    None
}

fn check_shell_entry(handle: &str, source: &str) -> Result<(), RuntimeError> {
    let escaped = regex::escape(handle);
    let pattern = format!(r"(?m)^\s*(?:function\s+{escaped}\b|{escaped}\s*\(\s*\))");
    let re = Regex::new(&pattern).map_err(|e| invalid(format!("entry point pattern: {e}")))?;
    if re.is_match(source) {
        Ok(())
    } else {
        Err(missing_entry(handle))
    }
}

/// Script type implied by a file name and its content, without touching
/// the filesystem. Files with a shebang but no known extension are treated
/// as executables.
pub fn script_type_for_source(file_name: &str, source: &str) -> Option<ScriptType> {
    let ext = Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match ext.as_str() {
        "py" => Some(ScriptType::Python),
        "sh" | "bash" => Some(ScriptType::Shell),
        _ if source.starts_with("#!") => Some(ScriptType::Executable),
        _ => None,
    }
}

/// Validate a complete script text exactly as a directory scan would.
///
/// Used for scripts produced outside the runtime (for example by a code
/// generator) before they are written into the script directory.
pub fn validate_source(file_name: &str, source: &str) -> Result<PluginManifest, RuntimeError> {
    let script_type = script_type_for_source(file_name, source).ok_or_else(|| {
        invalid(format!("'{file_name}' is not a recognised script type"))
    })?;
    validate_script(script_type, source)
}

/// Parse and validate a script's header and entry points.
pub fn validate_script(script_type: ScriptType, source: &str) -> Result<PluginManifest, RuntimeError> {
    let raw = parse_manifest_header(source)?;
    let manifest = validate_manifest(raw)?;
    check_entry_points(&manifest, script_type, source)?;
    Ok(manifest)
}
