//! Parameter marshalling.
//!
//! Converts the raw strings a UI collects into typed arguments. Binding is
//! total: either every declared parameter yields one value or the whole
//! bind fails, before anything is spawned.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::errors::RuntimeError;
use crate::manifest::{ParamValue, ParameterKind, ParameterSpec, PluginManifest};
use crate::validator::range_violation;

/// Raw parameter values keyed by parameter name.
pub type RawValues = BTreeMap<String, String>;

/// Typed arguments in declaration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoundArguments {
    values: Vec<(String, ParamValue)>,
}

impl BoundArguments {
    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.values.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.values.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// `("--name", "value")` pairs for the command line.
    pub fn to_flags(&self) -> Vec<(String, String)> {
        self.values
            .iter()
            .map(|(name, value)| (format!("--{name}"), value.to_string()))
            .collect()
    }
}

/// Bind raw values against a manifest. Missing entries take the default.
pub fn bind(manifest: &PluginManifest, raw: &RawValues) -> Result<BoundArguments, RuntimeError> {
    if let Some(unknown) = raw.keys().find(|k| manifest.parameter(k).is_none()) {
        return Err(RuntimeError::invalid_parameter(
            unknown,
            format!("'{}' does not declare this parameter", manifest.name),
        ));
    }

    let values = manifest
        .parameters
        .iter()
        .map(|spec| {
            let value = match raw.get(&spec.name) {
                Some(text) => coerce(spec, text)?,
                None => spec.default.clone(),
            };
            Ok((spec.name.clone(), value))
        })
        .collect::<Result<Vec<_>, RuntimeError>>()?;

    Ok(BoundArguments { values })
}

/// Coerce one raw string to the parameter's kind.
pub fn coerce(spec: &ParameterSpec, raw: &str) -> Result<ParamValue, RuntimeError> {
    let name = &spec.name;
    let value = match spec.kind {
        ParameterKind::String => ParamValue::String(raw.to_string()),
        ParameterKind::Integer => raw
            .trim()
            .parse::<i64>()
            .map(ParamValue::Integer)
            .map_err(|_| RuntimeError::invalid_parameter(name, format!("'{raw}' is not an integer")))?,
        ParameterKind::Float => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| f.is_finite())
            .map(ParamValue::Float)
            .ok_or_else(|| RuntimeError::invalid_parameter(name, format!("'{raw}' is not a number")))?,
        ParameterKind::Boolean => ParamValue::Boolean(parse_bool(raw).ok_or_else(|| {
            RuntimeError::invalid_parameter(name, format!("'{raw}' is not one of true/false/1/0"))
        })?),
        ParameterKind::Choice => {
            if !spec.choices.iter().any(|c| c == raw) {
                return Err(RuntimeError::invalid_parameter(
                    name,
                    format!("'{raw}' is not one of: {}", spec.choices.join(", ")),
                ));
            }
            ParamValue::Choice(raw.to_string())
        }
    };

    if let Some(reason) = range_violation(&value, spec.min, spec.max) {
        return Err(RuntimeError::invalid_parameter(name, reason));
    }
    Ok(value)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::RawManifest;
    use crate::validator::validate_manifest;

    fn manifest() -> PluginManifest {
        let yaml = r#"name: Resizer
description: Resize.
input-types: "Images (*.png)"
entry-points: {single: main, batch: process_files}
parameters:
  - name: size
    type: integer
    default: 800
    min: 1
  - name: scale
    type: float
    default: 1.5
  - name: keep_alpha
    type: bool
    default: true
  - name: mode
    type: choice
    choices: [fit, fill]
    default: fit
  - name: suffix
    type: str
    default: "_small"
"#;
        let raw: RawManifest = serde_yaml::from_str(yaml).unwrap();
        validate_manifest(raw).unwrap()
    }

    fn raw(pairs: &[(&str, &str)]) -> RawValues {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_defaults_round_trip() {
        let m = manifest();
        let bound = bind(&m, &RawValues::new()).unwrap();
        assert_eq!(bound.len(), m.parameters.len());
        for spec in &m.parameters {
            assert_eq!(bound.get(&spec.name), Some(&spec.default));
        }
    }

    #[test]
    fn test_integer_override() {
        let bound = bind(&manifest(), &raw(&[("size", "1024")])).unwrap();
        assert_eq!(bound.get("size"), Some(&ParamValue::Integer(1024)));
    }

    #[test]
    fn test_integer_rejects_text() {
        let err = bind(&manifest(), &raw(&[("size", "abc")])).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidParameter { ref name, .. } if name == "size"));
    }

    #[test]
    fn test_bounds_enforced() {
        let err = bind(&manifest(), &raw(&[("size", "0")])).unwrap_err();
        assert!(err.to_string().contains("below the minimum"));
    }

    #[test]
    fn test_float_rejects_non_finite() {
        assert!(bind(&manifest(), &raw(&[("scale", "inf")])).is_err());
        assert!(bind(&manifest(), &raw(&[("scale", "NaN")])).is_err());
        let bound = bind(&manifest(), &raw(&[("scale", " 2.25 ")])).unwrap();
        assert_eq!(bound.get("scale"), Some(&ParamValue::Float(2.25)));
    }

    #[test]
    fn test_boolean_forms() {
        for (text, expected) in [("true", true), ("FALSE", false), ("1", true), ("0", false)] {
            let bound = bind(&manifest(), &raw(&[("keep_alpha", text)])).unwrap();
            assert_eq!(bound.get("keep_alpha"), Some(&ParamValue::Boolean(expected)));
        }
        assert!(bind(&manifest(), &raw(&[("keep_alpha", "yes")])).is_err());
    }

    #[test]
    fn test_choice_membership() {
        let bound = bind(&manifest(), &raw(&[("mode", "fill")])).unwrap();
        assert_eq!(bound.get("mode"), Some(&ParamValue::Choice("fill".into())));
        assert!(bind(&manifest(), &raw(&[("mode", "stretch")])).is_err());
    }

    #[test]
    fn test_string_passes_through_unchanged() {
        let bound = bind(&manifest(), &raw(&[("suffix", "  spaced  ")])).unwrap();
        assert_eq!(bound.get("suffix"), Some(&ParamValue::String("  spaced  ".into())));
    }

    #[test]
    fn test_unknown_parameter_rejected() {
        let err = bind(&manifest(), &raw(&[("colour", "red")])).unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidParameter { ref name, .. } if name == "colour"));
    }

    #[test]
    fn test_one_bad_value_fails_whole_bind() {
        let result = bind(&manifest(), &raw(&[("size", "640"), ("mode", "nope")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_flags_follow_declaration_order() {
        let bound = bind(&manifest(), &raw(&[("suffix", "_x"), ("size", "10")])).unwrap();
        let flags: Vec<String> = bound.to_flags().into_iter().map(|(f, _)| f).collect();
        assert_eq!(flags, vec!["--size", "--scale", "--keep_alpha", "--mode", "--suffix"]);
        assert_eq!(bound.to_flags()[0].1, "10");
    }
}
