//! Plugin manifest types.
//!
//! A script declares its manifest as YAML inside a leading comment block
//! (see [`crate::manifest_parser`]). The YAML is first deserialized into the
//! permissive `Raw*` types so that every contract violation can be reported
//! with a precise reason, then checked by [`crate::validator`] into the
//! immutable [`PluginManifest`].

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::filter::AcceptedFilter;

/// Manifest as written in the script header, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RawManifest {
    #[serde(default)]
    pub name: Option<serde_yaml::Value>,
    #[serde(default)]
    pub description: Option<serde_yaml::Value>,
    #[serde(default, alias = "accepted-filter")]
    pub input_types: Option<serde_yaml::Value>,
    #[serde(default)]
    pub accepts_multiple_files: Option<serde_yaml::Value>,
    #[serde(default)]
    pub parameters: Option<serde_yaml::Value>,
    #[serde(default)]
    pub entry_points: Option<RawEntryPoints>,
}

/// Entry-point handles as declared.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEntryPoints {
    #[serde(default)]
    pub single: Option<String>,
    #[serde(default)]
    pub batch: Option<String>,
}

/// One parameter entry as declared.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawParameter {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub default: Option<serde_yaml::Value>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub choices: Option<Vec<serde_yaml::Value>>,
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

/// Closed set of parameter kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParameterKind {
    String,
    Integer,
    Float,
    Boolean,
    Choice,
}

impl ParameterKind {
    /// Map a declared `type` tag to a kind. Short aliases are accepted.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "string" | "str" => Some(ParameterKind::String),
            "integer" | "int" => Some(ParameterKind::Integer),
            "float" => Some(ParameterKind::Float),
            "boolean" | "bool" => Some(ParameterKind::Boolean),
            "choice" => Some(ParameterKind::Choice),
            _ => None,
        }
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, ParameterKind::Integer | ParameterKind::Float)
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterKind::String => write!(f, "string"),
            ParameterKind::Integer => write!(f, "integer"),
            ParameterKind::Float => write!(f, "float"),
            ParameterKind::Boolean => write!(f, "boolean"),
            ParameterKind::Choice => write!(f, "choice"),
        }
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    String(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Choice(String),
}

impl ParamValue {
    pub fn kind(&self) -> ParameterKind {
        match self {
            ParamValue::String(_) => ParameterKind::String,
            ParamValue::Integer(_) => ParameterKind::Integer,
            ParamValue::Float(_) => ParameterKind::Float,
            ParamValue::Boolean(_) => ParameterKind::Boolean,
            ParamValue::Choice(_) => ParameterKind::Choice,
        }
    }

    /// Numeric view used for range checks.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParamValue::Integer(v) => Some(*v as f64),
            ParamValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

/// Renders the value the way it is passed on the child's command line.
impl fmt::Display for ParamValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParamValue::String(s) | ParamValue::Choice(s) => write!(f, "{s}"),
            ParamValue::Integer(v) => write!(f, "{v}"),
            ParamValue::Float(v) => write!(f, "{v}"),
            ParamValue::Boolean(v) => write!(f, "{v}"),
        }
    }
}

/// A validated parameter specification.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParameterSpec {
    /// Unique within its manifest; doubles as the `--<name>` flag.
    pub name: String,
    pub kind: ParameterKind,
    /// Always type-checks against `kind`.
    pub default: ParamValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Non-empty iff `kind == Choice`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub choices: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl ParameterSpec {
    /// Display label for form rendering; falls back to the name.
    pub fn display_label(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.name)
    }
}

/// Names of the two processing entry points a script must expose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryPoints {
    /// Processes one input file per invocation.
    pub single: String,
    /// Processes the whole batch in one invocation.
    pub batch: String,
}

/// Which entry point an invocation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Single,
    Batch,
}

impl EntryPoints {
    pub fn handle(&self, kind: EntryKind) -> &str {
        match kind {
            EntryKind::Single => &self.single,
            EntryKind::Batch => &self.batch,
        }
    }
}

/// Validated, immutable plugin descriptor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginManifest {
    /// Human-readable identity, unique within a registry snapshot.
    pub name: String,
    pub description: String,
    /// Advisory file-type filter, e.g. `Images (*.png *.jpg)`.
    pub accepted_filter: AcceptedFilter,
    /// Declaration order is preserved.
    pub parameters: Vec<ParameterSpec>,
    pub accepts_multiple_files: bool,
    pub entry_points: EntryPoints,
}

impl PluginManifest {
    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.parameters.iter().find(|p| p.name == name)
    }

    /// Entry point used for a run: batch when the plugin takes many files.
    pub fn run_entry(&self) -> EntryKind {
        if self.accepts_multiple_files {
            EntryKind::Batch
        } else {
            EntryKind::Single
        }
    }
}

/// Manifest limits.
pub mod constraints {
    /// Maximum length for a plugin name.
    pub const MAX_NAME_LENGTH: usize = 128;
    /// Maximum length for a plugin description.
    pub const MAX_DESCRIPTION_LENGTH: usize = 2048;
    /// Flag reserved for the output directory argument.
    pub const RESERVED_PARAMETER_NAMES: &[&str] = &["output-dir"];
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_aliases() {
        assert_eq!(ParameterKind::from_tag("int"), Some(ParameterKind::Integer));
        assert_eq!(ParameterKind::from_tag("Integer"), Some(ParameterKind::Integer));
        assert_eq!(ParameterKind::from_tag("str"), Some(ParameterKind::String));
        assert_eq!(ParameterKind::from_tag("bool"), Some(ParameterKind::Boolean));
        assert_eq!(ParameterKind::from_tag("choice"), Some(ParameterKind::Choice));
        assert_eq!(ParameterKind::from_tag("list"), None);
    }

    #[test]
    fn test_param_value_display() {
        assert_eq!(ParamValue::Integer(1024).to_string(), "1024");
        assert_eq!(ParamValue::Float(1.5).to_string(), "1.5");
        assert_eq!(ParamValue::Boolean(false).to_string(), "false");
        assert_eq!(ParamValue::Choice("glow".into()).to_string(), "glow");
    }

    #[test]
    fn test_raw_manifest_accepted_filter_alias() {
        let yaml = r#"name: Resizer
accepted-filter: "Images (*.png)"
entry-points:
  single: main
  batch: process_files"#;
        let raw: RawManifest = serde_yaml::from_str(yaml).unwrap();
        assert!(raw.input_types.is_some());
        let entry = raw.entry_points.unwrap();
        assert_eq!(entry.single.as_deref(), Some("main"));
        assert_eq!(entry.batch.as_deref(), Some("process_files"));
    }

    #[test]
    fn test_raw_parameter_type_field() {
        let yaml = r#"name: size
type: int
default: 800
min: 1"#;
        let raw: RawParameter = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(raw.kind.as_deref(), Some("int"));
        assert_eq!(raw.min, Some(1.0));
    }
}
