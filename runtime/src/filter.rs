//! Advisory file-type filters.
//!
//! A filter such as `Images (*.png *.jpg *.jpeg)` is used by the UI for
//! file dialogs. The runtime never enforces it against submitted files.

use glob::{MatchOptions, Pattern};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// Parsed accepted-file filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AcceptedFilter {
    /// Filter text as declared by the script.
    pub raw: String,
    /// Text before the parenthesised pattern list.
    pub label: String,
    /// Glob patterns, e.g. `*.png`. Empty means "any file".
    pub patterns: Vec<String>,
}

impl AcceptedFilter {
    /// Parse a declared filter. Text without a parenthesised pattern list
    /// becomes a label-only filter that matches every file.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        let (label, patterns) = match (raw.find('('), raw.rfind(')')) {
            (Some(open), Some(close)) if close > open => {
                let patterns = raw[open + 1..close]
                    .split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect();
                (raw[..open].trim().to_string(), patterns)
            }
            _ => (raw.to_string(), Vec::new()),
        };

        Self {
            raw: raw.to_string(),
            label,
            patterns,
        }
    }

    /// Extensions (with leading dot) named by `*.ext` patterns.
    pub fn extensions(&self) -> Vec<String> {
        self.patterns
            .iter()
            .filter_map(|p| p.strip_prefix('*'))
            .filter(|ext| ext.starts_with('.') && ext.len() > 1)
            .map(|ext| ext.to_ascii_lowercase())
            .collect()
    }

    /// Dialog entries: the declared filter followed by an "All Files" entry.
    pub fn dialog_entries(&self) -> Vec<(String, String)> {
        let mut entries = Vec::new();
        if !self.patterns.is_empty() {
            entries.push((self.label.clone(), self.patterns.join(" ")));
        }
        entries.push(("All Files".to_string(), "*.*".to_string()));
        entries
    }

    /// Case-insensitive match of a path's file name against the patterns.
    pub fn matches(&self, path: &Path) -> bool {
        if self.patterns.is_empty() {
            return true;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        let options = MatchOptions {
            case_sensitive: false,
            ..MatchOptions::default()
        };
        self.patterns.iter().any(|p| {
            Pattern::new(p)
                .map(|pattern| pattern.matches_with(name, options))
                .unwrap_or(false)
        })
    }
}

impl fmt::Display for AcceptedFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.raw)
    }
}
