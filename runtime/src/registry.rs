//! Plugin registry.
//!
//! Scans a flat script directory, validates each candidate in isolation
//! and publishes the result as an immutable [`RegistrySnapshot`]. A rescan
//! builds a complete new snapshot and swaps it in at once, so readers see
//! either the old or the new registry, never a mix. Runs hold an
//! `Arc<Plugin>` taken at submission time and are unaffected by rescans.
//!
//! Reading a script's header does not execute it. Scripts are still
//! trusted code: anything in the directory is run with the user's
//! privileges once selected.

use glob::Pattern;
use serde::Serialize;
use std::collections::HashMap;
use std::fs;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use crate::errors::RuntimeError;
use crate::launcher::{detect_script_type, ScriptType};
use crate::manifest::PluginManifest;
use crate::validator::validate_script;

/// A validated plugin.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Plugin {
    pub manifest: PluginManifest,
    /// Script file the plugin was loaded from.
    pub path: PathBuf,
    pub script_type: ScriptType,
}

impl Plugin {
    pub fn name(&self) -> &str {
        &self.manifest.name
    }

    /// File name of the script, for display and duplicate reports.
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// A candidate script that failed validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    pub path: PathBuf,
    /// Never empty.
    pub reason: String,
}

/// Plugin summary for listings.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub description: String,
    pub input_types: String,
    pub accepts_multiple_files: bool,
    pub parameters: usize,
    pub file: String,
}

/// Result of one directory scan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    plugins: Vec<Arc<Plugin>>,
    rejected: Vec<Rejection>,
}

impl RegistrySnapshot {
    /// Valid plugins in script file-name order.
    pub fn plugins(&self) -> &[Arc<Plugin>] {
        &self.plugins
    }

    /// Rejected candidates in script file-name order.
    pub fn rejected(&self) -> &[Rejection] {
        &self.rejected
    }

    /// Look up a plugin by identity.
    pub fn get(&self, name: &str) -> Option<Arc<Plugin>> {
        self.plugins.iter().find(|p| p.name() == name).cloned()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    pub fn descriptors(&self) -> Vec<PluginDescriptor> {
        self.plugins
            .iter()
            .map(|p| PluginDescriptor {
                name: p.manifest.name.clone(),
                description: p.manifest.description.clone(),
                input_types: p.manifest.accepted_filter.raw.clone(),
                accepts_multiple_files: p.manifest.accepts_multiple_files,
                parameters: p.manifest.parameters.len(),
                file: p.file_name(),
            })
            .collect()
    }
}

/// Scan a directory (non-recursively) into a snapshot.
///
/// A missing or unreadable directory yields an empty snapshot. Files
/// whose name starts with `.` or `__`, or matches one of `skip`, are
/// ignored, as are files that are not scripts at all.
pub fn scan_directory(dir: &Path, skip: &[Pattern]) -> RegistrySnapshot {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "script directory not readable");
            return RegistrySnapshot::default();
        }
    };

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .collect();
    candidates.sort();

    let mut snapshot = RegistrySnapshot::default();
    let mut owners: HashMap<String, String> = HashMap::new();

    for path in candidates {
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            continue;
        };
        if file_name.starts_with('.') || file_name.starts_with("__") {
            continue;
        }
        if skip.iter().any(|p| p.matches(&file_name)) {
            tracing::debug!(file = %file_name, "skipped by pattern");
            continue;
        }

        let metadata = match fs::metadata(&path) {
            Ok(m) if m.is_file() => m,
            Ok(_) => continue,
            Err(e) => {
                snapshot.rejected.push(reject(&path, format!("unreadable: {e}")));
                continue;
            }
        };
        let Some(script_type) = detect_script_type(&path, &metadata) else {
            continue;
        };

        match load_candidate(&path, script_type) {
            Ok(plugin) => {
                if let Some(owner) = owners.get(plugin.name()) {
                    let reason = format!("duplicate name '{}' (already provided by {owner})", plugin.name());
                    snapshot.rejected.push(reject(&path, reason));
                    continue;
                }
                owners.insert(plugin.name().to_string(), file_name);
                snapshot.plugins.push(Arc::new(plugin));
            }
            Err(reason) => snapshot.rejected.push(reject(&path, reason)),
        }
    }

    tracing::info!(
        dir = %dir.display(),
        valid = snapshot.plugins.len(),
        rejected = snapshot.rejected.len(),
        "script scan complete"
    );
    snapshot
}

fn reject(path: &Path, reason: String) -> Rejection {
    let reason = if reason.trim().is_empty() {
        "rejected without a reason".to_string()
    } else {
        reason
    };
    tracing::warn!(script = %path.display(), %reason, "script rejected");
    Rejection {
        path: path.to_path_buf(),
        reason,
    }
}

/// Load one candidate. Panics inside the loader are contained here so a
/// single script can never abort the scan.
fn load_candidate(path: &Path, script_type: ScriptType) -> Result<Plugin, String> {
    let source = fs::read_to_string(path).map_err(|e| format!("unreadable: {e}"))?;

    let validated = panic::catch_unwind(AssertUnwindSafe(|| validate_script(script_type, &source)))
        .map_err(|_| "loader panicked while reading the manifest".to_string())?;

    match validated {
        Ok(manifest) => Ok(Plugin {
            manifest,
            path: path.to_path_buf(),
            script_type,
        }),
        Err(RuntimeError::InvalidPlugin(reason)) => Err(reason),
        Err(other) => Err(other.to_string()),
    }
}

/// Compile skip globs, e.g. `["draft_*", "*_test.py"]`.
pub fn compile_skip_patterns(patterns: &[String]) -> Result<Vec<Pattern>, RuntimeError> {
    patterns
        .iter()
        .map(|p| {
            Pattern::new(p)
                .map_err(|e| RuntimeError::Config(format!("invalid skip pattern '{p}': {e}")))
        })
        .collect()
}

/// Registry of plugins discovered in one script directory.
pub struct PluginRegistry {
    script_dir: PathBuf,
    skip: Vec<Pattern>,
    current: RwLock<Arc<RegistrySnapshot>>,
}

impl PluginRegistry {
    /// Create an empty registry for `script_dir`. Call [`rescan`](Self::rescan)
    /// to populate it.
    pub fn new<P: AsRef<Path>>(script_dir: P) -> Self {
        Self {
            script_dir: script_dir.as_ref().to_path_buf(),
            skip: Vec::new(),
            current: RwLock::new(Arc::new(RegistrySnapshot::default())),
        }
    }

    /// Ignore script files matching any of these globs.
    pub fn with_skip_patterns(mut self, skip: Vec<Pattern>) -> Self {
        self.skip = skip;
        self
    }

    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    /// Rescan the script directory and atomically replace the snapshot.
    pub fn rescan(&self) -> Arc<RegistrySnapshot> {
        let snapshot = Arc::new(scan_directory(&self.script_dir, &self.skip));
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Arc::clone(&snapshot);
        snapshot
    }

    /// The current snapshot.
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Resolve a plugin by identity in the current snapshot.
    pub fn get(&self, name: &str) -> Option<Arc<Plugin>> {
        self.snapshot().get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write(dir: &Path, name: &str, body: &str) {
        fs::write(dir.join(name), body).unwrap();
    }

    const VALID: &str = "# ---\n# name: Echo\n# description: Echo files.\n# input-types: Any\n# parameters: []\n# entry-points:\n#   single: main\n#   batch: process_files\n# ---\nmain() { :; }\nprocess_files() { :; }\n";

    #[test]
    fn test_scan_ignores_hidden_and_non_scripts() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "echo.sh", VALID);
        write(dir.path(), ".hidden.sh", VALID);
        write(dir.path(), "__init__.py", "");
        write(dir.path(), "README.md", "# docs");
        fs::create_dir(dir.path().join("nested.sh")).unwrap();

        let snapshot = scan_directory(dir.path(), &[]);
        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.rejected().is_empty());
        assert_eq!(snapshot.plugins()[0].script_type, ScriptType::Shell);
    }

    #[test]
    fn test_skip_patterns() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "draft_echo.sh", VALID);
        let skip = compile_skip_patterns(&["draft_*".to_string()]).unwrap();
        assert!(scan_directory(dir.path(), &skip).is_empty());
    }

    #[test]
    fn test_invalid_skip_pattern() {
        assert!(compile_skip_patterns(&["[".to_string()]).is_err());
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "a.sh", VALID);
        write(dir.path(), "b.sh", VALID);

        let snapshot = scan_directory(dir.path(), &[]);
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.plugins()[0].file_name(), "a.sh");
        assert_eq!(snapshot.rejected().len(), 1);
        assert_eq!(
            snapshot.rejected()[0].reason,
            "duplicate name 'Echo' (already provided by a.sh)"
        );
    }

    #[test]
    fn test_missing_directory_is_empty() {
        let snapshot = scan_directory(Path::new("/nonexistent/scripts"), &[]);
        assert!(snapshot.is_empty());
        assert!(snapshot.rejected().is_empty());
    }

    #[test]
    fn test_rescan_swaps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let registry = PluginRegistry::new(dir.path());
        assert!(registry.snapshot().is_empty());

        write(dir.path(), "echo.sh", VALID);
        let before = registry.snapshot();
        registry.rescan();
        assert!(before.is_empty());
        assert!(registry.get("Echo").is_some());
    }
}
