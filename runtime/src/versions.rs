//! Script store with version backups.
//!
//! Scripts are written into the script directory atomically (temp file in
//! the same directory, then rename). Before an existing script is replaced
//! a copy is kept under
//! `<script_dir>/.script_versions/<file name>/v<N>_<timestamp>.<ext>`, indexed by
//! a `versions.json` file in the same folder. Only the newest
//! `max_versions` backups are retained.
//!
//! Installing a script never rescans the registry; callers rescan when
//! they want the new script to become visible.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::errors::RuntimeError;
use crate::launcher::ScriptType;
use crate::manifest::PluginManifest;
use crate::output_dir::TIMESTAMP_FORMAT;
use crate::validator::{script_type_for_source, validate_source};

pub const VERSIONS_DIR: &str = ".script_versions";
pub const INDEX_FILE: &str = "versions.json";
pub const DEFAULT_MAX_VERSIONS: usize = 10;

/// Who produced a version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionOrigin {
    /// Edited by hand.
    Manual,
    /// Written by a script generator.
    Generated,
    /// Saved automatically before a restore.
    Restore,
}

/// One backed-up version of a script.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionEntry {
    pub version: u32,
    /// `YYYYmmdd_HHMMSS`, local time.
    pub timestamp: String,
    #[serde(default)]
    pub change_note: String,
    pub origin: VersionOrigin,
    pub backup_file: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VersionIndex {
    /// Oldest first.
    versions: Vec<VersionEntry>,
}

/// Writes scripts into a script directory and manages their backups.
#[derive(Debug, Clone)]
pub struct ScriptStore {
    script_dir: PathBuf,
    max_versions: usize,
}

impl ScriptStore {
    pub fn new<P: AsRef<Path>>(script_dir: P, max_versions: usize) -> Self {
        Self {
            script_dir: script_dir.as_ref().to_path_buf(),
            max_versions: max_versions.max(1),
        }
    }

    pub fn script_dir(&self) -> &Path {
        &self.script_dir
    }

    /// Path of a script in the store. `file_name` must be a bare file name.
    pub fn script_path(&self, file_name: &str) -> Result<PathBuf, RuntimeError> {
        let bare = Path::new(file_name).file_name().and_then(|n| n.to_str());
        if bare != Some(file_name) || file_name.starts_with('.') {
            return Err(RuntimeError::Versions(format!(
                "'{file_name}' is not a plain script file name"
            )));
        }
        Ok(self.script_dir.join(file_name))
    }

    /// Backups are keyed by the full file name; `resize.py` and
    /// `resize.sh` keep separate histories.
    fn version_dir(&self, file_name: &str) -> Result<PathBuf, RuntimeError> {
        self.script_path(file_name)?;
        Ok(self.script_dir.join(VERSIONS_DIR).join(file_name))
    }

    fn load_index(&self, version_dir: &Path) -> Result<VersionIndex, RuntimeError> {
        let path = version_dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(VersionIndex::default());
        }
        let text = fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&text)?)
    }

    fn save_index(&self, version_dir: &Path, index: &VersionIndex) -> Result<(), RuntimeError> {
        let json = serde_json::to_string_pretty(index)?;
        write_atomic(&version_dir.join(INDEX_FILE), json.as_bytes(), None)
    }

    /// Validate `source` and write it as `file_name`, backing up any
    /// existing script of that name first.
    pub fn install(
        &self,
        file_name: &str,
        source: &str,
        origin: VersionOrigin,
        change_note: &str,
    ) -> Result<PluginManifest, RuntimeError> {
        let target = self.script_path(file_name)?;
        let manifest = validate_source(file_name, source)?;
        fs::create_dir_all(&self.script_dir)?;

        self.backup(file_name, change_note, origin)?;
        let mode = match script_type_for_source(file_name, source) {
            Some(ScriptType::Executable) => 0o755,
            _ => 0o644,
        };
        write_atomic(&target, source.as_bytes(), Some(mode))?;
        tracing::info!(script = %target.display(), plugin = %manifest.name, ?origin, "script installed");
        Ok(manifest)
    }

    /// Back up the current contents of `file_name`. Returns `None` when the
    /// script does not exist.
    pub fn backup(
        &self,
        file_name: &str,
        change_note: &str,
        origin: VersionOrigin,
    ) -> Result<Option<VersionEntry>, RuntimeError> {
        let script = self.script_path(file_name)?;
        if !script.is_file() {
            return Ok(None);
        }

        let version_dir = self.version_dir(file_name)?;
        fs::create_dir_all(&version_dir)?;
        let mut index = self.load_index(&version_dir)?;

        let version = index.versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        let timestamp = Local::now().format(TIMESTAMP_FORMAT).to_string();
        let backup_file = match script.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("v{version}_{timestamp}.{ext}"),
            None => format!("v{version}_{timestamp}"),
        };
        fs::copy(&script, version_dir.join(&backup_file))?;

        let entry = VersionEntry {
            version,
            timestamp,
            change_note: change_note.to_string(),
            origin,
            backup_file,
        };
        index.versions.push(entry.clone());

        while index.versions.len() > self.max_versions {
            let old = index.versions.remove(0);
            let old_path = version_dir.join(&old.backup_file);
            if let Err(e) = fs::remove_file(&old_path) {
                tracing::debug!(path = %old_path.display(), error = %e, "pruned backup already gone");
            }
        }

        self.save_index(&version_dir, &index)?;
        tracing::debug!(script = %file_name, version, "backup created");
        Ok(Some(entry))
    }

    /// Versions whose backup file still exists, newest first.
    pub fn versions(&self, file_name: &str) -> Result<Vec<VersionEntry>, RuntimeError> {
        let version_dir = self.version_dir(file_name)?;
        let index = self.load_index(&version_dir)?;
        let mut versions: Vec<VersionEntry> = index
            .versions
            .into_iter()
            .filter(|v| version_dir.join(&v.backup_file).is_file())
            .collect();
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(versions)
    }

    /// Location of a version's backup file.
    pub fn version_path(&self, file_name: &str, entry: &VersionEntry) -> Result<PathBuf, RuntimeError> {
        Ok(self.version_dir(file_name)?.join(&entry.backup_file))
    }

    /// Replace `file_name` with backup `version`, saving the current
    /// contents as a new version first.
    pub fn restore(&self, file_name: &str, version: u32) -> Result<VersionEntry, RuntimeError> {
        let entry = self
            .versions(file_name)?
            .into_iter()
            .find(|v| v.version == version)
            .ok_or_else(|| RuntimeError::Versions(format!("no version v{version} of '{file_name}'")))?;
        let contents = fs::read(self.version_path(file_name, &entry)?)?;

        self.backup(
            file_name,
            &format!("Before reverting to v{version}"),
            VersionOrigin::Restore,
        )?;

        let target = self.script_path(file_name)?;
        let mode = existing_mode(&target).unwrap_or(0o644);
        write_atomic(&target, &contents, Some(mode))?;
        tracing::info!(script = %target.display(), version, "script restored");
        Ok(entry)
    }

    /// Remove every backup of `file_name`.
    pub fn purge(&self, file_name: &str) -> Result<(), RuntimeError> {
        let version_dir = self.version_dir(file_name)?;
        if version_dir.exists() {
            fs::remove_dir_all(&version_dir)?;
        }
        Ok(())
    }
}

#[cfg(unix)]
fn existing_mode(path: &Path) -> Option<u32> {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o777)
}

#[cfg(not(unix))]
fn existing_mode(_path: &Path) -> Option<u32> {
    None
}

/// Write via a sibling temp file and rename into place.
fn write_atomic(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<(), RuntimeError> {
    let dir = path
        .parent()
        .ok_or_else(|| RuntimeError::Versions(format!("{} has no parent directory", path.display())))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(contents)?;
    tmp.flush()?;

    #[cfg(unix)]
    if let Some(mode) = mode {
        use std::os::unix::fs::PermissionsExt;
        tmp.as_file().set_permissions(fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = mode;

    tmp.persist(path).map_err(|e| RuntimeError::Io(e.error))?;
    Ok(())
}
