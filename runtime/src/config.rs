//! Runtime configuration.
//!
//! Loaded from `config.toml` in the platform config directory
//! (`~/.config/scriptbatch/config.toml` on Linux). Every field is optional;
//! missing fields take the platform defaults below.
//!
//! ```toml
//! script_dir = "/home/me/scripts"
//! output_base = "/home/me/Downloads"
//! skip_files = ["draft_*", "*_test.py"]
//! grace_period_ms = 2000
//! max_versions = 10
//!
//! [interpreters]
//! python = "python3"
//! shell = "bash"
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::engine::DEFAULT_GRACE_PERIOD;
use crate::errors::RuntimeError;
use crate::launcher::Interpreters;
use crate::versions::DEFAULT_MAX_VERSIONS;

const APP_DIR: &str = "scriptbatch";
const CONFIG_FILE: &str = "config.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Directory scanned for plugin scripts.
    pub script_dir: PathBuf,
    /// Base directory for per-run output folders.
    pub output_base: PathBuf,
    /// Glob patterns of script file names to ignore.
    pub skip_files: Vec<String>,
    pub interpreters: Interpreters,
    pub grace_period_ms: u64,
    pub max_versions: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            script_dir: default_script_dir(),
            output_base: default_output_base(),
            skip_files: Vec::new(),
            interpreters: Interpreters::default(),
            grace_period_ms: DEFAULT_GRACE_PERIOD.as_millis() as u64,
            max_versions: DEFAULT_MAX_VERSIONS,
        }
    }
}

impl RuntimeConfig {
    /// Default config file location, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join(CONFIG_FILE))
    }

    /// Load from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, RuntimeError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            RuntimeError::Config(format!("Failed to read config {}: {}", path.display(), e))
        })?;
        Self::from_toml(&content).map_err(|e| match e {
            RuntimeError::Config(msg) => {
                RuntimeError::Config(format!("Failed to parse config {}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// Load from the default location, or defaults if there is none.
    pub fn load_default() -> Result<Self, RuntimeError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn from_toml(content: &str) -> Result<Self, RuntimeError> {
        toml::from_str(content).map_err(|e| RuntimeError::Config(e.to_string()))
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }
}

fn default_script_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("scripts")
}

fn default_output_base() -> PathBuf {
    dirs::download_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = RuntimeConfig::from_toml(
            "script_dir = \"/srv/scripts\"\nskip_files = [\"draft_*\"]\n\n[interpreters]\npython = \"python3.12\"\n",
        )
        .unwrap();
        assert_eq!(config.script_dir, PathBuf::from("/srv/scripts"));
        assert_eq!(config.skip_files, vec!["draft_*"]);
        assert_eq!(config.interpreters.python, "python3.12");
        assert_eq!(config.interpreters.shell, "bash");
        assert_eq!(config.grace_period(), DEFAULT_GRACE_PERIOD);
        assert_eq!(config.max_versions, 10);
    }

    #[test]
    fn test_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = RuntimeConfig::load(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config, RuntimeConfig::default());
    }

    #[test]
    fn test_invalid_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "grace_period_ms = \"soon\"\n").unwrap();
        let err = RuntimeConfig::load(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
