//! Output location allocation.
//!
//! Every run gets its own directory laid out as
//! `<base>/<slug>/<YYYYmmdd_HHMMSS>[_n]/`. The leaf is created with a plain
//! `create_dir`, so two runs of the same plugin started within the same
//! second race on the filesystem itself and the loser moves on to the next
//! suffix.

use chrono::{DateTime, Local};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::errors::RuntimeError;

/// Timestamp layout of the run folder.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

const MAX_SUFFIX: u32 = 1000;

/// Filesystem-safe, lowercase, underscore-separated form of a name.
pub fn slugify(name: &str) -> String {
    let slug: String = name
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            c if c.is_whitespace() => '_',
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    if slug.is_empty() || slug.chars().all(|c| c == '.') {
        "plugin".to_string()
    } else {
        slug
    }
}

/// Allocates per-run output directories under a base directory.
#[derive(Debug, Clone)]
pub struct OutputAllocator {
    base: PathBuf,
}

impl OutputAllocator {
    pub fn new<P: AsRef<Path>>(base: P) -> Self {
        Self {
            base: base.as_ref().to_path_buf(),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Create a fresh directory for a run of `identity` starting now.
    pub fn allocate(&self, identity: &str) -> Result<PathBuf, RuntimeError> {
        self.allocate_at(identity, Local::now())
    }

    /// Create a fresh directory for a run of `identity` started at `at`.
    pub fn allocate_at(&self, identity: &str, at: DateTime<Local>) -> Result<PathBuf, RuntimeError> {
        let parent = self.base.join(slugify(identity));
        fs::create_dir_all(&parent)?;

        let stamp = at.format(TIMESTAMP_FORMAT).to_string();
        for n in 0..=MAX_SUFFIX {
            let leaf = if n == 0 {
                stamp.clone()
            } else {
                format!("{stamp}_{n}")
            };
            let candidate = parent.join(leaf);
            match fs::create_dir(&candidate) {
                Ok(()) => {
                    tracing::debug!(dir = %candidate.display(), "allocated output directory");
                    return Ok(candidate);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(RuntimeError::Io(std::io::Error::new(
            ErrorKind::AlreadyExists,
            format!(
                "no free output directory for '{identity}' at {stamp} after {MAX_SUFFIX} attempts"
            ),
        )))
    }
}

/// Allocate a run directory for `identity` under `base`.
pub fn allocate_output_dir(identity: &str, base: &Path) -> Result<PathBuf, RuntimeError> {
    OutputAllocator::new(base).allocate(identity)
}

/// Open a run directory in the system file manager.
pub fn open_output_dir(dir: &Path) -> Result<(), RuntimeError> {
    if !dir.is_dir() {
        return Err(RuntimeError::Io(std::io::Error::new(
            ErrorKind::NotFound,
            format!("{} is not a directory", dir.display()),
        )));
    }
    open::that(dir)?;
    Ok(())
}
