//! Script launch planning.
//!
//! Turns a plugin, its bound arguments and an output directory into a
//! concrete [`Invocation`]: the program to spawn, its argument vector and
//! environment. The convention script authors rely on is:
//!
//! ```text
//! <interpreter> <script> <input>... --output-dir <dir> --<param> <value>...
//! ```
//!
//! with `SCRIPTBATCH_PLUGIN`, `SCRIPTBATCH_ENTRY_POINT` and
//! `SCRIPTBATCH_OUTPUT_DIR` set in the child's environment. The script
//! dispatches to the entry point named by `SCRIPTBATCH_ENTRY_POINT`.

use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::Metadata;
use std::path::{Path, PathBuf};

use crate::manifest::EntryKind;
use crate::marshal::BoundArguments;
use crate::registry::Plugin;

/// Environment variable naming the plugin identity.
pub const ENV_PLUGIN: &str = "SCRIPTBATCH_PLUGIN";
/// Environment variable naming the entry point to dispatch to.
pub const ENV_ENTRY_POINT: &str = "SCRIPTBATCH_ENTRY_POINT";
/// Environment variable holding the allocated output directory.
pub const ENV_OUTPUT_DIR: &str = "SCRIPTBATCH_OUTPUT_DIR";
/// Flag carrying the output directory on the command line.
pub const OUTPUT_DIR_FLAG: &str = "--output-dir";

/// Supported script types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptType {
    Python,
    Shell,
    /// Any other file with the execute bit, run directly.
    Executable,
}

/// Extensions that are never run as executables, even with the execute bit
/// set (FAT and some WSL mounts mark every file 0777).
const DATA_EXTENSIONS: &[&str] = &[
    "md", "txt", "rst", "json", "yaml", "yml", "toml", "ini", "cfg", "csv", "tsv", "log",
    "png", "jpg", "jpeg", "gif", "bmp", "tif", "tiff", "webp", "svg", "ico", "pdf",
    "zip", "tar", "gz", "7z", "pyc", "html", "css",
];

/// Detect the script type from extension and permissions.
///
/// Returns `None` for files that are not plugin candidates at all.
pub fn detect_script_type(path: &Path, metadata: &Metadata) -> Option<ScriptType> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "py" => Some(ScriptType::Python),
        "sh" | "bash" => Some(ScriptType::Shell),
        ext if DATA_EXTENSIONS.contains(&ext) => None,
        _ if is_executable(metadata) => Some(ScriptType::Executable),
        _ => None,
    }
}

#[cfg(unix)]
fn is_executable(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.is_file() && metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn is_executable(_metadata: &Metadata) -> bool {
    false
}

/// Interpreter programs used for interpreted script types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Interpreters {
    pub python: String,
    pub shell: String,
}

impl Default for Interpreters {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            shell: "bash".to_string(),
        }
    }
}

impl Interpreters {
    /// Program and leading arguments for a script of the given type.
    pub fn command_for_script(&self, script_type: ScriptType, script_path: &Path) -> (PathBuf, Vec<OsString>) {
        match script_type {
            ScriptType::Python => (
                resolve_program(&self.python),
                vec![script_path.as_os_str().to_os_string()],
            ),
            ScriptType::Shell => (
                resolve_program(&self.shell),
                vec![script_path.as_os_str().to_os_string()],
            ),
            ScriptType::Executable => (script_path.to_path_buf(), Vec::new()),
        }
    }
}

/// Resolve a program name against PATH, leaving it unchanged when it
/// cannot be found so the spawn reports the launch failure.
fn resolve_program(program: &str) -> PathBuf {
    resolve_executable(program).unwrap_or_else(|| PathBuf::from(program))
}

/// Resolve an executable by searching PATH.
pub fn resolve_executable(program: &str) -> Option<PathBuf> {
    let program_path = Path::new(program);
    if program_path.is_absolute() || program_path.components().count() > 1 {
        return program_path.exists().then(|| program_path.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var)
        .map(|dir| dir.join(program))
        .find(|candidate| candidate.is_file())
}

/// A fully resolved child-process invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Plugin identity, for logging and outcome records.
    pub plugin: String,
    pub program: PathBuf,
    pub args: Vec<OsString>,
    pub env: Vec<(String, String)>,
    /// Also used as the child's working directory.
    pub output_dir: PathBuf,
}

impl Invocation {
    /// Build the invocation of `entry` for the given inputs.
    pub fn for_plugin(
        plugin: &Plugin,
        entry: EntryKind,
        inputs: &[PathBuf],
        output_dir: &Path,
        arguments: &BoundArguments,
        interpreters: &Interpreters,
    ) -> Self {
        let (program, mut args) = interpreters.command_for_script(plugin.script_type, &plugin.path);

        args.extend(inputs.iter().map(|p| p.as_os_str().to_os_string()));
        args.push(OUTPUT_DIR_FLAG.into());
        args.push(output_dir.as_os_str().to_os_string());
        for (flag, value) in arguments.to_flags() {
            args.push(flag.into());
            args.push(value.into());
        }

        let env = vec![
            (ENV_PLUGIN.to_string(), plugin.manifest.name.clone()),
            (
                ENV_ENTRY_POINT.to_string(),
                plugin.manifest.entry_points.handle(entry).to_string(),
            ),
            (
                ENV_OUTPUT_DIR.to_string(),
                output_dir.to_string_lossy().to_string(),
            ),
        ];

        Self {
            plugin: plugin.manifest.name.clone(),
            program,
            args,
            env,
            output_dir: output_dir.to_path_buf(),
        }
    }

    /// Lossy argv (program first), for logs and audit hashing.
    pub fn argv(&self) -> Vec<String> {
        std::iter::once(self.program.to_string_lossy().to_string())
            .chain(self.args.iter().map(|a| a.to_string_lossy().to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_detect_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        let py = dir.path().join("a.py");
        let sh = dir.path().join("b.SH");
        let txt = dir.path().join("c.txt");
        for p in [&py, &sh, &txt] {
            fs::write(p, "").unwrap();
        }
        let meta = |p: &Path| fs::metadata(p).unwrap();
        assert_eq!(detect_script_type(&py, &meta(&py)), Some(ScriptType::Python));
        assert_eq!(detect_script_type(&sh, &meta(&sh)), Some(ScriptType::Shell));
        assert_eq!(detect_script_type(&txt, &meta(&txt)), None);
    }

    #[cfg(unix)]
    #[test]
    fn test_detect_executable_bit() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("tool");
        fs::write(&bin, "#!/bin/sh\n").unwrap();
        fs::set_permissions(&bin, fs::Permissions::from_mode(0o755)).unwrap();
        let meta = fs::metadata(&bin).unwrap();
        assert_eq!(detect_script_type(&bin, &meta), Some(ScriptType::Executable));
    }

    #[cfg(unix)]
    #[test]
    fn test_executable_bit_ignored_for_data_files() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempfile::tempdir().unwrap();
        for name in ["README.md", "photo.PNG", "notes.txt"] {
            let path = dir.path().join(name);
            fs::write(&path, "data").unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o777)).unwrap();
            let meta = fs::metadata(&path).unwrap();
            assert_eq!(detect_script_type(&path, &meta), None, "{name}");
        }
    }

    #[test]
    fn test_resolve_executable_missing() {
        assert!(resolve_executable("definitely-not-a-real-program-xyz").is_none());
    }

    #[test]
    fn test_command_for_executable_runs_directly() {
        let interpreters = Interpreters::default();
        let (program, args) =
            interpreters.command_for_script(ScriptType::Executable, Path::new("/opt/tool"));
        assert_eq!(program, PathBuf::from("/opt/tool"));
        assert!(args.is_empty());
    }

    #[test]
    fn test_command_for_python_passes_script() {
        let interpreters = Interpreters {
            python: "/usr/bin/python-custom".to_string(),
            shell: "bash".to_string(),
        };
        let (program, args) =
            interpreters.command_for_script(ScriptType::Python, Path::new("/s/resize.py"));
        // Unresolvable programs are kept as-is so the spawn fails visibly.
        assert_eq!(program, PathBuf::from("/usr/bin/python-custom"));
        assert_eq!(args, vec![OsString::from("/s/resize.py")]);
    }
}
