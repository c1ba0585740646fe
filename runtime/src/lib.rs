//! ScriptBatch Runtime - discover, validate and run batch-processing scripts.
//!
//! Scripts in a single directory declare themselves as plugins through a
//! YAML manifest in a leading comment block. The runtime validates them
//! without executing them, binds user-supplied parameter strings to typed
//! values, allocates a fresh output folder per run and supervises the
//! script as a child process, streaming its output live.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        Plugin Registry                           │
//! │  - Scans the script directory (.py, .sh, executables)            │
//! │  - Parses `# ---` YAML headers, checks entry points              │
//! │  - Publishes immutable snapshots; rejects carry a reason         │
//! └─────────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                       Run Coordinator                            │
//! │  - Parameter binding (typed, ranged, choice-checked)             │
//! │  - Output folder allocation: <base>/<slug>/<timestamp>[_n]/      │
//! │  - Execution engine: child process, live lines, cancellation     │
//! │  - Audit records                                                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Scripts are trusted code. Reading a manifest never runs the script, but
//! running a plugin executes it with the user's privileges.

mod audit;
mod config;
mod coordinator;
mod engine;
mod errors;
mod filter;
mod launcher;
mod manifest;
mod manifest_parser;
mod marshal;
mod output_dir;
mod registry;
mod transcript;
mod validator;
mod versions;

use std::fs;
use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub use audit::{hash_argv, AuditRecord, AuditSink, NoopAuditSink, TracingAuditSink};
pub use config::RuntimeConfig;
pub use coordinator::{RunCoordinator, RunRequest};
pub use engine::{ExecutionEngine, RunOutcome, RunStatus, DEFAULT_GRACE_PERIOD};
pub use errors::RuntimeError;
pub use filter::AcceptedFilter;
pub use launcher::{
    Interpreters, Invocation, ScriptType, ENV_ENTRY_POINT, ENV_OUTPUT_DIR, ENV_PLUGIN,
    OUTPUT_DIR_FLAG,
};
pub use manifest::{
    constraints, EntryKind, EntryPoints, ParamValue, ParameterKind, ParameterSpec,
    PluginManifest, RawManifest,
};
pub use manifest_parser::parse_manifest_header;
pub use marshal::{bind, BoundArguments, RawValues};
pub use output_dir::{allocate_output_dir, open_output_dir, slugify, OutputAllocator};
pub use registry::{
    compile_skip_patterns, scan_directory, Plugin, PluginDescriptor, PluginRegistry,
    RegistrySnapshot, Rejection,
};
pub use transcript::{OutputLine, OutputStream, Transcript};
pub use validator::{validate_manifest, validate_source};
pub use versions::{ScriptStore, VersionEntry, VersionOrigin};

/// ScriptBatch runtime: registry, coordinator and script store wired from
/// one [`RuntimeConfig`].
pub struct ScriptRuntime {
    config: RuntimeConfig,
    registry: Arc<PluginRegistry>,
    coordinator: RunCoordinator,
    store: ScriptStore,
}

impl ScriptRuntime {
    /// Build a runtime from a configuration and perform the initial scan.
    ///
    /// The script directory is created if it does not exist yet.
    pub fn from_config(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        fs::create_dir_all(&config.script_dir)?;
        let skip = compile_skip_patterns(&config.skip_files)?;

        let registry = Arc::new(PluginRegistry::new(&config.script_dir).with_skip_patterns(skip));
        registry.rescan();

        let coordinator = RunCoordinator::new(
            Arc::clone(&registry),
            OutputAllocator::new(&config.output_base),
        )
        .with_engine(ExecutionEngine::new(config.grace_period()))
        .with_interpreters(config.interpreters.clone());
        let store = ScriptStore::new(&config.script_dir, config.max_versions);

        Ok(Self {
            config,
            registry,
            coordinator,
            store,
        })
    }

    /// Runtime over `script_dir` writing outputs below `output_base`, with
    /// all other settings at their defaults.
    pub fn from_directories<P: AsRef<Path>, Q: AsRef<Path>>(
        script_dir: P,
        output_base: Q,
    ) -> Result<Self, RuntimeError> {
        Self::from_config(RuntimeConfig {
            script_dir: script_dir.as_ref().to_path_buf(),
            output_base: output_base.as_ref().to_path_buf(),
            ..RuntimeConfig::default()
        })
    }

    /// Set a custom audit sink.
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink + Send + Sync>) -> Self {
        self.coordinator = self.coordinator.with_audit_sink(sink);
        self
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &RunCoordinator {
        &self.coordinator
    }

    pub fn store(&self) -> &ScriptStore {
        &self.store
    }

    /// Rescan the script directory. In-flight runs keep their plugin.
    pub fn rescan(&self) -> Arc<RegistrySnapshot> {
        self.registry.rescan()
    }

    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        self.registry.snapshot()
    }

    /// Descriptors of all valid plugins in the current snapshot.
    pub fn list_plugins(&self) -> Vec<PluginDescriptor> {
        self.registry.snapshot().descriptors()
    }

    pub fn plugin(&self, name: &str) -> Option<Arc<Plugin>> {
        self.registry.get(name)
    }

    /// Execute a run; see [`RunCoordinator::execute`].
    pub async fn run<F>(
        &self,
        request: &RunRequest,
        on_line: F,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RuntimeError>
    where
        F: FnMut(&OutputLine) + Send,
    {
        self.coordinator.execute(request, on_line, cancel).await
    }

    /// Validate and install a script, then rescan so it becomes visible.
    pub fn install_script(
        &self,
        file_name: &str,
        source: &str,
        origin: VersionOrigin,
        change_note: &str,
    ) -> Result<PluginManifest, RuntimeError> {
        let manifest = self.store.install(file_name, source, origin, change_note)?;
        self.rescan();
        Ok(manifest)
    }

    /// Restore a script version, then rescan.
    pub fn restore_script(&self, file_name: &str, version: u32) -> Result<VersionEntry, RuntimeError> {
        let entry = self.store.restore(file_name, version)?;
        self.rescan();
        Ok(entry)
    }
}
