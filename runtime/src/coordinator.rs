//! Run coordination.
//!
//! One [`RunCoordinator`] drives at most one run at a time:
//! resolve plugin, bind parameters, allocate the output directory, execute,
//! report. Failures before spawning are returned as errors; anything after
//! spawning is part of the returned [`RunOutcome`]. Runs are never retried.

use chrono::Local;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditRecord, AuditSink, NoopAuditSink};
use crate::engine::{ExecutionEngine, RunOutcome, RunStatus};
use crate::errors::RuntimeError;
use crate::launcher::{Interpreters, Invocation};
use crate::manifest::EntryKind;
use crate::marshal::{bind, RawValues};
use crate::output_dir::OutputAllocator;
use crate::registry::PluginRegistry;
use crate::transcript::{OutputLine, Transcript};

/// A user-initiated run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunRequest {
    /// Plugin identity.
    pub plugin: String,
    pub inputs: Vec<PathBuf>,
    /// Raw parameter values; omitted parameters take their defaults.
    pub params: RawValues,
}

impl RunRequest {
    pub fn new(plugin: impl Into<String>, inputs: Vec<PathBuf>) -> Self {
        Self {
            plugin: plugin.into(),
            inputs,
            params: RawValues::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }
}

pub struct RunCoordinator {
    registry: Arc<PluginRegistry>,
    allocator: OutputAllocator,
    engine: ExecutionEngine,
    interpreters: Interpreters,
    audit_sink: Arc<dyn AuditSink + Send + Sync>,
    active: Mutex<Option<String>>,
}

/// Clears the active-run slot on every exit path.
struct ActiveRun<'a>(&'a Mutex<Option<String>>);

impl Drop for ActiveRun<'_> {
    fn drop(&mut self) {
        *self.0.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl RunCoordinator {
    pub fn new(registry: Arc<PluginRegistry>, allocator: OutputAllocator) -> Self {
        Self {
            registry,
            allocator,
            engine: ExecutionEngine::default(),
            interpreters: Interpreters::default(),
            audit_sink: Arc::new(NoopAuditSink),
            active: Mutex::new(None),
        }
    }

    pub fn with_engine(mut self, engine: ExecutionEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_interpreters(mut self, interpreters: Interpreters) -> Self {
        self.interpreters = interpreters;
        self
    }

    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink + Send + Sync>) -> Self {
        self.audit_sink = sink;
        self
    }

    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }

    /// Identity of the plugin currently running, if any.
    pub fn active_run(&self) -> Option<String> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn acquire(&self, plugin: &str) -> Result<ActiveRun<'_>, RuntimeError> {
        let mut slot = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(current) = slot.as_ref() {
            return Err(RuntimeError::RunAlreadyInProgress(current.clone()));
        }
        *slot = Some(plugin.to_string());
        Ok(ActiveRun(&self.active))
    }

    /// Execute a run request.
    ///
    /// `on_line` receives child output live. The plugin is resolved against
    /// the registry snapshot current at submission; later rescans do not
    /// affect this run.
    pub async fn execute<F>(
        &self,
        request: &RunRequest,
        mut on_line: F,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome, RuntimeError>
    where
        F: FnMut(&OutputLine) + Send,
    {
        let _active = self.acquire(&request.plugin)?;

        let plugin = self
            .registry
            .get(&request.plugin)
            .ok_or_else(|| RuntimeError::UnknownPlugin(request.plugin.clone()))?;
        if request.inputs.is_empty() {
            return Err(RuntimeError::InvalidRequest("no input files".to_string()));
        }
        let arguments = bind(&plugin.manifest, &request.params)?;
        let inputs = absolute_inputs(&request.inputs)?;
        let output_dir = self.allocator.allocate(plugin.name())?;

        tracing::info!(
            plugin = %plugin.name(),
            inputs = inputs.len(),
            output_dir = %output_dir.display(),
            "run submitted"
        );

        let entry = plugin.manifest.run_entry();
        let (outcome, argv) = match entry {
            EntryKind::Batch => {
                let invocation = Invocation::for_plugin(
                    &plugin,
                    entry,
                    &inputs,
                    &output_dir,
                    &arguments,
                    &self.interpreters,
                );
                let outcome = self.engine.run(&invocation, &mut on_line, cancel).await;
                (outcome, invocation.argv())
            }
            EntryKind::Single => {
                let started_at = Local::now();
                let mut transcript = Transcript::new();
                let mut status = RunStatus::Succeeded;
                let mut argv = Vec::new();
                for input in &inputs {
                    let invocation = Invocation::for_plugin(
                        &plugin,
                        entry,
                        std::slice::from_ref(input),
                        &output_dir,
                        &arguments,
                        &self.interpreters,
                    );
                    argv.extend(invocation.argv());
                    let step = self.engine.run(&invocation, &mut on_line, cancel).await;
                    transcript.extend(step.transcript);
                    if !step.status.is_success() {
                        tracing::debug!(input = %input.display(), status = %step.status, "stopping after failed step");
                        status = step.status;
                        break;
                    }
                }
                let outcome = RunOutcome {
                    plugin: plugin.name().to_string(),
                    status,
                    output_dir: output_dir.clone(),
                    transcript,
                    started_at,
                    finished_at: Local::now(),
                };
                (outcome, argv)
            }
        };

        self.audit_sink
            .record(&AuditRecord::from_outcome(&outcome, &argv, inputs.len()));
        Ok(outcome)
    }
}

fn absolute_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>, RuntimeError> {
    if inputs.iter().all(|p| p.is_absolute()) {
        return Ok(inputs.to_vec());
    }
    let cwd = std::env::current_dir()?;
    Ok(inputs.iter().map(|p| cwd.join(p)).collect())
}
