use serde::Serialize;
use sha2::{Digest, Sha256};
use std::path::PathBuf;

use crate::engine::{RunOutcome, RunStatus};
use crate::transcript::OutputStream;

#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub plugin: String,
    /// Hash of the invocation argv (program first).
    pub invocation_hash: String,
    pub input_count: usize,
    pub output_dir: PathBuf,
    pub start_time_ms: i64,
    pub duration_ms: i64,
    pub status: RunStatus,
    pub stdout_lines: usize,
    pub stderr_lines: usize,
}

impl AuditRecord {
    pub fn from_outcome(outcome: &RunOutcome, argv: &[String], input_count: usize) -> Self {
        let lines = outcome.transcript.lines();
        let stderr_lines = lines
            .iter()
            .filter(|l| l.stream == OutputStream::Stderr)
            .count();
        Self {
            plugin: outcome.plugin.clone(),
            invocation_hash: hash_argv(argv),
            input_count,
            output_dir: outcome.output_dir.clone(),
            start_time_ms: outcome.started_at.timestamp_millis(),
            duration_ms: outcome.duration().num_milliseconds(),
            status: outcome.status.clone(),
            stdout_lines: lines.len() - stderr_lines,
            stderr_lines,
        }
    }
}

pub trait AuditSink {
    fn record(&self, record: &AuditRecord);
}

pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _record: &AuditRecord) {}
}

/// Emits each record as a structured `tracing` event.
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&self, record: &AuditRecord) {
        tracing::info!(
            target: "scriptbatch::audit",
            plugin = %record.plugin,
            invocation = %record.invocation_hash,
            inputs = record.input_count,
            output_dir = %record.output_dir.display(),
            duration_ms = record.duration_ms,
            status = %record.status,
            "run recorded"
        );
    }
}

/// SHA-256 over the NUL-separated argv.
pub fn hash_argv(argv: &[String]) -> String {
    let mut hasher = Sha256::new();
    for arg in argv {
        hasher.update(arg.as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_argv_separates_arguments() {
        let a = hash_argv(&["ab".to_string(), "c".to_string()]);
        let b = hash_argv(&["a".to_string(), "bc".to_string()]);
        assert_ne!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_empty_argv_hash() {
        assert_eq!(
            hash_argv(&[]),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
