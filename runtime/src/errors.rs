//! Error types for the script runtime.

use thiserror::Error;

/// Script runtime error.
///
/// Scan-time problems are not errors: they are reported as
/// [`Rejection`](crate::Rejection) values and the scan continues. Faults
/// after a child process has been spawned are captured in the
/// [`RunOutcome`](crate::RunOutcome) instead of being returned here.
#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Script metadata or entry-point contract violation.
    #[error("invalid plugin: {0}")]
    InvalidPlugin(String),

    /// Run request names a plugin missing from the current registry snapshot.
    #[error("unknown plugin: {0}")]
    UnknownPlugin(String),

    /// A raw parameter value failed type, choice or range checks.
    #[error("invalid parameter '{name}': {reason}")]
    InvalidParameter { name: String, reason: String },

    /// A run request that can never be executed (e.g. no input files).
    #[error("invalid run request: {0}")]
    InvalidRequest(String),

    /// Another run is already active on this coordinator.
    #[error("a run is already in progress ({0})")]
    RunAlreadyInProgress(String),

    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),

    /// Script version store failure.
    #[error("version store error: {0}")]
    Versions(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RuntimeError {
    pub(crate) fn invalid_parameter(name: &str, reason: impl Into<String>) -> Self {
        RuntimeError::InvalidParameter {
            name: name.to_string(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_invalid_parameter() {
        let err = RuntimeError::invalid_parameter("size", "'abc' is not an integer");
        assert_eq!(
            err.to_string(),
            "invalid parameter 'size': 'abc' is not an integer"
        );
    }

    #[test]
    fn test_display_unknown_plugin() {
        let err = RuntimeError::UnknownPlugin("Resizer".to_string());
        assert_eq!(err.to_string(), "unknown plugin: Resizer");
    }

    #[test]
    fn test_io_error_source() {
        let err: RuntimeError = std::io::Error::other("boom").into();
        assert!(std::error::Error::source(&err).is_some());
        assert!(err.to_string().starts_with("io error:"));
    }
}
