//! Error types for flowrun.
//!
//! Errors carry a stable machine-parseable code so that callers embedding
//! the engine can branch on failures without string matching.

use thiserror::Error;

/// Result type alias for flowrun operations.
pub type Result<T> = std::result::Result<T, Error>;

/// flowrun error types.
#[derive(Error, Debug)]
pub enum Error {
    /// The node/edge set contains a cycle. Names one implicated node.
    #[error("Workflow graph contains a cycle involving node '{node}'")]
    Cycle { node: String },

    /// A step runner invocation failed. Recoverable via the retry policy.
    #[error("Step error: {0}")]
    Step(String),

    /// A step failed and the retry policy is exhausted.
    #[error("Step '{node_id}' failed after {attempts} attempt(s): {message}")]
    RetryExhausted {
        node_id: String,
        attempts: u32,
        message: String,
    },

    /// The replay start step does not exist in the original run.
    #[error("Replay target step not found: {0}")]
    ReplayTarget(String),

    /// No run with the given id exists in the store.
    #[error("Run not found: {0}")]
    RunNotFound(String),

    /// No step with the given node id exists in the run.
    #[error("Step not found in run: {0}")]
    StepNotFound(String),

    /// No handler is registered for the node's app tag.
    #[error("No step handler registered for app '{0}'")]
    UnknownApp(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Get the stable error code for programmatic handling.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Cycle { .. } => "GRAPH_CYCLE",
            Error::Step(_) => "STEP_EXECUTION",
            Error::RetryExhausted { .. } => "RETRY_EXHAUSTED",
            Error::ReplayTarget(_) => "REPLAY_TARGET_NOT_FOUND",
            Error::RunNotFound(_) => "RUN_NOT_FOUND",
            Error::StepNotFound(_) => "STEP_NOT_FOUND",
            Error::UnknownApp(_) => "UNKNOWN_APP",
            Error::Validation(_) => "VALIDATION_ERROR",
            Error::Execution(_) => "EXECUTION_ERROR",
            Error::Storage(_) => "STORAGE_ERROR",
            Error::Parse(_) => "PARSE_ERROR",
            Error::Yaml(_) => "YAML_ERROR",
            Error::Json(_) => "JSON_ERROR",
            Error::Io(_) => "IO_ERROR",
        }
    }

    /// Whether a retry of the same operation may succeed.
    ///
    /// Only step-level failures are retryable; structural errors (cycles,
    /// missing runs or steps) never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Step(_))
    }

    /// Convert to a machine-friendly JSON envelope.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "error": {
                "code": self.code(),
                "message": self.to_string(),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_stable() {
        assert_eq!(
            Error::Cycle {
                node: "a".to_string()
            }
            .code(),
            "GRAPH_CYCLE"
        );
        assert_eq!(Error::Step("boom".to_string()).code(), "STEP_EXECUTION");
        assert_eq!(
            Error::ReplayTarget("x".to_string()).code(),
            "REPLAY_TARGET_NOT_FOUND"
        );
    }

    #[test]
    fn test_only_step_errors_are_retryable() {
        assert!(Error::Step("transient".to_string()).is_retryable());
        assert!(!Error::RunNotFound("r".to_string()).is_retryable());
        assert!(!Error::Cycle {
            node: "a".to_string()
        }
        .is_retryable());
    }

    #[test]
    fn test_error_json_envelope() {
        let err = Error::UnknownApp("gmail".to_string());
        let json = err.to_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "UNKNOWN_APP");
    }
}
