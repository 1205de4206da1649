//! Error types for the policy gate

use std::time::Duration;
use thiserror::Error;

/// Policy gate errors
#[derive(Debug, Error)]
pub enum GateError {
    /// Policy source or query could not be compiled
    #[error("Policy compilation failed: {0}")]
    CompileError(String),

    /// Evaluation did not finish within the configured timeout
    #[error("Policy evaluation timed out after {0:?}")]
    EvaluationTimeout(Duration),

    /// Evaluation failed (type faults, conflicting rule outputs, engine panics)
    #[error("Policy evaluation failed: {0}")]
    EvaluationFault(String),

    /// Query resolved to something other than a boolean
    #[error("Query '{query}' did not resolve to a boolean, found: {found}")]
    ResultShapeError { query: String, found: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl GateError {
    /// Errors that must abort startup rather than be handled per request
    pub fn is_fatal(&self) -> bool {
        matches!(self, GateError::CompileError(_) | GateError::InvalidConfig(_))
    }
}

/// Result type for policy gate operations
pub type Result<T> = std::result::Result<T, GateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(GateError::CompileError("bad".into()).is_fatal());
        assert!(GateError::InvalidConfig("bad".into()).is_fatal());
        assert!(!GateError::EvaluationTimeout(Duration::from_millis(5)).is_fatal());
        assert!(!GateError::EvaluationFault("boom".into()).is_fatal());
        assert!(!GateError::ResultShapeError {
            query: "data.policy.level".into(),
            found: "3".into(),
        }
        .is_fatal());
    }
}
