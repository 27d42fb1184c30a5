//! Engine error types.
//!
//! Only infrastructure problems surface as errors. Structural workflow issues
//! (missing step, transition cycle) and action failures are recorded as data on
//! the instance and in action results instead.

use thiserror::Error;

/// Errors that escape the engine to its caller.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Workflow store unavailable or rejected the operation.
    #[error("Store error: {0}")]
    Store(String),

    /// Requested record does not exist in the store.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Operation is not valid for the instance's current state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Workflow definition could not be decoded.
    #[error("Invalid definition: {0}")]
    InvalidDefinition(String),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(String),
}

impl EngineError {
    /// Returns true for failures of an external collaborator, which callers
    /// should treat as retryable.
    pub fn is_infrastructure(&self) -> bool {
        matches!(self, EngineError::Store(_))
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Json(e.to_string())
    }
}

/// Result type alias using EngineError.
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::Store("connection refused".to_string());
        assert_eq!(err.to_string(), "Store error: connection refused");

        let err = EngineError::InvalidState("instance is completed".to_string());
        assert_eq!(err.to_string(), "Invalid state: instance is completed");
    }

    #[test]
    fn test_infrastructure_classification() {
        assert!(EngineError::Store("down".to_string()).is_infrastructure());
        assert!(!EngineError::NotFound("wf-1".to_string()).is_infrastructure());
        assert!(!EngineError::InvalidState("x".to_string()).is_infrastructure());
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: EngineError = json_err.into();
        assert!(matches!(err, EngineError::Json(_)));
    }
}
