use thiserror::Error;

/// Core error type for the Strata engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Rejected at compile time, before any resource is touched
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A placeholder could not be resolved
    #[error("Reference error: {0}")]
    ReferenceError(String),

    /// Operation rejected because the stack or resource is in the wrong state
    #[error("Precondition failed: {0}")]
    PreconditionFailed(String),

    /// Operation name not offered by the engine or resource
    #[error("Operation '{operation}' is not supported by {engine}")]
    UnsupportedOperation {
        /// Requested operation name
        operation: String,
        /// Engine variant or resource type that rejected it
        engine: String,
    },

    /// A backend call failed
    #[error("Backend error on resource '{resource}' during '{operation}': {message}")]
    BackendError {
        /// Resource id or type the call targeted
        resource: String,
        /// Operation name
        operation: String,
        /// Backend message
        message: String,
    },

    /// Lifecycle transition not allowed from the current state
    #[error("Invalid state transition: {0}")]
    InvalidStateTransition(String),

    /// Stack not found
    #[error("Stack not found: {0}")]
    StackNotFound(String),

    /// Action not found
    #[error("Action not found: {0}")]
    ActionNotFound(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// A nested backend job finished unsuccessfully
    #[error("Nested job failed: {0}")]
    NestedJobFailed(String),

    /// A nested backend job exceeded the configured timeout
    #[error("Timeout: {0}")]
    Timeout(String),
}

impl CoreError {
    /// Shorthand for a backend failure with context
    pub fn backend(
        resource: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        CoreError::BackendError {
            resource: resource.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Shorthand for an unsupported operation
    pub fn unsupported(operation: impl Into<String>, engine: impl Into<String>) -> Self {
        CoreError::UnsupportedOperation {
            operation: operation.into(),
            engine: engine.into(),
        }
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<serde_yaml::Error> for CoreError {
    fn from(err: serde_yaml::Error) -> Self {
        CoreError::ConfigurationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (CoreError::ValidationError("bad".to_string()), "Validation error: bad"),
            (CoreError::ReferenceError("missing".to_string()), "Reference error: missing"),
            (CoreError::PreconditionFailed("stopped".to_string()), "Precondition failed: stopped"),
            (
                CoreError::unsupported("frobnicate", "mysql"),
                "Operation 'frobnicate' is not supported by mysql",
            ),
            (
                CoreError::backend("vm-1", "start", "refused"),
                "Backend error on resource 'vm-1' during 'start': refused",
            ),
            (CoreError::StackNotFound("s".to_string()), "Stack not found: s"),
            (CoreError::ActionNotFound("a".to_string()), "Action not found: a"),
            (CoreError::JobNotFound("j".to_string()), "Job not found: j"),
            (CoreError::NestedJobFailed("disk".to_string()), "Nested job failed: disk"),
            (CoreError::Timeout("job-1".to_string()), "Timeout: job-1"),
        ];

        for (error, expected_msg) in errors {
            assert_eq!(error.to_string(), expected_msg);
        }
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: CoreError = json_error.into();

        match error {
            CoreError::SerializationError(msg) => assert!(msg.contains("expected value")),
            _ => panic!("Expected SerializationError variant"),
        }
    }

    #[test]
    fn test_from_yaml_error_is_configuration_error() {
        let yaml_error = serde_yaml::from_str::<u64>("not: [a number").unwrap_err();
        let error: CoreError = yaml_error.into();
        assert!(matches!(error, CoreError::ConfigurationError(_)));
    }

    #[test]
    fn test_error_clone_and_eq() {
        let original = CoreError::ValidationError("test".to_string());
        let cloned = original.clone();
        assert_eq!(original, cloned);
    }
}
