use strata_core::CoreError;
use thiserror::Error;

/// Errors raised while specialising stacks for an engine
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// Error from the core engine
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Catalog entity does not exist
    #[error("{kind} '{name}' not found in catalog")]
    CatalogNotFound {
        /// Entity kind, e.g. "site"
        kind: &'static str,
        /// Requested name
        name: String,
    },

    /// Request is inconsistent with the catalog or the engine profile
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Persisted SQL attributes are missing or malformed
    #[error("Stack '{stack}' has invalid SQL attributes: {message}")]
    InvalidAttributes {
        /// Stack name
        stack: String,
        /// What is wrong
        message: String,
    },

    /// Engine name is not known
    #[error("Unknown engine '{0}'")]
    UnknownEngine(String),
}

impl EngineError {
    /// Shorthand for a catalog miss
    pub fn not_found(kind: &'static str, name: impl Into<String>) -> Self {
        EngineError::CatalogNotFound {
            kind,
            name: name.into(),
        }
    }
}

impl From<EngineError> for CoreError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Core(core) => core,
            other => CoreError::ValidationError(other.to_string()),
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
