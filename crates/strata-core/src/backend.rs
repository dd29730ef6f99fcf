//! Contract with the backend orchestrators that own the concrete resources.
//!
//! Every resource type offers a factory, a detail view and a set of named
//! capability operations. Long-running work comes back as a nested job the
//! engine polls until it settles. Deletion is the `delete` capability.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::{CoreError, ParamBag, ResourceId};

/// Capability name used to remove a resource
pub const DELETE_OPERATION: &str = "delete";

/// Handle to a backend job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedJobRef {
    /// Backend job id
    pub id: String,
    /// Resource the job works on
    pub resource_id: ResourceId,
    /// Operation that started the job
    pub operation: String,
}

/// State of a backend job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NestedJobState {
    /// Still running
    Running,
    /// Finished successfully
    Succeeded,
    /// Finished unsuccessfully
    Failed {
        /// Backend supplied reason
        reason: String,
    },
}

/// Result of a factory call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Provisioned {
    /// Id of the new resource, known before the work completes
    pub resource_id: ResourceId,
    /// Job to await before the resource is usable
    pub job: Option<NestedJobRef>,
}

/// Result of a capability operation
#[derive(Debug, Clone, PartialEq)]
pub enum OperationResult {
    /// Completed synchronously with a value
    Completed(Value),
    /// Running as a backend job
    Job(NestedJobRef),
}

/// Errors raised by backends
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Resource does not exist (or no longer exists)
    #[error("Resource not found: {resource}")]
    NotFound {
        /// Resource id
        resource: String,
    },

    /// Resource or type does not offer the operation
    #[error("Operation '{operation}' not supported by {resource}")]
    Unsupported {
        /// Resource id or type
        resource: String,
        /// Operation name
        operation: String,
    },

    /// Backend call failed
    #[error("Backend call '{operation}' on {resource} failed: {message}")]
    Failed {
        /// Resource id or type
        resource: String,
        /// Operation name
        operation: String,
        /// Backend message
        message: String,
    },
}

impl BackendError {
    /// Whether the error means the resource is already gone
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }
}

impl From<BackendError> for CoreError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::NotFound { resource } => {
                CoreError::backend(resource, "lookup", "resource not found")
            }
            BackendError::Unsupported {
                resource,
                operation,
            } => CoreError::unsupported(operation, resource),
            BackendError::Failed {
                resource,
                operation,
                message,
            } => CoreError::backend(resource, operation, message),
        }
    }
}

/// Backend resource contract consumed by the engine
#[async_trait]
pub trait ResourceBackend: Send + Sync {
    /// Resource types the factory can create
    fn resource_types(&self) -> Vec<String>;

    /// Provision a new resource
    async fn create(
        &self,
        resource_type: &str,
        params: &ParamBag,
    ) -> Result<Provisioned, BackendError>;

    /// Detail tree of a resource
    async fn get(&self, id: &ResourceId) -> Result<Value, BackendError>;

    /// Operation names the resource offers
    async fn capabilities(&self, id: &ResourceId) -> Result<Vec<String>, BackendError>;

    /// Invoke a named operation
    async fn invoke(
        &self,
        id: &ResourceId,
        operation: &str,
        params: &ParamBag,
    ) -> Result<OperationResult, BackendError>;

    /// Current state of a backend job
    async fn poll(&self, job: &NestedJobRef) -> Result<NestedJobState, BackendError>;
}
