//! In-memory resource backend for tests.
//!
//! Resources are JSON detail trees; nested jobs settle after a configurable
//! number of polls; every call is appended to a call log.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use strata_core::backend::DELETE_OPERATION;
use strata_core::{
    BackendError, NestedJobRef, NestedJobState, OperationResult, ParamBag, Provisioned,
    ResourceBackend, ResourceId,
};

/// Effect applied to a resource's detail tree when an operation runs
pub type OperationEffect = Arc<dyn Fn(&mut Value, &ParamBag) + Send + Sync>;

/// Behaviour of one resource type
#[derive(Clone, Default)]
pub struct FakeResourceType {
    capabilities: Vec<String>,
    detail: Map<String, Value>,
    job_polls: u32,
    effects: HashMap<String, OperationEffect>,
}

impl FakeResourceType {
    /// A type with no capabilities whose calls complete synchronously
    pub fn new() -> Self {
        Self::default()
    }

    /// Operation names the type offers besides `delete`
    pub fn with_capabilities(mut self, capabilities: &[&str]) -> Self {
        self.capabilities = capabilities.iter().map(|c| c.to_string()).collect();
        self
    }

    /// Fields every new resource of this type starts with
    pub fn with_detail(mut self, detail: Value) -> Self {
        if let Value::Object(map) = detail {
            self.detail = map;
        }
        self
    }

    /// Factory and operation calls return nested jobs settling after `polls` polls
    pub fn with_job_polls(mut self, polls: u32) -> Self {
        self.job_polls = polls;
        self
    }

    /// Mutate the detail tree when `operation` runs
    pub fn with_effect<F>(mut self, operation: &str, effect: F) -> Self
    where
        F: Fn(&mut Value, &ParamBag) + Send + Sync + 'static,
    {
        self.effects.insert(operation.to_string(), Arc::new(effect));
        self
    }
}

struct FakeResource {
    resource_type: String,
    detail: Value,
}

struct FakeJob {
    remaining: u32,
    failure: Option<String>,
}

#[derive(Default)]
struct FakeState {
    types: BTreeMap<String, FakeResourceType>,
    resources: HashMap<String, FakeResource>,
    jobs: HashMap<String, FakeJob>,
    create_failures: HashMap<String, String>,
    operation_failures: HashMap<String, String>,
    job_failures: HashMap<String, String>,
    calls: Vec<String>,
    counter: u64,
}

impl FakeState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.counter += 1;
        format!("{}-{}", prefix, self.counter)
    }

    fn start_job(&mut self, resource_id: &str, operation: &str, polls: u32) -> Option<NestedJobRef> {
        if polls == 0 && !self.job_failures.contains_key(operation) {
            return None;
        }
        let id = self.next_id("job");
        self.jobs.insert(
            id.clone(),
            FakeJob {
                remaining: polls,
                failure: self.job_failures.get(operation).cloned(),
            },
        );
        Some(NestedJobRef {
            id,
            resource_id: ResourceId::new(resource_id),
            operation: operation.to_string(),
        })
    }
}

/// Thread-safe fake of the backend resource contract
#[derive(Clone, Default)]
pub struct FakeBackend {
    state: Arc<RwLock<FakeState>>,
}

impl fmt::Debug for FakeBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("FakeBackend")
            .field("types", &state.types.keys().collect::<Vec<_>>())
            .field("resource_count", &state.resources.len())
            .field("call_count", &state.calls.len())
            .finish()
    }
}

impl FakeBackend {
    /// A backend offering no resource types
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource type
    pub fn with_type(self, name: &str, resource_type: FakeResourceType) -> Self {
        self.state.write().types.insert(name.to_string(), resource_type);
        self
    }

    /// Seed an existing resource, e.g. for imports
    pub fn add_resource(&self, id: &str, resource_type: &str, detail: Value) {
        self.state.write().resources.insert(
            id.to_string(),
            FakeResource {
                resource_type: resource_type.to_string(),
                detail,
            },
        );
    }

    /// Replace a resource's detail tree
    pub fn set_detail(&self, id: &str, detail: Value) {
        if let Some(resource) = self.state.write().resources.get_mut(id) {
            resource.detail = detail;
        }
    }

    /// Set one top-level field of a resource's detail tree
    pub fn set_field(&self, id: &str, field: &str, value: Value) {
        if let Some(resource) = self.state.write().resources.get_mut(id) {
            if let Value::Object(map) = &mut resource.detail {
                map.insert(field.to_string(), value);
            }
        }
    }

    /// Current detail tree of a resource
    pub fn detail(&self, id: &str) -> Option<Value> {
        self.state.read().resources.get(id).map(|r| r.detail.clone())
    }

    /// Whether the resource exists
    pub fn exists(&self, id: &str) -> bool {
        self.state.read().resources.contains_key(id)
    }

    /// Ids of resources of a type, in creation order
    pub fn resources_of_type(&self, resource_type: &str) -> Vec<String> {
        let state = self.state.read();
        let mut ids: Vec<String> = state
            .resources
            .iter()
            .filter(|(_, r)| r.resource_type == resource_type)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort_by_key(|id| id_counter(id));
        ids
    }

    /// Make the factory fail for a type
    pub fn fail_create(&self, resource_type: &str, message: &str) {
        self.state
            .write()
            .create_failures
            .insert(resource_type.to_string(), message.to_string());
    }

    /// Make an operation fail synchronously
    pub fn fail_operation(&self, operation: &str, message: &str) {
        self.state
            .write()
            .operation_failures
            .insert(operation.to_string(), message.to_string());
    }

    /// Make nested jobs started by an operation (or `create`) fail
    pub fn fail_jobs_of(&self, operation: &str, reason: &str) {
        self.state
            .write()
            .job_failures
            .insert(operation.to_string(), reason.to_string());
    }

    /// Every call made so far, e.g. `create:vm`, `invoke:vm-1:delete`
    pub fn calls(&self) -> Vec<String> {
        self.state.read().calls.clone()
    }

    /// Calls that change backend state (factory and operations)
    pub fn mutating_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.starts_with("create:") || c.starts_with("invoke:"))
            .collect()
    }

    /// Number of calls starting with `prefix`
    pub fn count_calls(&self, prefix: &str) -> usize {
        self.state
            .read()
            .calls
            .iter()
            .filter(|c| c.starts_with(prefix))
            .count()
    }

    /// Forget the call log
    pub fn clear_calls(&self) {
        self.state.write().calls.clear();
    }
}

fn id_counter(id: &str) -> u64 {
    id.rsplit('-')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

#[async_trait]
impl ResourceBackend for FakeBackend {
    fn resource_types(&self) -> Vec<String> {
        self.state.read().types.keys().cloned().collect()
    }

    async fn create(
        &self,
        resource_type: &str,
        params: &ParamBag,
    ) -> Result<Provisioned, BackendError> {
        let mut state = self.state.write();
        state.calls.push(format!("create:{}", resource_type));

        if let Some(message) = state.create_failures.get(resource_type).cloned() {
            return Err(BackendError::Failed {
                resource: resource_type.to_string(),
                operation: "create".to_string(),
                message,
            });
        }
        let spec = state
            .types
            .get(resource_type)
            .cloned()
            .ok_or_else(|| BackendError::Unsupported {
                resource: resource_type.to_string(),
                operation: "create".to_string(),
            })?;

        let id = state.next_id(resource_type);
        let mut detail = spec.detail.clone();
        detail.insert("id".to_string(), json!(id));
        detail.insert("params".to_string(), params.to_value());
        state.resources.insert(
            id.clone(),
            FakeResource {
                resource_type: resource_type.to_string(),
                detail: Value::Object(detail),
            },
        );
        let job = state.start_job(&id, "create", spec.job_polls);

        Ok(Provisioned {
            resource_id: ResourceId::new(id),
            job,
        })
    }

    async fn get(&self, id: &ResourceId) -> Result<Value, BackendError> {
        let mut state = self.state.write();
        state.calls.push(format!("get:{}", id));
        state
            .resources
            .get(id.as_str())
            .map(|r| r.detail.clone())
            .ok_or_else(|| BackendError::NotFound {
                resource: id.to_string(),
            })
    }

    async fn capabilities(&self, id: &ResourceId) -> Result<Vec<String>, BackendError> {
        let mut state = self.state.write();
        state.calls.push(format!("capabilities:{}", id));
        let resource = state
            .resources
            .get(id.as_str())
            .ok_or_else(|| BackendError::NotFound {
                resource: id.to_string(),
            })?;
        let mut capabilities = state
            .types
            .get(&resource.resource_type)
            .map(|t| t.capabilities.clone())
            .unwrap_or_default();
        capabilities.push(DELETE_OPERATION.to_string());
        Ok(capabilities)
    }

    async fn invoke(
        &self,
        id: &ResourceId,
        operation: &str,
        params: &ParamBag,
    ) -> Result<OperationResult, BackendError> {
        let mut state = self.state.write();
        state.calls.push(format!("invoke:{}:{}", id, operation));

        let resource_type = state
            .resources
            .get(id.as_str())
            .map(|r| r.resource_type.clone())
            .ok_or_else(|| BackendError::NotFound {
                resource: id.to_string(),
            })?;
        let spec = state.types.get(&resource_type).cloned().unwrap_or_default();

        if operation != DELETE_OPERATION && !spec.capabilities.iter().any(|c| c == operation) {
            return Err(BackendError::Unsupported {
                resource: id.to_string(),
                operation: operation.to_string(),
            });
        }
        if let Some(message) = state.operation_failures.get(operation).cloned() {
            return Err(BackendError::Failed {
                resource: id.to_string(),
                operation: operation.to_string(),
                message,
            });
        }

        if operation == DELETE_OPERATION {
            state.resources.remove(id.as_str());
        } else if let Some(resource) = state.resources.get_mut(id.as_str()) {
            if let Some(effect) = spec.effects.get(operation) {
                effect(&mut resource.detail, params);
            }
            if let Value::Object(map) = &mut resource.detail {
                let ops = map
                    .entry("operations".to_string())
                    .or_insert_with(|| json!({}));
                if let Value::Object(ops) = ops {
                    ops.insert(operation.to_string(), params.to_value());
                }
            }
        }

        match state.start_job(id.as_str(), operation, spec.job_polls) {
            Some(job) => Ok(OperationResult::Job(job)),
            None => Ok(OperationResult::Completed(json!({ "operation": operation }))),
        }
    }

    async fn poll(&self, job: &NestedJobRef) -> Result<NestedJobState, BackendError> {
        let mut state = self.state.write();
        state.calls.push(format!("poll:{}", job.id));
        let fake = state
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| BackendError::NotFound {
                resource: job.id.clone(),
            })?;

        if fake.remaining > 0 {
            fake.remaining -= 1;
            return Ok(NestedJobState::Running);
        }
        Ok(match &fake.failure {
            Some(reason) => NestedJobState::Failed {
                reason: reason.clone(),
            },
            None => NestedJobState::Succeeded,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn backend() -> FakeBackend {
        FakeBackend::new().with_type(
            "vm",
            FakeResourceType::new()
                .with_capabilities(&["start"])
                .with_detail(json!({"status": "running"}))
                .with_job_polls(2),
        )
    }

    #[tokio::test]
    async fn test_create_returns_job_settling_after_polls() {
        let backend = backend();
        let provisioned = backend.create("vm", &ParamBag::new()).await.unwrap();
        let job = provisioned.job.unwrap();

        assert_eq!(backend.poll(&job).await.unwrap(), NestedJobState::Running);
        assert_eq!(backend.poll(&job).await.unwrap(), NestedJobState::Running);
        assert_eq!(backend.poll(&job).await.unwrap(), NestedJobState::Succeeded);

        let detail = backend.get(&provisioned.resource_id).await.unwrap();
        assert_eq!(detail["status"], json!("running"));
    }

    #[tokio::test]
    async fn test_unsupported_operation_is_rejected() {
        let backend = backend();
        let id = backend.create("vm", &ParamBag::new()).await.unwrap().resource_id;

        let err = backend.invoke(&id, "teleport", &ParamBag::new()).await.unwrap_err();
        assert!(matches!(err, BackendError::Unsupported { .. }));

        let caps = backend.capabilities(&id).await.unwrap();
        assert_eq!(caps, vec!["start".to_string(), "delete".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_removes_resource() {
        let backend = FakeBackend::new().with_type("disk", FakeResourceType::new());
        let id = backend.create("disk", &ParamBag::new()).await.unwrap().resource_id;

        let result = backend.invoke(&id, "delete", &ParamBag::new()).await.unwrap();
        assert!(matches!(result, OperationResult::Completed(_)));
        assert!(!backend.exists(id.as_str()));

        let err = backend.get(&id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_failing_jobs() {
        let backend = FakeBackend::new().with_type("disk", FakeResourceType::new());
        backend.fail_jobs_of("create", "quota exceeded");

        let provisioned = backend.create("disk", &ParamBag::new()).await.unwrap();
        let state = backend.poll(&provisioned.job.unwrap()).await.unwrap();
        assert_eq!(
            state,
            NestedJobState::Failed {
                reason: "quota exceeded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_effects_and_call_log() {
        let backend = FakeBackend::new().with_type(
            "vm",
            FakeResourceType::new()
                .with_capabilities(&["stop"])
                .with_effect("stop", |detail, _| detail["status"] = json!("stopped")),
        );
        let id = backend.create("vm", &ParamBag::new()).await.unwrap().resource_id;
        backend.invoke(&id, "stop", &ParamBag::new()).await.unwrap();

        assert_eq!(backend.detail(id.as_str()).unwrap()["status"], json!("stopped"));
        assert_eq!(
            backend.calls(),
            vec!["create:vm".to_string(), format!("invoke:{}:stop", id)]
        );
        assert_eq!(backend.mutating_calls().len(), 2);
    }
}
