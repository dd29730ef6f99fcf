use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::backend::ResourceBackend;
use crate::domain::reference::{self, Reference};
use crate::domain::repository::ActionRepository;
use crate::domain::stack::Stack;
use crate::{CoreError, ParamBag, ResourceId};

/// Substitutes runtime placeholders with values read from backing resources.
///
/// Parsing happens once per call; lookups of the same resource within a call
/// share one detail fetch. Nothing is written anywhere.
#[derive(Clone)]
pub struct ReferenceResolver {
    actions: Arc<dyn ActionRepository>,
    backend: Arc<dyn ResourceBackend>,
}

impl ReferenceResolver {
    /// Create a resolver
    pub fn new(actions: Arc<dyn ActionRepository>, backend: Arc<dyn ResourceBackend>) -> Self {
        Self { actions, backend }
    }

    /// Resolve every runtime placeholder; any failure aborts
    pub async fn resolve(&self, stack: &Stack, value: &Value) -> Result<Value, CoreError> {
        let resolved = self.resolve_all(stack, value, true).await?;
        substitute_resolved(value, &resolved)
    }

    /// Resolve what can be resolved; placeholders whose target is not
    /// available yet stay in place
    pub async fn resolve_lenient(&self, stack: &Stack, value: &Value) -> Result<Value, CoreError> {
        let resolved = self.resolve_all(stack, value, false).await?;
        substitute_resolved(value, &resolved)
    }

    /// Resolve a parameter bag
    pub async fn resolve_params(&self, stack: &Stack, params: &ParamBag) -> Result<ParamBag, CoreError> {
        let value = self.resolve(stack, &params.to_value()).await?;
        ParamBag::from_value(value)
    }

    async fn resolve_all(
        &self,
        stack: &Stack,
        value: &Value,
        strict: bool,
    ) -> Result<HashMap<Reference, Value>, CoreError> {
        let mut resolved = HashMap::new();
        let mut details: HashMap<ResourceId, Value> = HashMap::new();

        for reference in reference::collect_references(value) {
            if !reference.is_runtime() || resolved.contains_key(&reference) {
                continue;
            }
            match self.lookup(stack, &reference, &mut details).await {
                Ok(found) => {
                    trace!(stack = %stack.name, reference = %reference, "Resolved reference");
                    resolved.insert(reference, found);
                }
                Err(CoreError::ReferenceError(reason)) if !strict => {
                    debug!(stack = %stack.name, reference = %reference, %reason, "Reference not available yet");
                }
                Err(e) => return Err(e),
            }
        }

        Ok(resolved)
    }

    async fn lookup(
        &self,
        stack: &Stack,
        reference: &Reference,
        details: &mut HashMap<ResourceId, Value>,
    ) -> Result<Value, CoreError> {
        let (resource_id, path) = match reference {
            Reference::ActionResource { action, path } => {
                let [qualified, as_written] = stack.action_name_candidates(action);
                let found = match self.actions.find_by_name(&stack.id, &qualified).await? {
                    Some(found) => Some(found),
                    None => self.actions.find_by_name(&stack.id, &as_written).await?,
                };
                let action = found.ok_or_else(|| {
                    CoreError::ReferenceError(format!(
                        "Unknown action '{}' in stack '{}'",
                        qualified, stack.name
                    ))
                })?;
                let name = action.name.clone();
                let resource_id = action.resource_id.ok_or_else(|| {
                    CoreError::ReferenceError(format!(
                        "Action '{}' has not produced a resource yet",
                        name
                    ))
                })?;
                (resource_id, path)
            }
            Reference::Resource { id, path } => (id.clone(), path),
            Reference::Input { name } => {
                return Err(CoreError::ReferenceError(format!(
                    "Input placeholder '{}' must be substituted at compile time",
                    name
                )))
            }
        };

        if path.is_empty() {
            return Ok(Value::String(resource_id.0));
        }

        if !details.contains_key(&resource_id) {
            let detail = self.backend.get(&resource_id).await.map_err(|e| {
                if e.is_not_found() {
                    CoreError::ReferenceError(format!("Resource '{}' does not exist", resource_id))
                } else {
                    CoreError::from(e)
                }
            })?;
            details.insert(resource_id.clone(), detail);
        }

        details
            .get(&resource_id)
            .and_then(|detail| path.extract(detail))
            .cloned()
            .ok_or_else(|| {
                CoreError::ReferenceError(format!(
                    "Path '{}' not found on resource '{}'",
                    path, resource_id
                ))
            })
    }
}

fn substitute_resolved(
    value: &Value,
    resolved: &HashMap<Reference, Value>,
) -> Result<Value, CoreError> {
    reference::substitute(value, &mut |r: &Reference| Ok(resolved.get(r).cloned()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, NestedJobRef, NestedJobState, OperationResult, Provisioned};
    use crate::domain::action::{Action, ActionDeclaration, ResourceSpec};
    use crate::domain::stack::{StackId, StackType};
    use async_trait::async_trait;
    use mockall::mock;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    mock! {
        pub Actions {}

        #[async_trait]
        impl ActionRepository for Actions {
            async fn find_by_name(&self, stack_id: &StackId, name: &str) -> Result<Option<Action>, CoreError>;
            async fn list_for_stack(&self, stack_id: &StackId) -> Result<Vec<Action>, CoreError>;
            async fn save(&self, action: &Action) -> Result<(), CoreError>;
            async fn delete(&self, stack_id: &StackId, name: &str) -> Result<(), CoreError>;
        }
    }

    mock! {
        pub Backend {}

        #[async_trait]
        impl ResourceBackend for Backend {
            fn resource_types(&self) -> Vec<String>;
            async fn create(&self, resource_type: &str, params: &ParamBag) -> Result<Provisioned, BackendError>;
            async fn get(&self, id: &ResourceId) -> Result<Value, BackendError>;
            async fn capabilities(&self, id: &ResourceId) -> Result<Vec<String>, BackendError>;
            async fn invoke(&self, id: &ResourceId, operation: &str, params: &ParamBag) -> Result<OperationResult, BackendError>;
            async fn poll(&self, job: &NestedJobRef) -> Result<NestedJobState, BackendError>;
        }
    }

    fn stack() -> Stack {
        Stack::new("db1", StackType::Sql)
    }

    fn action_with_resource(stack: &Stack, resource: Option<&str>) -> Action {
        let decl = ActionDeclaration::new("a", ResourceSpec::create("vm"), ParamBag::new());
        let descriptor = decl.resource.to_descriptor(&["vm".to_string()]).unwrap();
        let mut action = Action::new(stack, &decl, descriptor, ParamBag::new(), 0);
        action.resource_id = resource.map(ResourceId::new);
        action
    }

    #[tokio::test]
    async fn test_resolves_indexed_path_from_action_resource() {
        let stack = stack();
        let action = action_with_resource(&stack, Some("vm-1"));

        let mut actions = MockActions::new();
        actions
            .expect_find_by_name()
            .returning(move |_, name| Ok((name == "db1-a").then(|| action.clone())));

        let mut backend = MockBackend::new();
        backend
            .expect_get()
            .times(1)
            .returning(|_| Ok(json!({"x": [{"y": "v"}]})));

        let resolver = ReferenceResolver::new(Arc::new(actions), Arc::new(backend));
        let out = resolver
            .resolve(
                &stack,
                &json!({"value": "$$action_resource.a::x.0.y$$", "again": "$$action_resource.db1-a::x.0.y$$"}),
            )
            .await
            .unwrap();

        assert_eq!(out, json!({"value": "v", "again": "v"}));
    }

    #[tokio::test]
    async fn test_action_without_resource_is_reference_error() {
        let stack = stack();
        let action = action_with_resource(&stack, None);

        let mut actions = MockActions::new();
        actions
            .expect_find_by_name()
            .returning(move |_, _| Ok(Some(action.clone())));
        let mut backend = MockBackend::new();
        backend.expect_get().never();

        let resolver = ReferenceResolver::new(Arc::new(actions), Arc::new(backend));
        let err = resolver
            .resolve(&stack, &json!("$$action_resource.a::x.0.y$$"))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ReferenceError(_)));
    }

    #[tokio::test]
    async fn test_missing_path_is_reference_error() {
        let mut backend = MockBackend::new();
        backend.expect_get().returning(|_| Ok(json!({"status": "up"})));

        let resolver = ReferenceResolver::new(Arc::new(MockActions::new()), Arc::new(backend));
        let err = resolver
            .resolve(&stack(), &json!({"a": "$$resource.r-1::network.ip$$"}))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            CoreError::ReferenceError("Path 'network.ip' not found on resource 'r-1'".to_string())
        );
    }

    #[tokio::test]
    async fn test_empty_path_yields_resource_id() {
        let resolver = ReferenceResolver::new(Arc::new(MockActions::new()), Arc::new(MockBackend::new()));
        let out = resolver
            .resolve(&stack(), &json!("$$resource.r-9$$"))
            .await
            .unwrap();
        assert_eq!(out, json!("r-9"));
    }

    #[tokio::test]
    async fn test_no_placeholders_is_noop() {
        let resolver = ReferenceResolver::new(Arc::new(MockActions::new()), Arc::new(MockBackend::new()));
        let tree = json!({"a": [1, {"b": "plain"}], "c": true});
        let once = resolver.resolve(&stack(), &tree).await.unwrap();
        let twice = resolver.resolve(&stack(), &once).await.unwrap();
        assert_eq!(once, tree);
        assert_eq!(twice, tree);
    }

    #[tokio::test]
    async fn test_lenient_keeps_unavailable_placeholders() {
        let mut actions = MockActions::new();
        actions.expect_find_by_name().returning(|_, _| Ok(None));
        let mut backend = MockBackend::new();
        backend.expect_get().returning(|_| Ok(json!({"port": 3306})));

        let resolver = ReferenceResolver::new(Arc::new(actions), Arc::new(backend));
        let out = resolver
            .resolve_lenient(
                &stack(),
                &json!({"host": "$$action_resource.gone::ip$$", "port": "$$resource.r-1::port$$"}),
            )
            .await
            .unwrap();
        assert_eq!(out, json!({"host": "$$action_resource.gone::ip$$", "port": 3306}));
    }
}
