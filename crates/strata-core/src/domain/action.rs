use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::NestedJobRef;
use crate::domain::stack::{Stack, StackId};
use crate::{CoreError, ParamBag, ResourceId};

/// Operation name meaning "provision a new resource of the given type"
pub const CREATE_OPERATION: &str = "create";

/// Operation name meaning "bind an existing resource"
pub const IMPORT_OPERATION: &str = "import";

/// Value object: Action ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionId(pub String);

/// Action lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActionStatus {
    /// Compiled, not yet run
    Pending,
    /// Its run-action step is executing
    Building,
    /// Completed successfully
    Active,
    /// Failed; terminal
    Error,
    /// Being removed by a delete workflow
    Expunging,
}

/// What an action does with its backing resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ResourceDescriptor {
    /// Provision a new resource through the backend factory
    Create {
        /// Backend resource type
        resource_type: String,
    },
    /// Bind an existing resource without provisioning
    Import {
        /// Existing resource id
        resource_id: ResourceId,
    },
    /// Invoke a named capability on an existing resource
    Operation {
        /// Capability name
        operation: String,
        /// Target resource; taken from the `resource_id` parameter when absent
        resource_id: Option<ResourceId>,
    },
}

impl ResourceDescriptor {
    /// Operation name for logs and errors
    pub fn operation(&self) -> &str {
        match self {
            ResourceDescriptor::Create { .. } => CREATE_OPERATION,
            ResourceDescriptor::Import { .. } => IMPORT_OPERATION,
            ResourceDescriptor::Operation { operation, .. } => operation,
        }
    }

    /// Whether the action owns the resource it produces
    pub fn creates_resource(&self) -> bool {
        matches!(self, ResourceDescriptor::Create { .. })
    }
}

/// Declared form of a resource descriptor, as written in a stack definition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    /// Resource type to create (or the type of the targeted resource)
    #[serde(default)]
    pub resource_type: Option<String>,
    /// Existing resource to operate on
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Operation name; `create` when omitted
    #[serde(default)]
    pub operation: Option<String>,
}

impl ResourceSpec {
    /// Create a resource of the given type
    pub fn create(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            resource_id: None,
            operation: None,
        }
    }

    /// Run an operation on a resource of the given type; the target id
    /// comes from the action's `resource_id` parameter
    pub fn operation(resource_type: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            resource_id: None,
            operation: Some(operation.into()),
        }
    }

    /// Run an operation on a known resource
    pub fn on_resource(resource_id: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            resource_type: None,
            resource_id: Some(resource_id.into()),
            operation: Some(operation.into()),
        }
    }

    /// Validate against the known resource types and build a descriptor
    pub fn to_descriptor(&self, known_types: &[String]) -> Result<ResourceDescriptor, CoreError> {
        let resource_type = self.resource_type.as_deref().filter(|t| !t.is_empty());
        let resource_id = self.resource_id.as_deref().filter(|id| !id.is_empty());

        if resource_type.is_none() && resource_id.is_none() {
            return Err(CoreError::ValidationError(
                "Resource descriptor needs a resource type or an existing resource id".to_string(),
            ));
        }

        if let Some(resource_type) = resource_type {
            if !known_types.iter().any(|known| known == resource_type) {
                return Err(CoreError::ValidationError(format!(
                    "Unknown resource type: {}",
                    resource_type
                )));
            }
        }

        let operation = self.operation.as_deref().unwrap_or(CREATE_OPERATION);
        match operation {
            CREATE_OPERATION => match resource_type {
                Some(resource_type) => Ok(ResourceDescriptor::Create {
                    resource_type: resource_type.to_string(),
                }),
                None => Err(CoreError::ValidationError(
                    "Operation 'create' requires a resource type".to_string(),
                )),
            },
            IMPORT_OPERATION => match resource_id {
                Some(resource_id) => Ok(ResourceDescriptor::Import {
                    resource_id: ResourceId::new(resource_id),
                }),
                None => Err(CoreError::ValidationError(
                    "Operation 'import' requires a resource id".to_string(),
                )),
            },
            other => Ok(ResourceDescriptor::Operation {
                operation: other.to_string(),
                resource_id: resource_id.map(ResourceId::new),
            }),
        }
    }
}

/// One action as declared in a stack definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDeclaration {
    /// Short name, unique within the stack
    pub name: String,
    /// Human readable description
    #[serde(default)]
    pub description: String,
    /// Resource descriptor
    pub resource: ResourceSpec,
    /// Parameter template; may contain placeholders
    #[serde(default)]
    pub params: ParamBag,
    /// Leave the backing resource in place when the stack is deleted
    #[serde(default)]
    pub preserve: bool,
}

impl ActionDeclaration {
    /// Declare an action
    pub fn new(name: impl Into<String>, resource: ResourceSpec, params: ParamBag) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            resource,
            params,
            preserve: false,
        }
    }

    /// Builder-style description
    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Builder-style preserve flag
    pub fn preserved(mut self) -> Self {
        self.preserve = true;
        self
    }
}

/// Entity: one unit of provisioning work owned by a stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Unique identifier
    pub id: ActionId,
    /// Owning stack
    pub stack_id: StackId,
    /// `<stack-name>-<short-name>`
    pub name: String,
    /// Name as declared
    pub short_name: String,
    /// Description
    pub description: String,
    /// Resource descriptor
    pub descriptor: ResourceDescriptor,
    /// Parameters; only runtime placeholders remain
    pub params: ParamBag,
    /// Lifecycle state
    pub status: ActionStatus,
    /// Backing resource produced or targeted, once known
    pub resource_id: Option<ResourceId>,
    /// Backend job still to be awaited for the backing resource
    pub nested_job: Option<NestedJobRef>,
    /// Creation order within the stack
    pub sequence: u32,
    /// Leave the backing resource in place on delete
    pub preserve: bool,
    /// Error message once failed
    pub error: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Action {
    /// Create a PENDING action for the stack
    pub fn new(
        stack: &Stack,
        declaration: &ActionDeclaration,
        descriptor: ResourceDescriptor,
        params: ParamBag,
        sequence: u32,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ActionId(Uuid::new_v4().to_string()),
            stack_id: stack.id.clone(),
            name: stack.action_name(&declaration.name),
            short_name: declaration.name.clone(),
            description: declaration.description.clone(),
            descriptor,
            params,
            status: ActionStatus::Pending,
            resource_id: None,
            nested_job: None,
            sequence,
            preserve: declaration.preserve,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// PENDING -> BUILDING; re-entry while BUILDING is allowed
    pub fn start(&mut self) -> Result<(), CoreError> {
        match self.status {
            ActionStatus::Pending | ActionStatus::Building => {
                self.transition(ActionStatus::Building);
                Ok(())
            }
            other => Err(self.invalid("start", other)),
        }
    }

    /// BUILDING -> ACTIVE
    pub fn complete(&mut self) -> Result<(), CoreError> {
        match self.status {
            ActionStatus::Building => {
                self.nested_job = None;
                self.transition(ActionStatus::Active);
                Ok(())
            }
            other => Err(self.invalid("complete", other)),
        }
    }

    /// PENDING/BUILDING -> ERROR
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), CoreError> {
        match self.status {
            ActionStatus::Pending | ActionStatus::Building => {
                self.error = Some(error.into());
                self.nested_job = None;
                self.transition(ActionStatus::Error);
                Ok(())
            }
            other => Err(self.invalid("fail", other)),
        }
    }

    /// Any state -> EXPUNGING
    pub fn begin_expunge(&mut self) {
        self.transition(ActionStatus::Expunging);
    }

    /// Record the backing resource and any backend job still running for it
    pub fn bind_resource(&mut self, resource_id: ResourceId, nested_job: Option<NestedJobRef>) {
        self.resource_id = Some(resource_id);
        self.nested_job = nested_job;
        self.updated_at = Utc::now();
    }

    fn transition(&mut self, status: ActionStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    fn invalid(&self, what: &str, from: ActionStatus) -> CoreError {
        CoreError::InvalidStateTransition(format!(
            "Cannot {} action '{}' in state {:?}",
            what, self.name, from
        ))
    }
}
