use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::CoreError;

/// Value object: Stack ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StackId(pub String);

impl StackId {
    /// Generate a fresh id
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Declared kind of stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StackType {
    /// Database server stacks
    Sql,
    /// Application stacks
    App,
    /// Anything built from a hand-written definition
    Generic,
}

impl StackType {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            StackType::Sql => "sql",
            StackType::App => "app",
            StackType::Generic => "generic",
        }
    }
}

impl FromStr for StackType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sql" => Ok(StackType::Sql),
            "app" => Ok(StackType::App),
            "generic" => Ok(StackType::Generic),
            other => Err(CoreError::ValidationError(format!(
                "Unknown stack type: {}",
                other
            ))),
        }
    }
}

/// Stack lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StackStatus {
    /// Compiled, create workflow not started yet
    Pending,
    /// Create or import workflow running
    Building,
    /// Provisioned and operable
    Active,
    /// Update workflow running
    Updating,
    /// Delete workflow running
    Deleting,
    /// Torn down
    Deleted,
    /// A workflow failed; operator or delete workflow must intervene
    Error,
}

/// A declared input with its effective value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputDeclaration {
    /// Input name
    pub name: String,
    /// Default value; `None` means the caller must supply one
    #[serde(default)]
    pub default: Option<Value>,
}

impl InputDeclaration {
    /// Input with a default value
    pub fn new(name: impl Into<String>, default: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            default: Some(default.into()),
        }
    }

    /// Input the caller must supply
    pub fn required(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default: None,
        }
    }
}

/// Aggregate: a composite provisioned resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Stack {
    /// Unique identifier
    pub id: StackId,

    /// Unique name; action names are prefixed with it
    pub name: String,

    /// Declared stack type
    pub stack_type: StackType,

    /// Inputs in declaration order, defaults replaced by effective values
    pub inputs: Vec<InputDeclaration>,

    /// Outputs; values may still hold runtime placeholders
    pub outputs: BTreeMap<String, Value>,

    /// Stack-type specific attributes (engine, version, storage, topology flags)
    pub attributes: Map<String, Value>,

    /// Lifecycle state
    pub status: StackStatus,

    /// Reason for the last Error transition
    pub status_reason: Option<String>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Stack {
    /// Create a new stack in PENDING state
    pub fn new(name: impl Into<String>, stack_type: StackType) -> Self {
        let now = Utc::now();
        Self {
            id: StackId::generate(),
            name: name.into(),
            stack_type,
            inputs: Vec::new(),
            outputs: BTreeMap::new(),
            attributes: Map::new(),
            status: StackStatus::Pending,
            status_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Globally unique action name: `<stack-name>-<short-name>`
    pub fn action_name(&self, short_name: &str) -> String {
        format!("{}-{}", self.name, short_name)
    }

    /// Names a reference to `name` may denote, in lookup order: the
    /// qualified form first, then the name exactly as written
    pub fn action_name_candidates(&self, name: &str) -> [String; 2] {
        [self.action_name(name), name.to_string()]
    }

    /// Effective input value by name
    pub fn input(&self, name: &str) -> Option<&Value> {
        self.inputs
            .iter()
            .find(|input| input.name == name)
            .and_then(|input| input.default.as_ref())
    }

    /// Attribute by name
    pub fn attribute(&self, key: &str) -> Option<&Value> {
        self.attributes.get(key)
    }

    /// Whether mutating operations are currently allowed
    pub fn is_operable(&self) -> bool {
        self.status == StackStatus::Active
    }

    /// PENDING -> BUILDING; re-entry while BUILDING is allowed
    pub fn begin_build(&mut self) -> Result<(), CoreError> {
        match self.status {
            StackStatus::Pending | StackStatus::Building => {
                self.transition(StackStatus::Building);
                Ok(())
            }
            other => Err(self.invalid("begin build", other)),
        }
    }

    /// ACTIVE -> UPDATING
    pub fn begin_update(&mut self) -> Result<(), CoreError> {
        match self.status {
            StackStatus::Active => {
                self.transition(StackStatus::Updating);
                Ok(())
            }
            other => Err(CoreError::PreconditionFailed(format!(
                "Stack '{}' must be ACTIVE to be updated, current state is {:?}",
                self.name, other
            ))),
        }
    }

    /// Any settled state -> DELETING
    pub fn begin_delete(&mut self) -> Result<(), CoreError> {
        match self.status {
            StackStatus::Pending | StackStatus::Active | StackStatus::Error => {
                self.transition(StackStatus::Deleting);
                Ok(())
            }
            other => Err(CoreError::PreconditionFailed(format!(
                "Stack '{}' cannot be deleted while {:?}",
                self.name, other
            ))),
        }
    }

    /// BUILDING/UPDATING -> ACTIVE
    pub fn mark_active(&mut self) -> Result<(), CoreError> {
        match self.status {
            StackStatus::Building | StackStatus::Updating | StackStatus::Active => {
                self.status_reason = None;
                self.transition(StackStatus::Active);
                Ok(())
            }
            other => Err(self.invalid("activate", other)),
        }
    }

    /// Any state -> ERROR
    pub fn mark_error(&mut self, reason: impl Into<String>) {
        self.status_reason = Some(reason.into());
        self.transition(StackStatus::Error);
    }

    /// DELETING -> DELETED
    pub fn mark_deleted(&mut self) -> Result<(), CoreError> {
        match self.status {
            StackStatus::Deleting | StackStatus::Deleted => {
                self.transition(StackStatus::Deleted);
                Ok(())
            }
            other => Err(self.invalid("mark deleted", other)),
        }
    }

    /// Shallow-merge a patch into the attribute bag; `null` removes a key
    pub fn merge_attributes(&mut self, patch: &Map<String, Value>) {
        for (key, value) in patch {
            if value.is_null() {
                self.attributes.remove(key);
            } else {
                self.attributes.insert(key.clone(), value.clone());
            }
        }
        self.update_timestamp();
    }

    /// Update the timestamp
    #[inline]
    pub fn update_timestamp(&mut self) {
        self.updated_at = Utc::now();
    }

    fn transition(&mut self, status: StackStatus) {
        self.status = status;
        self.update_timestamp();
    }

    fn invalid(&self, what: &str, from: StackStatus) -> CoreError {
        CoreError::InvalidStateTransition(format!(
            "Cannot {} stack '{}' in state {:?}",
            what, self.name, from
        ))
    }
}
