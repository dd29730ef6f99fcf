//! Stack lifecycle entry points.
//!
//! Each mutating call validates synchronously (state guards, compilation),
//! persists the stack and a pending job, and returns the job for the caller
//! to run or hand to a worker. The compiled actions travel in the job's
//! parameter bag until its materialize step writes them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::application::compiler::{
    CompiledWorkflow, StackDefinition, UpdateDefinition, WorkflowCompiler, PRESERVE_PARAM,
};
use crate::application::topology::TopologyService;
use crate::domain::action::{Action, ActionStatus, ResourceDescriptor};
use crate::domain::job::Job;
use crate::domain::link::Edge;
use crate::domain::reference;
use crate::domain::repository::{ActionRepository, JobRepository, StackRepository};
use crate::domain::stack::{Stack, StackId, StackStatus, StackType};
use crate::domain::step::WorkflowKind;
use crate::{CoreError, ParamBag, ResourceId};

/// Repositories and collaborators the stack service works with
#[derive(Clone)]
pub struct StackServiceDeps {
    /// Stack store
    pub stacks: Arc<dyn StackRepository>,
    /// Action store
    pub actions: Arc<dyn ActionRepository>,
    /// Job store
    pub jobs: Arc<dyn JobRepository>,
    /// Topology service
    pub topology: TopologyService,
    /// Workflow compiler
    pub compiler: WorkflowCompiler,
}

/// Summary of one action in a stack projection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSummary {
    /// Full action name
    pub name: String,
    /// Description
    pub description: String,
    /// Operation the action performs
    pub operation: String,
    /// Lifecycle state
    pub status: ActionStatus,
    /// Backing resource, once known
    pub resource_id: Option<ResourceId>,
}

/// Read-only projection of a stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackInfo {
    /// Stack id
    pub id: StackId,
    /// Stack name
    pub name: String,
    /// Declared stack type
    pub stack_type: StackType,
    /// Lifecycle state
    pub status: StackStatus,
    /// Reason of the last failure
    pub status_reason: Option<String>,
    /// Outputs; values not available yet render as empty strings
    pub outputs: BTreeMap<String, Value>,
    /// Number of actions
    pub action_count: usize,
    /// Actions in creation order
    pub actions: Vec<ActionSummary>,
    /// Number of linked backing resources
    pub resource_count: usize,
    /// Linked backing resources
    pub resources: Vec<ResourceId>,
    /// Stack-to-stack links leaving this stack
    pub links: Vec<Edge>,
    /// Attribute bag
    pub attributes: Map<String, Value>,
}

/// Create, import, update, operate on and delete stacks
#[derive(Clone)]
pub struct StackService {
    deps: StackServiceDeps,
}

impl StackService {
    /// Create a stack service
    pub fn new(deps: StackServiceDeps) -> Self {
        Self { deps }
    }

    /// The compiler in use
    pub fn compiler(&self) -> &WorkflowCompiler {
        &self.deps.compiler
    }

    /// Compile a new stack and submit its create workflow
    #[instrument(skip(self, definition), fields(stack = %definition.name))]
    pub async fn create(&self, definition: &StackDefinition) -> Result<(Stack, Job), CoreError> {
        self.ensure_name_free(&definition.name).await?;
        let compiled = self.deps.compiler.compile_for_create(definition)?;
        self.persist_new(compiled).await
    }

    /// Like create, but bind `action` to an existing resource
    #[instrument(skip(self, definition), fields(stack = %definition.name))]
    pub async fn import(
        &self,
        definition: &StackDefinition,
        action: &str,
        resource_id: ResourceId,
    ) -> Result<(Stack, Job), CoreError> {
        self.ensure_name_free(&definition.name).await?;
        let compiled = self
            .deps
            .compiler
            .compile_for_import(definition, action, resource_id)?;
        self.persist_new(compiled).await
    }

    /// Append actions to an ACTIVE stack
    #[instrument(skip(self, update))]
    pub async fn update(&self, stack_id: &StackId, update: &UpdateDefinition) -> Result<Job, CoreError> {
        let mut stack = self.guarded_stack(stack_id).await?;
        let existing = self.deps.actions.list_for_stack(stack_id).await?;
        let compiled = self.deps.compiler.compile_for_update(&stack, &existing, update)?;

        stack.begin_update()?;
        self.deps.stacks.save(&stack).await?;
        self.submit(compiled.to_job()).await
    }

    /// Run a post-creation operation compiled into actions
    #[instrument(skip(self, operation))]
    pub async fn run_operation(
        &self,
        stack_id: &StackId,
        operation: &UpdateDefinition,
    ) -> Result<Job, CoreError> {
        let stack = self.guarded_stack(stack_id).await?;
        if !stack.is_operable() {
            return Err(CoreError::PreconditionFailed(format!(
                "Stack '{}' must be ACTIVE to run operations, current state is {:?}",
                stack.name, stack.status
            )));
        }
        let existing = self.deps.actions.list_for_stack(stack_id).await?;
        let compiled = self
            .deps
            .compiler
            .compile_for_operation(&stack, &existing, operation)?;
        self.submit(compiled.to_job()).await
    }

    /// Submit the delete workflow; `preserve` keeps every backing resource
    #[instrument(skip(self))]
    pub async fn delete(&self, stack_id: &StackId, preserve: bool) -> Result<Job, CoreError> {
        let mut stack = self.guarded_stack(stack_id).await?;
        let existing = self.deps.actions.list_for_stack(stack_id).await?;

        stack.begin_delete()?;
        self.deps.stacks.save(&stack).await?;

        let steps = self.deps.compiler.compile_for_delete(&stack, &existing);
        let params = ParamBag::new().with(PRESERVE_PARAM, preserve);
        self.submit(Job::new(stack.id.clone(), WorkflowKind::Delete, steps, params))
            .await
    }

    /// Read-only projection of a stack
    pub async fn info(&self, stack_id: &StackId) -> Result<StackInfo, CoreError> {
        let stack = self.load(stack_id).await?;
        let actions = self.deps.actions.list_for_stack(stack_id).await?;
        let resources = self.deps.topology.resources_of(stack_id).await?;
        let links = self.deps.topology.links_of(stack_id).await?;

        let outputs = stack
            .outputs
            .iter()
            .map(|(name, value)| (name.clone(), render_output(value)))
            .collect();

        Ok(StackInfo {
            id: stack.id.clone(),
            name: stack.name.clone(),
            stack_type: stack.stack_type,
            status: stack.status,
            status_reason: stack.status_reason.clone(),
            outputs,
            action_count: actions.len(),
            actions: actions.iter().map(summarize).collect(),
            resource_count: resources.len(),
            resources,
            links,
            attributes: stack.attributes,
        })
    }

    /// Load a stack
    pub async fn load(&self, stack_id: &StackId) -> Result<Stack, CoreError> {
        self.deps
            .stacks
            .find_by_id(stack_id)
            .await?
            .ok_or_else(|| CoreError::StackNotFound(stack_id.0.clone()))
    }

    /// Find a stack by its unique name
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Stack>, CoreError> {
        self.deps.stacks.find_by_name(name).await
    }

    /// Actions of a stack in creation order
    pub async fn actions(&self, stack_id: &StackId) -> Result<Vec<Action>, CoreError> {
        self.deps.actions.list_for_stack(stack_id).await
    }

    /// Load a stack, rejecting it while another job is in flight
    pub async fn guarded_stack(&self, stack_id: &StackId) -> Result<Stack, CoreError> {
        let stack = self.load(stack_id).await?;
        if let Some(job) = self.deps.jobs.find_active_for_stack(stack_id).await? {
            return Err(CoreError::PreconditionFailed(format!(
                "Stack '{}' already has {} job {} in progress",
                stack.name, job.kind, job.id
            )));
        }
        Ok(stack)
    }

    async fn ensure_name_free(&self, name: &str) -> Result<(), CoreError> {
        if self.deps.stacks.find_by_name(name).await?.is_some() {
            return Err(CoreError::ValidationError(format!(
                "Stack '{}' already exists",
                name
            )));
        }
        Ok(())
    }

    async fn persist_new(&self, compiled: CompiledWorkflow) -> Result<(Stack, Job), CoreError> {
        self.deps.stacks.save(&compiled.stack).await?;
        let job = self.submit(compiled.to_job()).await?;
        info!(stack = %compiled.stack.name, job = %job.id, kind = %job.kind, "Stack workflow submitted");
        Ok((compiled.stack, job))
    }

    async fn submit(&self, job: Job) -> Result<Job, CoreError> {
        self.deps.jobs.save(&job).await?;
        Ok(job)
    }
}

fn render_output(value: &Value) -> Value {
    if reference::is_unresolved(value) || reference::has_runtime_references(value) {
        Value::String(String::new())
    } else {
        value.clone()
    }
}

fn summarize(action: &Action) -> ActionSummary {
    let operation = match &action.descriptor {
        ResourceDescriptor::Create { resource_type } => format!("create {}", resource_type),
        other => other.operation().to_string(),
    };
    ActionSummary {
        name: action.name.clone(),
        description: action.description.clone(),
        operation,
        status: action.status,
        resource_id: action.resource_id.clone(),
    }
}
