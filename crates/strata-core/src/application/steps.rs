//! Step implementations.
//!
//! Every step loads what it needs from the repositories and the parameter
//! bag it is handed, so any worker can run any step of any job.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

use crate::application::compiler::{ACTIONS_PARAM, PRESERVE_PARAM};
use crate::application::resolver::ReferenceResolver;
use crate::application::topology::TopologyService;
use crate::application::waiter::NestedJobWaiter;
use crate::backend::{OperationResult, ResourceBackend, DELETE_OPERATION};
use crate::domain::action::{Action, ActionStatus, ResourceDescriptor};
use crate::domain::job::Job;
use crate::domain::reference;
use crate::domain::repository::{ActionRepository, StackRepository};
use crate::domain::stack::{Stack, StackId, StackStatus};
use crate::domain::step::{Step, StepContext, StepOutcome, WorkflowKind};
use crate::{CoreError, ParamBag, ResourceId};

/// Parameter naming the target of an operation action
pub const RESOURCE_ID_PARAM: &str = "resource_id";

/// Executes individual steps for the job runner
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Run one step and return the updated bag
    async fn run_step(&self, ctx: &StepContext, step: &Step) -> Result<StepOutcome, CoreError>;

    /// Called once after a job failed
    async fn on_job_failed(&self, job: &Job, error: &CoreError) -> Result<(), CoreError>;
}

/// The step catalogue for stack workflows
#[derive(Clone)]
pub struct WorkflowSteps {
    stacks: Arc<dyn StackRepository>,
    actions: Arc<dyn ActionRepository>,
    backend: Arc<dyn ResourceBackend>,
    resolver: ReferenceResolver,
    waiter: NestedJobWaiter,
    topology: TopologyService,
}

impl WorkflowSteps {
    /// Create the step catalogue
    pub fn new(
        stacks: Arc<dyn StackRepository>,
        actions: Arc<dyn ActionRepository>,
        backend: Arc<dyn ResourceBackend>,
        waiter: NestedJobWaiter,
        topology: TopologyService,
    ) -> Self {
        let resolver = ReferenceResolver::new(actions.clone(), backend.clone());
        Self {
            stacks,
            actions,
            backend,
            resolver,
            waiter,
            topology,
        }
    }

    async fn load_stack(&self, id: &StackId) -> Result<Stack, CoreError> {
        self.stacks
            .find_by_id(id)
            .await?
            .ok_or_else(|| CoreError::StackNotFound(id.0.clone()))
    }

    async fn pre(&self, ctx: &StepContext, workflow: WorkflowKind) -> Result<StepOutcome, CoreError> {
        let mut stack = self.load_stack(&ctx.stack_id).await?;
        let expected = match workflow {
            WorkflowKind::Create | WorkflowKind::Import => {
                stack.begin_build()?;
                self.stacks.save(&stack).await?;
                StackStatus::Building
            }
            WorkflowKind::Update => StackStatus::Updating,
            WorkflowKind::Delete => StackStatus::Deleting,
            WorkflowKind::Operation => StackStatus::Active,
        };
        if stack.status != expected {
            return Err(CoreError::PreconditionFailed(format!(
                "Stack '{}' must be {:?} to run a {} workflow, found {:?}",
                stack.name, expected, workflow, stack.status
            )));
        }

        Ok(StepOutcome::unchanged(&ctx.params)
            .with_result(json!({"stack": stack.name, "workflow": workflow.as_str()}))
            .with_progress(format!("Starting {} workflow for stack {}", workflow, stack.name)))
    }

    async fn materialize_actions(&self, ctx: &StepContext) -> Result<StepOutcome, CoreError> {
        let compiled: Vec<Action> = ctx.params.get_as(ACTIONS_PARAM)?.unwrap_or_default();
        let mut created = 0;
        for action in &compiled {
            if action.stack_id != ctx.stack_id {
                return Err(CoreError::ValidationError(format!(
                    "Action '{}' belongs to another stack",
                    action.name
                )));
            }
            if self
                .actions
                .find_by_name(&ctx.stack_id, &action.name)
                .await?
                .is_none()
            {
                self.actions.save(action).await?;
                created += 1;
            }
        }

        let mut params = ctx.params.clone();
        params.remove(ACTIONS_PARAM);
        Ok(StepOutcome {
            params,
            result: json!({"actions": compiled.len(), "created": created}),
            progress: vec![format!(
                "Materialized {} actions ({} new)",
                compiled.len(),
                created
            )],
        })
    }

    #[instrument(skip(self, ctx), fields(job = %ctx.job_id, stack = %ctx.stack_id))]
    async fn run_action(&self, ctx: &StepContext, name: &str) -> Result<StepOutcome, CoreError> {
        let stack = self.load_stack(&ctx.stack_id).await?;
        let mut action = self
            .actions
            .find_by_name(&stack.id, name)
            .await?
            .ok_or_else(|| CoreError::ActionNotFound(name.to_string()))?;

        if action.status == ActionStatus::Active {
            debug!(action = %action.name, "Action already active, skipping");
            return Ok(StepOutcome::unchanged(&ctx.params)
                .with_result(json!({"resource_id": action.resource_id}))
                .with_progress(format!("Action {} already active", action.name)));
        }

        action.start()?;
        self.actions.save(&action).await?;
        info!(action = %action.name, operation = action.descriptor.operation(), "Running action");

        match self.execute_action(&stack, &mut action).await {
            Ok(result) => {
                action.complete()?;
                self.actions.save(&action).await?;
                Ok(StepOutcome::unchanged(&ctx.params)
                    .with_result(result)
                    .with_progress(format!("Action {} is active", action.name)))
            }
            Err(e) => {
                warn!(action = %action.name, error = %e, "Action failed");
                action.fail(e.to_string())?;
                self.actions.save(&action).await?;
                Err(e)
            }
        }
    }

    async fn execute_action(&self, stack: &Stack, action: &mut Action) -> Result<Value, CoreError> {
        match action.descriptor.clone() {
            ResourceDescriptor::Create { resource_type } => {
                // Re-entry after a crash: the resource exists, only the wait is left
                if let Some(resource_id) = action.resource_id.clone() {
                    if let Some(job) = action.nested_job.clone() {
                        self.waiter.wait(&job).await?;
                    }
                    return Ok(json!({"resource_id": resource_id}));
                }

                let params = self.resolver.resolve_params(stack, &action.params).await?;
                let provisioned = self
                    .backend
                    .create(&resource_type, &params)
                    .await
                    .map_err(|e| with_action_context(e.into(), action))?;

                action.bind_resource(provisioned.resource_id.clone(), provisioned.job.clone());
                self.actions.save(action).await?;
                self.topology
                    .link_resource(&stack.id, &provisioned.resource_id)
                    .await?;
                info!(action = %action.name, resource = %provisioned.resource_id, "Resource created");

                if let Some(job) = provisioned.job {
                    self.waiter.wait(&job).await?;
                }
                Ok(json!({"resource_id": provisioned.resource_id}))
            }
            ResourceDescriptor::Import { resource_id } => {
                self.backend
                    .get(&resource_id)
                    .await
                    .map_err(|e| with_action_context(e.into(), action))?;
                action.bind_resource(resource_id.clone(), None);
                self.actions.save(action).await?;
                self.topology.link_resource(&stack.id, &resource_id).await?;
                info!(action = %action.name, resource = %resource_id, "Resource imported");
                Ok(json!({"resource_id": resource_id}))
            }
            ResourceDescriptor::Operation {
                operation,
                resource_id,
            } => {
                let mut params = self.resolver.resolve_params(stack, &action.params).await?;
                let from_params = params
                    .remove(RESOURCE_ID_PARAM)
                    .and_then(|v| v.as_str().map(ResourceId::new));
                let target = resource_id
                    .or(from_params)
                    .or_else(|| action.resource_id.clone())
                    .ok_or_else(|| {
                        CoreError::ValidationError(format!(
                            "Action '{}' has no target resource for operation '{}'",
                            action.name, operation
                        ))
                    })?;

                let capabilities = self.backend.capabilities(&target).await?;
                if !capabilities.iter().any(|c| c == &operation) {
                    return Err(CoreError::unsupported(
                        operation,
                        format!("resource {} (action {})", target, action.name),
                    ));
                }

                action.bind_resource(target.clone(), None);
                self.actions.save(action).await?;

                let result = self
                    .backend
                    .invoke(&target, &operation, &params)
                    .await
                    .map_err(|e| with_action_context(e.into(), action))?;
                match result {
                    OperationResult::Completed(value) => Ok(value),
                    OperationResult::Job(job) => {
                        self.waiter.wait(&job).await?;
                        Ok(json!({"resource_id": target, "job": job.id}))
                    }
                }
            }
        }
    }

    async fn resolve_outputs(&self, ctx: &StepContext) -> Result<StepOutcome, CoreError> {
        let mut stack = self.load_stack(&ctx.stack_id).await?;
        let mut pending = 0;
        for (name, value) in stack.outputs.clone() {
            if !reference::has_runtime_references(&value) {
                continue;
            }
            let resolved = self.resolver.resolve_lenient(&stack, &value).await?;
            if reference::has_runtime_references(&resolved) {
                pending += 1;
                debug!(stack = %stack.name, output = %name, "Output not available yet");
            }
            stack.outputs.insert(name, resolved);
        }
        stack.update_timestamp();
        self.stacks.save(&stack).await?;

        let outputs = serde_json::to_value(&stack.outputs)?;
        Ok(StepOutcome::unchanged(&ctx.params)
            .with_result(outputs)
            .with_progress(format!(
                "Resolved outputs for stack {} ({} pending)",
                stack.name, pending
            )))
    }

    async fn set_attributes(
        &self,
        ctx: &StepContext,
        patch: &serde_json::Map<String, Value>,
    ) -> Result<StepOutcome, CoreError> {
        let mut stack = self.load_stack(&ctx.stack_id).await?;
        stack.merge_attributes(patch);
        self.stacks.save(&stack).await?;
        let keys: Vec<&String> = patch.keys().collect();
        Ok(StepOutcome::unchanged(&ctx.params)
            .with_result(Value::Object(patch.clone()))
            .with_progress(format!("Updated attributes {:?} on stack {}", keys, stack.name)))
    }

    async fn link(&self, ctx: &StepContext, step: &Step) -> Result<StepOutcome, CoreError> {
        let (master, kind, add) = match step {
            Step::LinkStacks { master, kind } => (master, *kind, true),
            Step::UnlinkStacks { master, kind } => (master, *kind, false),
            _ => return Err(CoreError::ValidationError(format!("Not a link step: {}", step))),
        };
        let count = if add {
            self.load_stack(master).await?;
            self.topology.add_link(&ctx.stack_id, master, kind).await?
        } else {
            self.topology.remove_link(&ctx.stack_id, master, kind).await?
        };
        let verb = if add { "Linked" } else { "Unlinked" };
        Ok(StepOutcome::unchanged(&ctx.params)
            .with_result(json!({"edges": count}))
            .with_progress(format!("{} stack {} and {} ({:?})", verb, ctx.stack_id, master, kind)))
    }

    #[instrument(skip(self, ctx), fields(job = %ctx.job_id, stack = %ctx.stack_id))]
    async fn expunge_action(&self, ctx: &StepContext, name: &str) -> Result<StepOutcome, CoreError> {
        let Some(mut action) = self.actions.find_by_name(&ctx.stack_id, name).await? else {
            return Ok(StepOutcome::unchanged(&ctx.params)
                .with_progress(format!("Action {} already removed", name)));
        };

        action.begin_expunge();
        self.actions.save(&action).await?;

        let preserve = ctx.params.flag(PRESERVE_PARAM) || action.preserve;
        let mut progress = Vec::new();

        if let (true, Some(resource_id)) = (action.descriptor.creates_resource(), action.resource_id.clone()) {
            if preserve {
                progress.push(format!("Preserving resource {} of action {}", resource_id, name));
            } else {
                self.delete_resource(&resource_id, name).await?;
                progress.push(format!("Deleted resource {} of action {}", resource_id, name));
            }
            self.topology.unlink_resource(&ctx.stack_id, &resource_id).await?;
        }

        self.actions.delete(&ctx.stack_id, name).await?;
        progress.push(format!("Expunged action {}", name));

        Ok(StepOutcome {
            params: ctx.params.clone(),
            result: json!({"action": name, "resource_id": action.resource_id, "preserved": preserve}),
            progress,
        })
    }

    async fn delete_resource(&self, resource_id: &ResourceId, action: &str) -> Result<(), CoreError> {
        match self
            .backend
            .invoke(resource_id, DELETE_OPERATION, &ParamBag::new())
            .await
        {
            Ok(OperationResult::Completed(_)) => Ok(()),
            Ok(OperationResult::Job(job)) => self.waiter.wait(&job).await,
            Err(e) if e.is_not_found() => {
                warn!(resource = %resource_id, action, "Resource already absent during teardown");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn unlink_topology(&self, ctx: &StepContext) -> Result<StepOutcome, CoreError> {
        let removed = self.topology.remove_all(&ctx.stack_id).await?;
        Ok(StepOutcome::unchanged(&ctx.params)
            .with_result(json!({"edges": removed}))
            .with_progress(format!("Removed {} topology edges", removed)))
    }

    async fn release_stack(&self, ctx: &StepContext) -> Result<StepOutcome, CoreError> {
        let mut stack = self.load_stack(&ctx.stack_id).await?;
        let mut released = 0;
        for resource in self.topology.resources_of(&stack.id).await? {
            released += self.topology.unlink_resource(&stack.id, &resource).await?;
        }
        stack.mark_deleted()?;
        self.stacks.save(&stack).await?;
        Ok(StepOutcome::unchanged(&ctx.params)
            .with_result(json!({"released_links": released}))
            .with_progress(format!("Released stack {}", stack.name)))
    }

    async fn post(&self, ctx: &StepContext, workflow: WorkflowKind) -> Result<StepOutcome, CoreError> {
        let message = match workflow {
            WorkflowKind::Delete => {
                self.stacks.delete(&ctx.stack_id).await?;
                format!("Stack {} deleted", ctx.stack_id)
            }
            WorkflowKind::Operation => {
                let mut stack = self.load_stack(&ctx.stack_id).await?;
                stack.update_timestamp();
                self.stacks.save(&stack).await?;
                format!("Operation finished on stack {}", stack.name)
            }
            WorkflowKind::Create | WorkflowKind::Import | WorkflowKind::Update => {
                let mut stack = self.load_stack(&ctx.stack_id).await?;
                stack.mark_active()?;
                self.stacks.save(&stack).await?;
                format!("Stack {} is active", stack.name)
            }
        };
        Ok(StepOutcome::unchanged(&ctx.params)
            .with_result(json!({"workflow": workflow.as_str()}))
            .with_progress(message))
    }
}

#[async_trait]
impl StepHandler for WorkflowSteps {
    async fn run_step(&self, ctx: &StepContext, step: &Step) -> Result<StepOutcome, CoreError> {
        match step {
            Step::Pre { workflow } => self.pre(ctx, *workflow).await,
            Step::MaterializeActions => self.materialize_actions(ctx).await,
            Step::RunAction { action } => self.run_action(ctx, action).await,
            Step::ResolveOutputs => self.resolve_outputs(ctx).await,
            Step::SetAttributes { patch } => self.set_attributes(ctx, patch).await,
            Step::LinkStacks { .. } | Step::UnlinkStacks { .. } => self.link(ctx, step).await,
            Step::ExpungeAction { action } => self.expunge_action(ctx, action).await,
            Step::UnlinkTopology => self.unlink_topology(ctx).await,
            Step::ReleaseStack => self.release_stack(ctx).await,
            Step::Post { workflow } => self.post(ctx, *workflow).await,
        }
    }

    async fn on_job_failed(&self, job: &Job, error: &CoreError) -> Result<(), CoreError> {
        // Operation failures leave the stack operable
        if job.kind == WorkflowKind::Operation {
            return Ok(());
        }
        match self.stacks.find_by_id(&job.stack_id).await? {
            Some(mut stack) => {
                stack.mark_error(format!("{} workflow failed: {}", job.kind, error));
                self.stacks.save(&stack).await
            }
            None => Ok(()),
        }
    }
}

fn with_action_context(error: CoreError, action: &Action) -> CoreError {
    match error {
        CoreError::BackendError {
            resource,
            operation,
            message,
        } => CoreError::BackendError {
            resource,
            operation,
            message: format!("{} (action {})", message, action.name),
        },
        other => other,
    }
}
