//! SQL stack service.
//!
//! Front door of the engine specialisation layer: validates SQL requests,
//! builds their action lists and hands the result to the core
//! [`StackService`]. Every mutating call returns the submitted job; running
//! it is left to the caller's `JobRunner`.

use futures::future;
use serde_json::Value;
use std::sync::Arc;
use strata_core::domain::reference;
use strata_core::{
    Action, CoreError, EngineConfig, Job, ParamBag, ResourceBackend, ResourceId, Stack, StackId,
    StackService, StackStatus, StackType,
};
use tracing::{debug, info, instrument, warn};

use crate::attributes::SqlAttributes;
use crate::builder::{builder_for, stack_definition, INSTANCE_ACTION};
use crate::catalog::Catalog;
use crate::context::{derive_context, rederive_context, ReplicaSource, SqlRequest};
use crate::detail::{SqlDetail, SqlStackDetail};
use crate::error::{EngineError, EngineResult};
use crate::operations::{check_instance_state, OperationRequest, OperationTable, SqlOperation};
use crate::update::{plan_replication_update, ReplicationChange};

/// Create and operate SQL stacks
#[derive(Clone)]
pub struct SqlStackService {
    core: StackService,
    catalog: Arc<dyn Catalog>,
    backend: Arc<dyn ResourceBackend>,
    config: EngineConfig,
}

impl SqlStackService {
    /// Create a SQL stack service
    pub fn new(
        core: StackService,
        catalog: Arc<dyn Catalog>,
        backend: Arc<dyn ResourceBackend>,
        config: EngineConfig,
    ) -> Self {
        Self {
            core,
            catalog,
            backend,
            config,
        }
    }

    /// The core stack service
    pub fn core(&self) -> &StackService {
        &self.core
    }

    /// Validate a request and submit the create workflow of a new SQL stack
    #[instrument(skip(self, request), fields(stack = %request.name, engine = %request.engine))]
    pub async fn create(&self, request: SqlRequest) -> EngineResult<(Stack, Job)> {
        let replica = match &request.replica_of {
            Some(master) => Some(self.replica_source(master, &request).await?),
            None => None,
        };

        let ctx = derive_context(&request, replica, self.catalog.as_ref(), &self.config).await?;
        let definition = stack_definition(&ctx, builder_for(ctx.profile.kind))?;
        debug!(actions = definition.actions.len(), "Built SQL stack definition");

        let (stack, job) = self.core.create(&definition).await?;
        info!(stack = %stack.name, version = %ctx.version, job = %job.id, "SQL stack submitted");
        Ok((stack, job))
    }

    /// Change the replication role of an existing stack
    #[instrument(skip(self))]
    pub async fn update_replication(
        &self,
        stack_id: &StackId,
        change: ReplicationChange,
    ) -> EngineResult<Job> {
        let stack = self.core.guarded_stack(stack_id).await?;
        let attrs = SqlAttributes::from_stack(&stack)?;

        let replica = match &change {
            ReplicationChange::ReplicateFrom(master_id) => {
                let master = self.core.load(master_id).await?;
                Some(self.master_source(&master, &attrs.to_request(&stack.name))?)
            }
            _ => None,
        };

        let ctx = rederive_context(&stack, &attrs, replica, self.catalog.as_ref(), &self.config)
            .await?;
        let existing = self.core.actions(stack_id).await?;
        let update = plan_replication_update(&stack, &attrs, &ctx, &change, existing.len())?;

        Ok(self.core.update(stack_id, &update).await?)
    }

    /// Run a named operation from the engine's catalogue
    ///
    /// Unknown and unsupported names fail before the backend is contacted.
    #[instrument(skip(self, params))]
    pub async fn run_operation(
        &self,
        stack_id: &StackId,
        name: &str,
        params: ParamBag,
    ) -> EngineResult<Job> {
        let stack = self.core.load(stack_id).await?;
        let attrs = SqlAttributes::from_stack(&stack)?;
        let (operation, entry) = OperationTable::for_engine(attrs.engine).resolve(name)?;

        let actions = self.core.actions(stack_id).await?;
        let instance_id = instance_resource(&stack, &actions)?;
        let instance = self
            .backend
            .get(&instance_id)
            .await
            .map_err(CoreError::from)?;
        check_instance_state(&stack, operation, entry.required, &instance)?;

        let request = OperationRequest {
            stack: &stack,
            attrs: &attrs,
            params: &params,
            instance: &instance,
            existing_actions: actions.len(),
        };
        let update = entry.build(operation, &request)?;
        debug!(operation = %operation, actions = update.actions.len(), "Built operation");

        Ok(self.core.run_operation(stack_id, &update).await?)
    }

    /// Grow the data storage of a stack to `size_gb`
    pub async fn grow(&self, stack_id: &StackId, size_gb: u64) -> EngineResult<Job> {
        self.run_operation(
            stack_id,
            SqlOperation::ResizeStorage.as_str(),
            ParamBag::new().with("size_gb", size_gb),
        )
        .await
    }

    /// Operations the stack's engine offers
    pub async fn operations(&self, stack_id: &StackId) -> EngineResult<Vec<SqlOperation>> {
        let stack = self.core.load(stack_id).await?;
        let attrs = SqlAttributes::from_stack(&stack)?;
        Ok(OperationTable::for_engine(attrs.engine).operations())
    }

    /// Generic projection plus the SQL view of a stack
    pub async fn detail(&self, stack_id: &StackId) -> EngineResult<SqlStackDetail> {
        let stack = self.core.load(stack_id).await?;
        let attrs = SqlAttributes::from_stack(&stack)?;
        let actions = self.core.actions(stack_id).await?;

        let (info, instance) =
            future::join(self.core.info(stack_id), self.instance_detail(&stack, &actions)).await;

        let info = info?;
        let sql = SqlDetail::project(&attrs, &info.links, instance.as_ref());
        Ok(SqlStackDetail { info, sql })
    }

    /// Submit the delete workflow
    pub async fn delete(&self, stack_id: &StackId, preserve: bool) -> EngineResult<Job> {
        Ok(self.core.delete(stack_id, preserve).await?)
    }

    async fn instance_detail(&self, stack: &Stack, actions: &[Action]) -> Option<Value> {
        let id = instance_resource(stack, actions).ok()?;
        match self.backend.get(&id).await {
            Ok(detail) => Some(detail),
            Err(err) => {
                warn!(stack = %stack.name, resource = %id, error = %err, "Instance detail unavailable");
                None
            }
        }
    }

    async fn replica_source(&self, master: &str, request: &SqlRequest) -> EngineResult<ReplicaSource> {
        let master = self
            .core
            .find_by_name(master)
            .await?
            .ok_or_else(|| CoreError::StackNotFound(master.to_string()))?;
        self.master_source(&master, request)
    }

    fn master_source(&self, master: &Stack, request: &SqlRequest) -> EngineResult<ReplicaSource> {
        if master.stack_type != StackType::Sql {
            return Err(EngineError::InvalidRequest(format!(
                "Stack '{}' is not a SQL stack",
                master.name
            )));
        }
        if master.status != StackStatus::Active {
            return Err(CoreError::PreconditionFailed(format!(
                "Master stack '{}' must be ACTIVE, current state is {:?}",
                master.name, master.status
            ))
            .into());
        }
        let attrs = SqlAttributes::from_stack(master)?;
        if attrs.engine != request.engine {
            return Err(EngineError::InvalidRequest(format!(
                "Master stack '{}' runs {}, cannot replicate to {}",
                master.name, attrs.engine, request.engine
            )));
        }
        let host = master
            .outputs
            .get("address")
            .filter(|v| !reference::is_unresolved(v) && !reference::has_runtime_references(v))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                EngineError::Core(CoreError::PreconditionFailed(format!(
                    "Master stack '{}' does not expose an address yet",
                    master.name
                )))
            })?;
        Ok(ReplicaSource::from_master(master, &attrs, host.to_string()))
    }
}

fn instance_resource(stack: &Stack, actions: &[Action]) -> EngineResult<ResourceId> {
    actions
        .iter()
        .find(|a| a.short_name == INSTANCE_ACTION)
        .and_then(|a| a.resource_id.clone())
        .ok_or_else(|| {
            CoreError::PreconditionFailed(format!(
                "Stack '{}' has no provisioned instance",
                stack.name
            ))
            .into()
        })
}
