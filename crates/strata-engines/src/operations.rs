//! Post-creation operation catalogue.
//!
//! Each engine has a table from [`SqlOperation`] to the instance state the
//! operation needs and a function building the actions that carry it out.
//! Names an engine does not list are rejected as unsupported before any
//! backend call.

use once_cell::sync::Lazy;
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::fmt;
use strata_core::{CoreError, ParamBag, Stack, Step, UpdateDefinition};

use crate::attributes::{SqlAttributes, LOAD_BALANCER_KEY, LOG_SHIPPING_KEY, MONITORING_KEY};
use crate::builder::{instance_operation, playbook};
use crate::error::{EngineError, EngineResult};
use crate::growth::plan_growth;
use crate::profile::{profile, EngineKind};

/// Operations offered on existing SQL stacks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlOperation {
    /// Start a stopped instance
    Start,
    /// Stop a running instance
    Stop,
    /// Restart a running instance
    Restart,
    /// Create a logical database
    CreateDatabase,
    /// Drop a logical database
    DropDatabase,
    /// Create an account
    CreateUser,
    /// Drop an account
    DropUser,
    /// Change account attributes
    AlterUser,
    /// Grant privileges
    GrantPrivileges,
    /// Revoke privileges
    RevokePrivileges,
    /// Change an account password
    ChangePassword,
    /// Install an extension
    InstallExtension,
    /// Grow the data storage
    ResizeStorage,
    /// Install the monitoring agent
    EnableMonitoring,
    /// Remove the monitoring agent
    DisableMonitoring,
    /// Ship engine logs
    EnableLogShipping,
    /// Stop shipping engine logs
    DisableLogShipping,
    /// Register with a load balancer
    RegisterLoadBalancer,
    /// Deregister from the load balancer
    DeregisterLoadBalancer,
}

impl SqlOperation {
    /// Every operation
    pub const ALL: [SqlOperation; 19] = [
        SqlOperation::Start,
        SqlOperation::Stop,
        SqlOperation::Restart,
        SqlOperation::CreateDatabase,
        SqlOperation::DropDatabase,
        SqlOperation::CreateUser,
        SqlOperation::DropUser,
        SqlOperation::AlterUser,
        SqlOperation::GrantPrivileges,
        SqlOperation::RevokePrivileges,
        SqlOperation::ChangePassword,
        SqlOperation::InstallExtension,
        SqlOperation::ResizeStorage,
        SqlOperation::EnableMonitoring,
        SqlOperation::DisableMonitoring,
        SqlOperation::EnableLogShipping,
        SqlOperation::DisableLogShipping,
        SqlOperation::RegisterLoadBalancer,
        SqlOperation::DeregisterLoadBalancer,
    ];

    /// Snake case name
    pub fn as_str(&self) -> &'static str {
        match self {
            SqlOperation::Start => "start",
            SqlOperation::Stop => "stop",
            SqlOperation::Restart => "restart",
            SqlOperation::CreateDatabase => "create_database",
            SqlOperation::DropDatabase => "drop_database",
            SqlOperation::CreateUser => "create_user",
            SqlOperation::DropUser => "drop_user",
            SqlOperation::AlterUser => "alter_user",
            SqlOperation::GrantPrivileges => "grant_privileges",
            SqlOperation::RevokePrivileges => "revoke_privileges",
            SqlOperation::ChangePassword => "change_password",
            SqlOperation::InstallExtension => "install_extension",
            SqlOperation::ResizeStorage => "resize_storage",
            SqlOperation::EnableMonitoring => "enable_monitoring",
            SqlOperation::DisableMonitoring => "disable_monitoring",
            SqlOperation::EnableLogShipping => "enable_log_shipping",
            SqlOperation::DisableLogShipping => "disable_log_shipping",
            SqlOperation::RegisterLoadBalancer => "register_load_balancer",
            SqlOperation::DeregisterLoadBalancer => "deregister_load_balancer",
        }
    }

    /// Operation by name; dashes and underscores are interchangeable
    pub fn lookup(name: &str) -> Option<Self> {
        let normalized = name.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL.into_iter().find(|op| op.as_str() == normalized)
    }
}

impl fmt::Display for SqlOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Instance state an operation requires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Instance must be running
    Running,
    /// Instance must be stopped
    Stopped,
}

impl InstanceState {
    /// Status string reported by the backend
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Running => "running",
            InstanceState::Stopped => "stopped",
        }
    }
}

/// Everything an operation builder reads
#[derive(Debug, Clone, Copy)]
pub struct OperationRequest<'a> {
    /// Target stack
    pub stack: &'a Stack,
    /// Its persisted attributes
    pub attrs: &'a SqlAttributes,
    /// Caller parameters
    pub params: &'a ParamBag,
    /// Detail tree of the stack's instance
    pub instance: &'a Value,
    /// Number of actions the stack already has
    pub existing_actions: usize,
}

impl<'a> OperationRequest<'a> {
    fn required_str(&self, key: &str, operation: SqlOperation) -> EngineResult<String> {
        self.params
            .get_str(key)
            .filter(|v| !v.is_empty())
            .map(str::to_string)
            .ok_or_else(|| {
                CoreError::ValidationError(format!(
                    "Operation '{}' requires parameter '{}'",
                    operation, key
                ))
                .into()
            })
    }

    fn action_name(&self, operation: SqlOperation) -> String {
        format!("{}-{}", operation.as_str().replace('_', "-"), self.existing_actions)
    }

    fn admin_task(&self, operation: SqlOperation, vars: Value) -> UpdateDefinition {
        let playbook_name = format!("{}_admin", self.attrs.engine);
        let mut task = Map::new();
        task.insert("task".to_string(), json!(operation.as_str()));
        task.insert("port".to_string(), json!(self.attrs.port));
        task.insert("login_user".to_string(), json!(self.attrs.admin_user));
        task.insert("login_password".to_string(), json!(self.attrs.admin_password));
        if let Value::Object(vars) = vars {
            task.extend(vars);
        }
        UpdateDefinition::default().with_action(playbook(
            &self.action_name(operation),
            &playbook_name,
            Value::Object(task),
        ))
    }
}

type BuildFn = fn(SqlOperation, &OperationRequest<'_>) -> EngineResult<UpdateDefinition>;

/// One row of an engine's operation table
#[derive(Clone, Copy)]
pub struct OperationEntry {
    /// State the instance must be in
    pub required: InstanceState,
    build: BuildFn,
}

impl fmt::Debug for OperationEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationEntry")
            .field("required", &self.required)
            .finish()
    }
}

impl OperationEntry {
    /// Build the actions carrying out the operation
    pub fn build(&self, operation: SqlOperation, request: &OperationRequest<'_>) -> EngineResult<UpdateDefinition> {
        (self.build)(operation, request)
    }
}

/// Operation table of one engine
#[derive(Debug)]
pub struct OperationTable {
    engine: EngineKind,
    entries: HashMap<SqlOperation, OperationEntry>,
}

static MYSQL_TABLE: Lazy<OperationTable> = Lazy::new(|| {
    OperationTable::common(EngineKind::MySql)
        .with(SqlOperation::EnableLogShipping, InstanceState::Running, log_shipping)
        .with(SqlOperation::DisableLogShipping, InstanceState::Running, log_shipping)
});

static POSTGRESQL_TABLE: Lazy<OperationTable> = Lazy::new(|| {
    OperationTable::common(EngineKind::PostgreSql)
        .with(SqlOperation::InstallExtension, InstanceState::Running, install_extension)
        .with(SqlOperation::EnableLogShipping, InstanceState::Running, log_shipping)
        .with(SqlOperation::DisableLogShipping, InstanceState::Running, log_shipping)
});

static SQLSERVER_TABLE: Lazy<OperationTable> = Lazy::new(|| OperationTable::common(EngineKind::SqlServer));

impl OperationTable {
    /// Table of an engine
    pub fn for_engine(kind: EngineKind) -> &'static OperationTable {
        match kind {
            EngineKind::MySql => &MYSQL_TABLE,
            EngineKind::PostgreSql => &POSTGRESQL_TABLE,
            EngineKind::SqlServer => &SQLSERVER_TABLE,
        }
    }

    fn common(engine: EngineKind) -> Self {
        Self {
            engine,
            entries: HashMap::new(),
        }
        .with(SqlOperation::Start, InstanceState::Stopped, power)
        .with(SqlOperation::Stop, InstanceState::Running, power)
        .with(SqlOperation::Restart, InstanceState::Running, power)
        .with(SqlOperation::CreateDatabase, InstanceState::Running, database)
        .with(SqlOperation::DropDatabase, InstanceState::Running, database)
        .with(SqlOperation::CreateUser, InstanceState::Running, create_user)
        .with(SqlOperation::DropUser, InstanceState::Running, user)
        .with(SqlOperation::AlterUser, InstanceState::Running, alter_user)
        .with(SqlOperation::GrantPrivileges, InstanceState::Running, privileges)
        .with(SqlOperation::RevokePrivileges, InstanceState::Running, privileges)
        .with(SqlOperation::ChangePassword, InstanceState::Running, change_password)
        .with(SqlOperation::ResizeStorage, InstanceState::Running, resize_storage)
        .with(SqlOperation::EnableMonitoring, InstanceState::Running, monitoring)
        .with(SqlOperation::DisableMonitoring, InstanceState::Running, monitoring)
        .with(SqlOperation::RegisterLoadBalancer, InstanceState::Running, load_balancer)
        .with(SqlOperation::DeregisterLoadBalancer, InstanceState::Running, load_balancer)
    }

    fn with(mut self, operation: SqlOperation, required: InstanceState, build: BuildFn) -> Self {
        self.entries.insert(operation, OperationEntry { required, build });
        self
    }

    /// Engine of the table
    pub fn engine(&self) -> EngineKind {
        self.engine
    }

    /// Whether the engine offers the operation
    pub fn supports(&self, operation: SqlOperation) -> bool {
        self.entries.contains_key(&operation)
    }

    /// Supported operations in catalogue order
    pub fn operations(&self) -> Vec<SqlOperation> {
        SqlOperation::ALL
            .into_iter()
            .filter(|op| self.supports(*op))
            .collect()
    }

    /// Look up an operation by name; unknown or unsupported names are errors
    pub fn resolve(&self, name: &str) -> EngineResult<(SqlOperation, OperationEntry)> {
        SqlOperation::lookup(name)
            .and_then(|op| self.entries.get(&op).map(|entry| (op, *entry)))
            .ok_or_else(|| {
                EngineError::Core(CoreError::unsupported(
                    name,
                    profile(self.engine).display_name,
                ))
            })
    }
}

/// Fail unless the instance reports the required state
pub fn check_instance_state(
    stack: &Stack,
    operation: SqlOperation,
    required: InstanceState,
    instance: &Value,
) -> EngineResult<()> {
    let status = instance.get("status").and_then(Value::as_str).unwrap_or("unknown");
    if status == required.as_str() {
        return Ok(());
    }
    Err(CoreError::PreconditionFailed(format!(
        "Operation '{}' on stack '{}' requires the instance to be {}, but it is {}",
        operation,
        stack.name,
        required.as_str(),
        status
    ))
    .into())
}

fn set_attribute(update: UpdateDefinition, key: &str, value: Value) -> UpdateDefinition {
    let mut patch = Map::new();
    patch.insert(key.to_string(), value);
    update.with_additional_step(Step::SetAttributes { patch })
}

fn power(operation: SqlOperation, req: &OperationRequest<'_>) -> EngineResult<UpdateDefinition> {
    Ok(UpdateDefinition::default().with_action(
        instance_operation(&req.action_name(operation), operation.as_str(), ParamBag::new())
            .described(format!("{} instance", operation)),
    ))
}

fn database(operation: SqlOperation, req: &OperationRequest<'_>) -> EngineResult<UpdateDefinition> {
    let name = req.required_str("name", operation)?;
    Ok(req.admin_task(operation, json!({ "database": name })))
}

fn create_user(operation: SqlOperation, req: &OperationRequest<'_>) -> EngineResult<UpdateDefinition> {
    let user = req.required_str("user", operation)?;
    let password = req.required_str("password", operation)?;
    Ok(req.admin_task(
        operation,
        json!({ "user": user, "password": password, "database": req.params.get("database") }),
    ))
}

fn user(operation: SqlOperation, req: &OperationRequest<'_>) -> EngineResult<UpdateDefinition> {
    let user = req.required_str("user", operation)?;
    Ok(req.admin_task(operation, json!({ "user": user })))
}

fn alter_user(operation: SqlOperation, req: &OperationRequest<'_>) -> EngineResult<UpdateDefinition> {
    let user = req.required_str("user", operation)?;
    let attributes = req.params.get("attributes").cloned().unwrap_or_else(|| json!({}));
    Ok(req.admin_task(operation, json!({ "user": user, "attributes": attributes })))
}

fn privileges(operation: SqlOperation, req: &OperationRequest<'_>) -> EngineResult<UpdateDefinition> {
    let user = req.required_str("user", operation)?;
    let database = req.required_str("database", operation)?;
    let privileges = req
        .params
        .get("privileges")
        .filter(|p| p.as_array().map(|a| !a.is_empty()).unwrap_or(false))
        .cloned()
        .ok_or_else(|| {
            EngineError::Core(CoreError::ValidationError(format!(
                "Operation '{}' requires a non-empty 'privileges' list",
                operation
            )))
        })?;
    Ok(req.admin_task(
        operation,
        json!({ "user": user, "database": database, "privileges": privileges }),
    ))
}

fn change_password(operation: SqlOperation, req: &OperationRequest<'_>) -> EngineResult<UpdateDefinition> {
    let user = req.required_str("user", operation)?;
    let password = req.required_str("password", operation)?;
    let update = req.admin_task(operation, json!({ "user": user, "password": password }));
    // Keep the stored admin credentials usable for later operations
    if user == req.attrs.admin_user {
        return Ok(set_attribute(update, "admin_password", json!(password)));
    }
    Ok(update)
}

fn install_extension(operation: SqlOperation, req: &OperationRequest<'_>) -> EngineResult<UpdateDefinition> {
    let extension = req.required_str("extension", operation)?;
    let database = req
        .params
        .get_str("database")
        .map(str::to_string)
        .or_else(|| req.attrs.database.clone());
    let update = req.admin_task(operation, json!({ "extension": extension, "database": database }));

    let mut extensions = req.attrs.extensions.clone();
    if !extensions.contains(&extension) {
        extensions.push(extension);
    }
    Ok(set_attribute(update, "extensions", json!(extensions)))
}

fn resize_storage(operation: SqlOperation, req: &OperationRequest<'_>) -> EngineResult<UpdateDefinition> {
    let size = req
        .params
        .get("size_gb")
        .and_then(Value::as_u64)
        .ok_or_else(|| {
            EngineError::Core(CoreError::ValidationError(format!(
                "Operation '{}' requires an integer 'size_gb'",
                operation
            )))
        })?;
    plan_growth(req.stack, req.attrs, req.instance, size, req.existing_actions)
}

fn monitoring(operation: SqlOperation, req: &OperationRequest<'_>) -> EngineResult<UpdateDefinition> {
    let enable = operation == SqlOperation::EnableMonitoring;
    if req.attrs.monitoring == enable {
        return Err(CoreError::PreconditionFailed(format!(
            "Monitoring of stack '{}' is already {}",
            req.stack.name,
            if enable { "enabled" } else { "disabled" }
        ))
        .into());
    }
    let update = UpdateDefinition::default().with_action(playbook(
        &req.action_name(operation),
        "monitoring_agent",
        json!({
            "engine": req.attrs.engine,
            "port": req.attrs.port,
            "state": if enable { "present" } else { "absent" },
        }),
    ));
    Ok(set_attribute(update, MONITORING_KEY, json!(enable)))
}

fn log_shipping(operation: SqlOperation, req: &OperationRequest<'_>) -> EngineResult<UpdateDefinition> {
    let enable = operation == SqlOperation::EnableLogShipping;
    if req.attrs.log_shipping == enable {
        return Err(CoreError::PreconditionFailed(format!(
            "Log shipping of stack '{}' is already {}",
            req.stack.name,
            if enable { "enabled" } else { "disabled" }
        ))
        .into());
    }
    let update = UpdateDefinition::default().with_action(playbook(
        &req.action_name(operation),
        "log_shipping",
        json!({
            "engine": req.attrs.engine,
            "target": req.params.get("target"),
            "state": if enable { "present" } else { "absent" },
        }),
    ));
    Ok(set_attribute(update, LOG_SHIPPING_KEY, json!(enable)))
}

fn load_balancer(operation: SqlOperation, req: &OperationRequest<'_>) -> EngineResult<UpdateDefinition> {
    let register = operation == SqlOperation::RegisterLoadBalancer;
    let balancer = if register {
        req.required_str("load_balancer", operation)?
    } else {
        req.attrs.load_balancer.clone().ok_or_else(|| {
            EngineError::Core(CoreError::PreconditionFailed(format!(
                "Stack '{}' is not registered with a load balancer",
                req.stack.name
            )))
        })?
    };
    let capability = if register { "register_lb" } else { "deregister_lb" };
    let update = UpdateDefinition::default().with_action(instance_operation(
        &req.action_name(operation),
        capability,
        ParamBag::new()
            .with("load_balancer", balancer.as_str())
            .with("port", req.attrs.port),
    ));
    let value = if register { json!(balancer) } else { Value::Null };
    Ok(set_attribute(update, LOAD_BALANCER_KEY, value))
}
