//! Typed view over the attribute bag of a SQL stack.
//!
//! Everything the update and operation builders need is persisted here at
//! create time, so later workflows re-derive their context from the stack
//! instead of from fresh input.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strata_core::{Stack, StackId};

use crate::context::{ProvisioningContext, SqlRequest};
use crate::error::{EngineError, EngineResult};
use crate::profile::EngineKind;

/// Attribute toggled by the monitoring operations
pub const MONITORING_KEY: &str = "monitoring";
/// Attribute toggled by the log shipping operations
pub const LOG_SHIPPING_KEY: &str = "log_shipping";
/// Attribute written by storage growth
pub const ALLOCATED_STORAGE_KEY: &str = "allocated_storage_gb";
/// Attribute written by replication updates
pub const REPLICATION_ROLE_KEY: &str = "replication_role";
/// Master stack of a replica
pub const MASTER_KEY: &str = "master";
/// Load balancer the stack is registered with
pub const LOAD_BALANCER_KEY: &str = "load_balancer";

/// Replication role of a SQL stack
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReplicationRole {
    /// Not replicating
    #[default]
    Standalone,
    /// Source of one or more replicas
    Master,
    /// Follows a master
    Replica,
}

impl ReplicationRole {
    /// Lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            ReplicationRole::Standalone => "standalone",
            ReplicationRole::Master => "master",
            ReplicationRole::Replica => "replica",
        }
    }
}

/// Persisted SQL stack attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlAttributes {
    /// Engine
    pub engine: EngineKind,
    /// Installed version
    pub version: String,
    /// Listener port
    pub port: u16,
    /// Compute zone
    pub zone: String,
    /// Site
    pub site: String,
    /// Availability zone of the site
    pub availability_zone: String,
    /// Network
    pub network: String,
    /// Security policy
    #[serde(default)]
    pub security_policy: Option<String>,
    /// Compute flavor
    pub compute_flavor: String,
    /// Volume flavor
    pub volume_flavor: String,
    /// Size of the initial data volume
    pub data_size_gb: u64,
    /// Size of the backup volume
    #[serde(default)]
    pub backup_size_gb: Option<u64>,
    /// Total storage allocated to the stack
    pub allocated_storage_gb: u64,
    /// Administrative account
    pub admin_user: String,
    /// Administrative password
    pub admin_password: String,
    /// Application account
    #[serde(default)]
    pub app_user: Option<String>,
    /// Application password
    #[serde(default)]
    pub app_password: Option<String>,
    /// Replication account
    pub replication_user: String,
    /// Replication password
    pub replication_password: String,
    /// Initial database
    #[serde(default)]
    pub database: Option<String>,
    /// Installed extensions
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Monitoring enabled
    #[serde(default)]
    pub monitoring: bool,
    /// Log shipping enabled
    #[serde(default)]
    pub log_shipping: bool,
    /// Device of the data volume
    pub device_path: String,
    /// Mount point of the data volume
    pub data_mount: String,
    /// LVM volume group holding the data
    pub volume_group: String,
    /// LVM logical volume holding the data
    pub logical_volume: String,
    /// Replication role
    #[serde(default)]
    pub replication_role: ReplicationRole,
    /// Master stack when replicating
    #[serde(default)]
    pub master: Option<StackId>,
    /// Load balancer registration
    #[serde(default)]
    pub load_balancer: Option<String>,
}

impl SqlAttributes {
    /// Attributes recorded when the stack is created
    pub fn from_context(ctx: &ProvisioningContext) -> Self {
        let creds = &ctx.credentials;
        Self {
            engine: ctx.profile.kind,
            version: ctx.version.clone(),
            port: ctx.port,
            zone: ctx.zone.name.clone(),
            site: ctx.site.name.clone(),
            availability_zone: ctx.site.availability_zone.clone(),
            network: ctx.network.name.clone(),
            security_policy: ctx.security_policy.as_ref().map(|p| p.name.clone()),
            compute_flavor: ctx.compute_flavor.name.clone(),
            volume_flavor: ctx.volume_flavor.name.clone(),
            data_size_gb: ctx.data_size_gb,
            backup_size_gb: ctx.backup_size_gb,
            allocated_storage_gb: ctx.data_size_gb + ctx.backup_size_gb.unwrap_or(0),
            admin_user: creds.admin_user.clone(),
            admin_password: creds.admin_password.clone(),
            app_user: creds.app_user.clone(),
            app_password: creds.app_password.clone(),
            replication_user: creds.replication_user.clone(),
            replication_password: creds.replication_password.clone(),
            database: ctx.database.clone(),
            extensions: ctx.extensions.clone(),
            monitoring: ctx.monitoring,
            log_shipping: ctx.log_shipping,
            device_path: ctx.device_path.clone(),
            data_mount: ctx.profile.data_mount.to_string(),
            volume_group: ctx.volume_group.clone(),
            logical_volume: ctx.logical_volume.clone(),
            replication_role: if ctx.replica.is_some() {
                ReplicationRole::Replica
            } else {
                ReplicationRole::Standalone
            },
            master: ctx.replica.as_ref().map(|r| r.master_id.clone()),
            load_balancer: None,
        }
    }

    /// Read the attributes of an existing stack
    pub fn from_stack(stack: &Stack) -> EngineResult<Self> {
        serde_json::from_value(Value::Object(stack.attributes.clone())).map_err(|e| {
            EngineError::InvalidAttributes {
                stack: stack.name.clone(),
                message: e.to_string(),
            }
        })
    }

    /// Attribute bag to store on the stack
    pub fn to_map(&self) -> EngineResult<Map<String, Value>> {
        match serde_json::to_value(self).map_err(strata_core::CoreError::from)? {
            Value::Object(map) => Ok(map),
            _ => Err(EngineError::InvalidRequest(
                "SQL attributes must serialize to an object".to_string(),
            )),
        }
    }

    /// Request equivalent to the persisted state, credentials included
    pub fn to_request(&self, name: &str) -> SqlRequest {
        SqlRequest {
            name: name.to_string(),
            engine: self.engine,
            version: Some(self.version.clone()),
            zone: self.zone.clone(),
            site: self.site.clone(),
            network: self.network.clone(),
            security_policy: self.security_policy.clone(),
            compute_flavor: self.compute_flavor.clone(),
            volume_flavor: self.volume_flavor.clone(),
            data_size_gb: self.data_size_gb,
            backup_size_gb: self.backup_size_gb,
            admin_user: Some(self.admin_user.clone()),
            admin_password: Some(self.admin_password.clone()),
            app_user: self.app_user.clone(),
            app_password: self.app_password.clone(),
            replication_password: Some(self.replication_password.clone()),
            database: self.database.clone(),
            extensions: self.extensions.clone(),
            monitoring: self.monitoring,
            log_shipping: self.log_shipping,
            port: Some(self.port),
            replica_of: None,
        }
    }
}
