//! Provisioning context shared by every engine builder.
//!
//! [`derive_context`] validates a request against the catalog and computes
//! the derived values (device paths, mirror URL, memory sizing,
//! credentials). Builders only read the result.

use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use strata_core::{EngineConfig, Stack, StackId};
use tracing::debug;

use crate::attributes::SqlAttributes;
use crate::catalog::{
    require, Catalog, ComputeFlavor, ComputeZone, HypervisorFamily, Network, SecurityPolicy, Site,
    VolumeFlavor,
};
use crate::error::{EngineError, EngineResult};
use crate::profile::{profile, EngineKind, EngineProfile};

/// Share of the flavor memory given to the engine
const MEMORY_SHARE_PERCENT: u64 = 70;

/// Account used for replication
pub const REPLICATION_USER: &str = "replicator";

/// Caller request for a new SQL stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SqlRequest {
    /// Stack name
    pub name: String,
    /// Engine
    pub engine: EngineKind,
    /// Version; newest supported when absent
    #[serde(default)]
    pub version: Option<String>,
    /// Compute zone
    pub zone: String,
    /// Site inside the zone
    pub site: String,
    /// Network inside the site
    pub network: String,
    /// Security policy to apply
    #[serde(default)]
    pub security_policy: Option<String>,
    /// Compute flavor
    pub compute_flavor: String,
    /// Volume flavor
    pub volume_flavor: String,
    /// Data volume size
    pub data_size_gb: u64,
    /// Backup volume size, for engines that get one; defaults to the data size
    #[serde(default)]
    pub backup_size_gb: Option<u64>,
    /// Administrative account; the configured default when absent
    #[serde(default)]
    pub admin_user: Option<String>,
    /// Administrative password; generated when absent
    #[serde(default)]
    pub admin_password: Option<String>,
    /// Application account
    #[serde(default)]
    pub app_user: Option<String>,
    /// Application password; generated when absent
    #[serde(default)]
    pub app_password: Option<String>,
    /// Replication password; generated when absent
    #[serde(default)]
    pub replication_password: Option<String>,
    /// Initial database
    #[serde(default)]
    pub database: Option<String>,
    /// Extensions to install
    #[serde(default)]
    pub extensions: Vec<String>,
    /// Enable monitoring
    #[serde(default)]
    pub monitoring: bool,
    /// Enable log shipping
    #[serde(default)]
    pub log_shipping: bool,
    /// Listener port; the engine default when absent
    #[serde(default)]
    pub port: Option<u16>,
    /// Name of the master stack to replicate from
    #[serde(default)]
    pub replica_of: Option<String>,
}

impl SqlRequest {
    /// Request with placement and sizing
    pub fn new(name: impl Into<String>, engine: EngineKind) -> Self {
        Self {
            name: name.into(),
            engine,
            version: None,
            zone: String::new(),
            site: String::new(),
            network: String::new(),
            security_policy: None,
            compute_flavor: String::new(),
            volume_flavor: String::new(),
            data_size_gb: 0,
            backup_size_gb: None,
            admin_user: None,
            admin_password: None,
            app_user: None,
            app_password: None,
            replication_password: None,
            database: None,
            extensions: Vec::new(),
            monitoring: false,
            log_shipping: false,
            port: None,
            replica_of: None,
        }
    }

    /// Place the stack
    pub fn placed(mut self, zone: &str, site: &str, network: &str) -> Self {
        self.zone = zone.to_string();
        self.site = site.to_string();
        self.network = network.to_string();
        self
    }

    /// Size the stack
    pub fn sized(mut self, compute_flavor: &str, volume_flavor: &str, data_size_gb: u64) -> Self {
        self.compute_flavor = compute_flavor.to_string();
        self.volume_flavor = volume_flavor.to_string();
        self.data_size_gb = data_size_gb;
        self
    }

    /// Pin the version
    pub fn with_version(mut self, version: &str) -> Self {
        self.version = Some(version.to_string());
        self
    }

    /// Application account and initial database
    pub fn with_app(mut self, user: &str, database: &str) -> Self {
        self.app_user = Some(user.to_string());
        self.database = Some(database.to_string());
        self
    }

    /// Add an extension
    pub fn with_extension(mut self, extension: &str) -> Self {
        self.extensions.push(extension.to_string());
        self
    }

    /// Enable monitoring
    pub fn with_monitoring(mut self) -> Self {
        self.monitoring = true;
        self
    }

    /// Replicate from an existing stack
    pub fn replica_of(mut self, master: &str) -> Self {
        self.replica_of = Some(master.to_string());
        self
    }
}

/// Bootstrap accounts
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Built-in superuser of the engine
    pub superuser: String,
    /// Administrative account
    pub admin_user: String,
    /// Administrative password
    pub admin_password: String,
    /// Application account
    pub app_user: Option<String>,
    /// Application password
    pub app_password: Option<String>,
    /// Replication account
    pub replication_user: String,
    /// Replication password
    pub replication_password: String,
}

/// Master a new or updated stack replicates from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaSource {
    /// Master stack id
    pub master_id: StackId,
    /// Master stack name
    pub master_name: String,
    /// Address replicas connect to
    pub master_host: String,
    /// Master listener port
    pub master_port: u16,
    /// Replication account on the master
    pub replication_user: String,
    /// Replication password on the master
    pub replication_password: String,
}

impl ReplicaSource {
    /// Source built from an active master stack
    pub fn from_master(master: &Stack, attrs: &SqlAttributes, host: String) -> Self {
        Self {
            master_id: master.id.clone(),
            master_name: master.name.clone(),
            master_host: host,
            master_port: attrs.port,
            replication_user: attrs.replication_user.clone(),
            replication_password: attrs.replication_password.clone(),
        }
    }
}

/// Validated request plus derived values
#[derive(Debug, Clone)]
pub struct ProvisioningContext {
    /// Stack name
    pub name: String,
    /// Engine profile
    pub profile: &'static EngineProfile,
    /// Version to install
    pub version: String,
    /// Listener port
    pub port: u16,
    /// Compute zone
    pub zone: ComputeZone,
    /// Site
    pub site: Site,
    /// Network
    pub network: Network,
    /// Security policy
    pub security_policy: Option<SecurityPolicy>,
    /// Compute flavor
    pub compute_flavor: ComputeFlavor,
    /// Volume flavor
    pub volume_flavor: VolumeFlavor,
    /// Data volume size
    pub data_size_gb: u64,
    /// Backup volume size, for engines that get one
    pub backup_size_gb: Option<u64>,
    /// Bootstrap accounts
    pub credentials: Credentials,
    /// Initial database
    pub database: Option<String>,
    /// Extensions to install
    pub extensions: Vec<String>,
    /// Enable monitoring
    pub monitoring: bool,
    /// Enable log shipping
    pub log_shipping: bool,
    /// Device the data volume attaches as
    pub device_path: String,
    /// Device the backup volume attaches as
    pub backup_device_path: Option<String>,
    /// Package repository for this site, engine and version
    pub repository_url: String,
    /// Memory given to the engine
    pub memory_limit_mb: u64,
    /// LVM volume group for the data
    pub volume_group: String,
    /// LVM logical volume for the data
    pub logical_volume: String,
    /// Proxy the host uses to reach the mirror, when its image needs one
    pub proxy_url: Option<String>,
    /// Master to replicate from
    pub replica: Option<ReplicaSource>,
}

/// Validate a request against the catalog and derive the provisioning context
pub async fn derive_context(
    request: &SqlRequest,
    replica: Option<ReplicaSource>,
    catalog: &dyn Catalog,
    config: &EngineConfig,
) -> EngineResult<ProvisioningContext> {
    let profile = profile(request.engine);

    if request.name.trim().is_empty() {
        return Err(EngineError::InvalidRequest("Stack name must not be empty".to_string()));
    }
    if request.data_size_gb == 0 {
        return Err(EngineError::InvalidRequest(
            "Data volume size must be greater than zero".to_string(),
        ));
    }

    let version = match &request.version {
        Some(v) if profile.supports_version(v) => v.clone(),
        Some(v) => {
            return Err(EngineError::InvalidRequest(format!(
                "{} version '{}' is not supported (supported: {})",
                profile.display_name,
                v,
                profile.versions.join(", ")
            )))
        }
        None => profile.default_version().to_string(),
    };

    let zone = require("compute zone", &request.zone, catalog.zone(&request.zone)).await?;
    let site = require("site", &request.site, catalog.site(&request.site)).await?;
    if site.zone != zone.name {
        return Err(EngineError::InvalidRequest(format!(
            "Site '{}' does not belong to compute zone '{}'",
            site.name, zone.name
        )));
    }
    let network = require("network", &request.network, catalog.network(&request.network)).await?;
    if network.site != site.name {
        return Err(EngineError::InvalidRequest(format!(
            "Network '{}' is not available in site '{}'",
            network.name, site.name
        )));
    }

    let port = request.port.unwrap_or(profile.default_port);
    let security_policy = match &request.security_policy {
        Some(name) => {
            let policy = require("security policy", name, catalog.security_policy(name)).await?;
            if !policy.open_ports.contains(&port) {
                return Err(EngineError::InvalidRequest(format!(
                    "Security policy '{}' does not open port {}",
                    policy.name, port
                )));
            }
            Some(policy)
        }
        None => None,
    };

    let compute_flavor = require(
        "compute flavor",
        &request.compute_flavor,
        catalog.compute_flavor(&request.compute_flavor),
    )
    .await?;
    let volume_flavor = require(
        "volume flavor",
        &request.volume_flavor,
        catalog.volume_flavor(&request.volume_flavor),
    )
    .await?;

    if !request.extensions.is_empty() && !profile.supports_extensions {
        return Err(EngineError::InvalidRequest(format!(
            "{} does not support extensions",
            profile.display_name
        )));
    }
    if request.app_password.is_some() && request.app_user.is_none() {
        return Err(EngineError::InvalidRequest(
            "An application password needs an application user".to_string(),
        ));
    }

    let backup_size_gb = profile
        .backup_mount
        .map(|_| request.backup_size_gb.unwrap_or(request.data_size_gb));
    let (device_path, backup_device_path) = device_paths(zone.hypervisor, backup_size_gb.is_some());
    let credentials = credentials(request, profile, config);

    let ctx = ProvisioningContext {
        name: request.name.clone(),
        profile,
        repository_url: repository_url(&config.package_mirror_url, &site.name, profile.kind, &version),
        memory_limit_mb: compute_flavor.memory_mb * MEMORY_SHARE_PERCENT / 100,
        proxy_url: profile.needs_proxy().then(|| config.package_mirror_url.clone()),
        version,
        port,
        zone,
        site,
        network,
        security_policy,
        compute_flavor,
        volume_flavor,
        data_size_gb: request.data_size_gb,
        backup_size_gb,
        credentials,
        database: request.database.clone(),
        extensions: request.extensions.clone(),
        monitoring: request.monitoring,
        log_shipping: request.log_shipping,
        device_path,
        backup_device_path,
        volume_group: "vg_data".to_string(),
        logical_volume: format!("lv_{}", profile.kind),
        replica,
    };

    debug!(stack = %ctx.name, engine = %ctx.profile.kind, version = %ctx.version, "Derived provisioning context");
    Ok(ctx)
}

/// Context of an existing stack, rebuilt from its persisted attributes
pub async fn rederive_context(
    stack: &Stack,
    attrs: &SqlAttributes,
    replica: Option<ReplicaSource>,
    catalog: &dyn Catalog,
    config: &EngineConfig,
) -> EngineResult<ProvisioningContext> {
    let mut ctx = derive_context(&attrs.to_request(&stack.name), replica, catalog, config).await?;
    // Devices and LVM names were fixed at creation time
    ctx.device_path = attrs.device_path.clone();
    ctx.volume_group = attrs.volume_group.clone();
    ctx.logical_volume = attrs.logical_volume.clone();
    Ok(ctx)
}

/// Data and backup device for a hypervisor family
pub fn device_paths(hypervisor: HypervisorFamily, with_backup: bool) -> (String, Option<String>) {
    let prefix = match hypervisor {
        HypervisorFamily::Kvm => "/dev/vd",
        HypervisorFamily::Vmware | HypervisorFamily::HyperV => "/dev/sd",
    };
    let backup = with_backup.then(|| format!("{}c", prefix));
    (format!("{}b", prefix), backup)
}

/// Per-site package repository
pub fn repository_url(mirror: &str, site: &str, engine: EngineKind, version: &str) -> String {
    format!("{}/{}/{}/{}", mirror.trim_end_matches('/'), site, engine, version)
}

/// Random alphanumeric password
pub fn generate_password(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

fn credentials(request: &SqlRequest, profile: &EngineProfile, config: &EngineConfig) -> Credentials {
    let length = config.generated_password_length;
    Credentials {
        superuser: profile.superuser.to_string(),
        admin_user: request
            .admin_user
            .clone()
            .unwrap_or_else(|| config.default_admin_user.clone()),
        admin_password: request
            .admin_password
            .clone()
            .unwrap_or_else(|| generate_password(length)),
        app_user: request.app_user.clone(),
        app_password: request.app_user.as_ref().map(|_| {
            request
                .app_password
                .clone()
                .unwrap_or_else(|| generate_password(length))
        }),
        replication_user: REPLICATION_USER.to_string(),
        replication_password: request
            .replication_password
            .clone()
            .unwrap_or_else(|| generate_password(length)),
    }
}
