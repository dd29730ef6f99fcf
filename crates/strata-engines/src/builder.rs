//! Shared provisioning skeleton.
//!
//! Every engine lays its actions out in the same order: instance,
//! reachability, host bootstrap, data volume(s), engine install, accounts,
//! extensions, monitoring. Variants supply the engine-specific pieces via
//! [`EngineBuilder::build_actions`] and reuse the helpers here.

use serde_json::{json, Map, Value};
use strata_core::{
    ActionDeclaration, LinkKind, ParamBag, ResourceSpec, StackDefinition, StackType, Step,
};

use crate::attributes::SqlAttributes;
use crate::context::ProvisioningContext;
use crate::error::EngineResult;
use crate::profile::EngineKind;
use crate::variants::{MySqlBuilder, PostgreSqlBuilder, SqlServerBuilder};

/// Backend resource type of the compute instance
pub const INSTANCE_TYPE: &str = "instance";
/// Backend resource type of block volumes
pub const VOLUME_TYPE: &str = "volume";

/// Short name of the action creating the instance
pub const INSTANCE_ACTION: &str = "instance";

/// Instance capability: block until SSH answers
pub const WAIT_REACHABLE: &str = "wait_reachable";
/// Instance capability: run a configuration playbook
pub const RUN_PLAYBOOK: &str = "run_playbook";
/// Instance capability: attach a volume
pub const ADD_VOLUME: &str = "add_volume";
/// Instance capability: grow a filesystem over new physical volumes
pub const EXTEND_FILESYSTEM: &str = "extend_filesystem";

/// Placeholder for the instance resource id
pub fn instance_ref() -> Value {
    json!(format!("$$action_resource.{}$$", INSTANCE_ACTION))
}

/// Placeholder for the resource created by another action
pub fn resource_ref(action: &str) -> Value {
    json!(format!("$$action_resource.{}$$", action))
}

/// Builds the ordered action list of one engine variant
pub trait EngineBuilder: Send + Sync {
    /// Engine this builder serves
    fn kind(&self) -> EngineKind;

    /// Actions for a new stack, in execution order
    fn build_actions(&self, ctx: &ProvisioningContext) -> Vec<ActionDeclaration>;
}

/// Builder for an engine
pub fn builder_for(kind: EngineKind) -> &'static dyn EngineBuilder {
    match kind {
        EngineKind::MySql => &MySqlBuilder,
        EngineKind::PostgreSql => &PostgreSqlBuilder,
        EngineKind::SqlServer => &SqlServerBuilder,
    }
}

/// Full stack definition for a new SQL stack
pub fn stack_definition(
    ctx: &ProvisioningContext,
    builder: &dyn EngineBuilder,
) -> EngineResult<StackDefinition> {
    let mut definition = StackDefinition::new(ctx.name.clone(), StackType::Sql)
        .with_output(
            "address",
            json!(format!("$$action_resource.{}::addresses.0.ip$$", INSTANCE_ACTION)),
        )
        .with_output("port", json!(ctx.port));

    definition.attributes = SqlAttributes::from_context(ctx).to_map()?;
    definition.actions = builder.build_actions(ctx);

    if let Some(replica) = &ctx.replica {
        definition = definition.with_additional_step(Step::LinkStacks {
            master: replica.master_id.clone(),
            kind: LinkKind::ReplicaOf,
        });
    }
    Ok(definition)
}

/// Operation on the stack's instance
pub fn instance_operation(name: &str, operation: &str, params: ParamBag) -> ActionDeclaration {
    ActionDeclaration::new(
        name,
        ResourceSpec::operation(INSTANCE_TYPE, operation),
        params.with("resource_id", instance_ref()),
    )
}

/// Playbook run on the stack's instance
pub fn playbook(name: &str, playbook: &str, extra_vars: Value) -> ActionDeclaration {
    instance_operation(
        name,
        RUN_PLAYBOOK,
        ParamBag::new()
            .with("playbook", playbook)
            .with("extra_vars", extra_vars),
    )
    .described(format!("Run playbook {}", playbook))
}

/// Create the compute instance
pub fn instance_action(ctx: &ProvisioningContext) -> ActionDeclaration {
    let mut params = ParamBag::new()
        .with("name", ctx.name.as_str())
        .with("image", ctx.profile.base_image)
        .with("flavor", ctx.compute_flavor.name.as_str())
        .with("zone", ctx.zone.name.as_str())
        .with("availability_zone", ctx.site.availability_zone.as_str())
        .with("network", ctx.network.name.as_str());
    if let Some(policy) = &ctx.security_policy {
        params.insert("security_policy", policy.name.as_str());
    }
    ActionDeclaration::new(INSTANCE_ACTION, ResourceSpec::create(INSTANCE_TYPE), params)
        .described(format!("Create {} instance", ctx.profile.display_name))
}

/// Wait until the instance answers
pub fn wait_reachable_action() -> ActionDeclaration {
    instance_operation("wait-reachable", WAIT_REACHABLE, ParamBag::new().with("port", 22))
        .described("Wait for the instance to become reachable")
}

/// Hostname and, for images that need it, the mirror proxy
pub fn bootstrap_host_action(ctx: &ProvisioningContext) -> ActionDeclaration {
    let mut vars = Map::new();
    vars.insert("hostname".to_string(), json!(ctx.name));
    if let Some(proxy) = &ctx.proxy_url {
        vars.insert("proxy_url".to_string(), json!(proxy));
    }
    playbook("bootstrap-host", "host_bootstrap", Value::Object(vars))
}

/// Create, attach and prepare one volume
///
/// `role` prefixes the action names, e.g. `data` gives `data-volume`,
/// `attach-data-volume` and `prepare-data-volume`.
pub fn volume_actions(
    ctx: &ProvisioningContext,
    role: &str,
    size_gb: u64,
    device: &str,
    mount: &str,
    logical_volume: &str,
) -> Vec<ActionDeclaration> {
    let volume = format!("{}-volume", role);
    vec![
        ActionDeclaration::new(
            volume.as_str(),
            ResourceSpec::create(VOLUME_TYPE),
            ParamBag::new()
                .with("size_gb", size_gb)
                .with("flavor", ctx.volume_flavor.name.as_str())
                .with("availability_zone", ctx.site.availability_zone.as_str()),
        )
        .described(format!("Create {} volume", role)),
        instance_operation(
            &format!("attach-{}", volume),
            ADD_VOLUME,
            ParamBag::new()
                .with("volume_id", resource_ref(&volume))
                .with("size_gb", size_gb)
                .with("device", device),
        )
        .described(format!("Attach {} volume", role)),
        playbook(
            &format!("prepare-{}", volume),
            "prepare_volume",
            json!({
                "device": device,
                "mount_point": mount,
                "volume_group": ctx.volume_group,
                "logical_volume": logical_volume,
            }),
        ),
    ]
}

/// Data volume at the engine's mount point
pub fn data_volume_actions(ctx: &ProvisioningContext) -> Vec<ActionDeclaration> {
    volume_actions(
        ctx,
        "data",
        ctx.data_size_gb,
        &ctx.device_path,
        ctx.profile.data_mount,
        &ctx.logical_volume,
    )
}

/// Engine install with the common variables plus `extra`
pub fn install_action(ctx: &ProvisioningContext, extra: Map<String, Value>) -> ActionDeclaration {
    let mut vars = Map::new();
    vars.insert("package".to_string(), json!(ctx.profile.package));
    vars.insert("version".to_string(), json!(ctx.version));
    vars.insert("repository_url".to_string(), json!(ctx.repository_url));
    vars.insert("port".to_string(), json!(ctx.port));
    vars.insert("data_dir".to_string(), json!(ctx.profile.data_mount));
    vars.insert("memory_limit_mb".to_string(), json!(ctx.memory_limit_mb));
    if let Some(license) = ctx.profile.license {
        vars.insert("license".to_string(), json!(license));
    }
    vars.extend(extra);
    playbook("install", ctx.profile.install_playbook, Value::Object(vars))
}

/// Bootstrap accounts in the engine's shape
pub fn accounts_action(ctx: &ProvisioningContext, accounts: Value) -> ActionDeclaration {
    playbook("accounts", ctx.profile.accounts_playbook, accounts)
}

/// Extensions, when requested
pub fn extensions_action(ctx: &ProvisioningContext) -> Option<ActionDeclaration> {
    (!ctx.extensions.is_empty()).then(|| {
        playbook(
            "extensions",
            &format!("{}_extensions", ctx.profile.kind),
            json!({ "extensions": ctx.extensions, "database": ctx.database }),
        )
    })
}

/// Monitoring agent, when requested
pub fn monitoring_action(ctx: &ProvisioningContext) -> Option<ActionDeclaration> {
    ctx.monitoring.then(|| {
        playbook(
            "monitoring",
            "monitoring_agent",
            json!({ "engine": ctx.profile.kind, "port": ctx.port }),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::derive_context;
    use crate::context::tests::{catalog, request};
    use crate::context::ReplicaSource;
    use pretty_assertions::assert_eq;
    use strata_core::{EngineConfig, StackId};

    async fn context(engine: EngineKind) -> ProvisioningContext {
        derive_context(&request(engine), None, &catalog(), &EngineConfig::default())
            .await
            .unwrap()
    }

    fn names(actions: &[ActionDeclaration]) -> Vec<&str> {
        actions.iter().map(|a| a.name.as_str()).collect()
    }

    #[tokio::test]
    async fn test_mysql_action_order() {
        let mut ctx = context(EngineKind::MySql).await;
        ctx.monitoring = true;
        let actions = builder_for(EngineKind::MySql).build_actions(&ctx);

        assert_eq!(
            names(&actions),
            vec![
                "instance",
                "wait-reachable",
                "bootstrap-host",
                "data-volume",
                "attach-data-volume",
                "prepare-data-volume",
                "install",
                "accounts",
                "monitoring",
            ]
        );
        let accounts = actions[7].params.get("extra_vars").unwrap();
        assert!(accounts["accounts"].is_array());
    }

    #[tokio::test]
    async fn test_sqlserver_adds_backup_volume() {
        let ctx = context(EngineKind::SqlServer).await;
        let actions = builder_for(EngineKind::SqlServer).build_actions(&ctx);
        let names = names(&actions);

        assert!(names.contains(&"backup-volume"));
        let data = names.iter().position(|n| *n == "prepare-data-volume").unwrap();
        let backup = names.iter().position(|n| *n == "prepare-backup-volume").unwrap();
        let install = names.iter().position(|n| *n == "install").unwrap();
        assert!(data < backup && backup < install);

        let logins = actions.iter().find(|a| a.name == "accounts").unwrap();
        assert!(logins.params.get("extra_vars").unwrap()["logins"].is_array());
    }

    #[tokio::test]
    async fn test_postgres_installs_extensions_after_accounts() {
        let ctx = derive_context(
            &request(EngineKind::PostgreSql).with_extension("pg_trgm"),
            None,
            &catalog(),
            &EngineConfig::default(),
        )
        .await
        .unwrap();
        let actions = builder_for(EngineKind::PostgreSql).build_actions(&ctx);
        let tail: Vec<&str> = names(&actions).into_iter().rev().take(2).collect();
        assert_eq!(tail, vec!["extensions", "accounts"]);
    }

    #[tokio::test]
    async fn test_replica_definition_links_master_and_injects_vars() {
        let mut ctx = context(EngineKind::MySql).await;
        let master = StackId("master-1".to_string());
        ctx.replica = Some(ReplicaSource {
            master_id: master.clone(),
            master_name: "orders-primary".to_string(),
            master_host: "10.1.0.7".to_string(),
            master_port: 3306,
            replication_user: "replicator".to_string(),
            replication_password: "pw".to_string(),
        });

        let definition = stack_definition(&ctx, builder_for(EngineKind::MySql)).unwrap();
        assert_eq!(
            definition.additional_steps,
            vec![Step::LinkStacks {
                master,
                kind: LinkKind::ReplicaOf
            }]
        );
        assert!(!definition.actions.iter().any(|a| a.name == "accounts"));

        let install = definition.actions.iter().find(|a| a.name == "install").unwrap();
        let vars = install.params.get("extra_vars").unwrap();
        assert_eq!(vars["replication"]["master_host"], json!("10.1.0.7"));
        assert_eq!(definition.attributes["replication_role"], json!("replica"));
    }

    #[tokio::test]
    async fn test_operations_target_the_instance() {
        let ctx = context(EngineKind::PostgreSql).await;
        let actions = builder_for(EngineKind::PostgreSql).build_actions(&ctx);
        for action in actions.iter().skip(1) {
            if action.resource.operation.is_some() {
                assert_eq!(action.params.get("resource_id"), Some(&instance_ref()));
            }
        }
    }
}
