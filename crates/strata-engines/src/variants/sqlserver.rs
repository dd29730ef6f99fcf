use serde_json::{json, Map, Value};
use strata_core::ActionDeclaration;

use crate::builder::{
    accounts_action, bootstrap_host_action, data_volume_actions, install_action, instance_action,
    monitoring_action, volume_actions, wait_reachable_action, EngineBuilder,
};
use crate::context::ProvisioningContext;
use crate::profile::EngineKind;

/// SQL Server: backup volume, structured logins, availability groups
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlServerBuilder;

fn install_vars(ctx: &ProvisioningContext) -> Map<String, Value> {
    let mut vars = Map::new();
    vars.insert("sa_password".to_string(), json!(ctx.credentials.admin_password));
    vars.insert("max_server_memory_mb".to_string(), json!(ctx.memory_limit_mb));
    if let Some(mount) = ctx.profile.backup_mount {
        vars.insert("backup_dir".to_string(), json!(mount));
    }
    if let Some(replica) = &ctx.replica {
        vars.insert(
            "availability_group".to_string(),
            json!({
                "role": "secondary",
                "primary_host": replica.master_host,
                "primary_port": replica.master_port,
                "endpoint_user": replica.replication_user,
                "endpoint_password": replica.replication_password,
            }),
        );
    }
    vars
}

fn logins(ctx: &ProvisioningContext) -> Value {
    let creds = &ctx.credentials;
    let mut logins = vec![
        json!({"name": creds.admin_user, "password": creds.admin_password, "server_roles": ["sysadmin"], "databases": []}),
        json!({"name": creds.replication_user, "password": creds.replication_password, "server_roles": [], "permissions": ["CONNECT ON ENDPOINT::hadr_endpoint"], "databases": []}),
    ];
    if let (Some(user), Some(password)) = (&creds.app_user, &creds.app_password) {
        let databases = match &ctx.database {
            Some(db) => json!([{"name": db, "roles": ["db_owner"]}]),
            None => json!([]),
        };
        logins.push(json!({"name": user, "password": password, "server_roles": [], "databases": databases}));
    }
    json!({ "logins": logins, "databases": ctx.database.iter().collect::<Vec<_>>() })
}

impl EngineBuilder for SqlServerBuilder {
    fn kind(&self) -> EngineKind {
        EngineKind::SqlServer
    }

    fn build_actions(&self, ctx: &ProvisioningContext) -> Vec<ActionDeclaration> {
        let mut actions = vec![
            instance_action(ctx),
            wait_reachable_action(),
            bootstrap_host_action(ctx),
        ];
        actions.extend(data_volume_actions(ctx));
        if let (Some(size), Some(device), Some(mount)) = (
            ctx.backup_size_gb,
            ctx.backup_device_path.as_deref(),
            ctx.profile.backup_mount,
        ) {
            actions.extend(volume_actions(ctx, "backup", size, device, mount, "lv_backup"));
        }
        actions.push(install_action(ctx, install_vars(ctx)));
        if ctx.replica.is_none() {
            actions.push(accounts_action(ctx, logins(ctx)));
        }
        actions.extend(monitoring_action(ctx));
        actions
    }
}
