use serde_json::{json, Map, Value};
use strata_core::ActionDeclaration;

use crate::builder::{
    accounts_action, bootstrap_host_action, data_volume_actions, install_action, instance_action,
    monitoring_action, wait_reachable_action, EngineBuilder,
};
use crate::context::ProvisioningContext;
use crate::profile::EngineKind;

/// MySQL: flat account list, binlog replication
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlBuilder;

/// Stable non-zero server id derived from the stack name
pub(crate) fn server_id(name: &str) -> u32 {
    let hash = name
        .bytes()
        .fold(5381u32, |acc, b| acc.wrapping_mul(33).wrapping_add(u32::from(b)));
    hash.max(1)
}

fn install_vars(ctx: &ProvisioningContext) -> Map<String, Value> {
    let mut vars = Map::new();
    vars.insert("server_id".to_string(), json!(server_id(&ctx.name)));
    vars.insert("bind_address".to_string(), json!("0.0.0.0"));
    vars.insert("innodb_buffer_pool_mb".to_string(), json!(ctx.memory_limit_mb));
    vars.insert("log_bin".to_string(), json!(true));
    if let Some(replica) = &ctx.replica {
        vars.insert("read_only".to_string(), json!(true));
        vars.insert(
            "replication".to_string(),
            json!({
                "role": "replica",
                "master_host": replica.master_host,
                "master_port": replica.master_port,
                "master_user": replica.replication_user,
                "master_password": replica.replication_password,
            }),
        );
    }
    vars
}

fn accounts(ctx: &ProvisioningContext) -> Value {
    let creds = &ctx.credentials;
    let mut accounts = vec![
        json!({"user": creds.admin_user, "password": creds.admin_password, "host": "%", "privileges": "*.*:ALL,GRANT"}),
        json!({"user": creds.replication_user, "password": creds.replication_password, "host": "%", "privileges": "*.*:REPLICATION SLAVE"}),
    ];
    if let (Some(user), Some(password)) = (&creds.app_user, &creds.app_password) {
        let scope = ctx.database.as_deref().unwrap_or("*");
        accounts.push(json!({"user": user, "password": password, "host": "%", "privileges": format!("{}.*:ALL", scope)}));
    }
    json!({ "accounts": accounts, "databases": ctx.database.iter().collect::<Vec<_>>() })
}

impl EngineBuilder for MySqlBuilder {
    fn kind(&self) -> EngineKind {
        EngineKind::MySql
    }

    fn build_actions(&self, ctx: &ProvisioningContext) -> Vec<ActionDeclaration> {
        let mut actions = vec![
            instance_action(ctx),
            wait_reachable_action(),
            bootstrap_host_action(ctx),
        ];
        actions.extend(data_volume_actions(ctx));
        actions.push(install_action(ctx, install_vars(ctx)));
        // Replicas inherit accounts from the master through replication
        if ctx.replica.is_none() {
            actions.push(accounts_action(ctx, accounts(ctx)));
        }
        actions.extend(monitoring_action(ctx));
        actions
    }
}
