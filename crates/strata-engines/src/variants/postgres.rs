use serde_json::{json, Map, Value};
use strata_core::ActionDeclaration;

use crate::builder::{
    accounts_action, bootstrap_host_action, data_volume_actions, extensions_action,
    install_action, instance_action, monitoring_action, wait_reachable_action, EngineBuilder,
};
use crate::context::ProvisioningContext;
use crate::profile::EngineKind;

/// PostgreSQL: structured role grants, streaming replication, extensions
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgreSqlBuilder;

fn install_vars(ctx: &ProvisioningContext) -> Map<String, Value> {
    let mut vars = Map::new();
    vars.insert("shared_buffers_mb".to_string(), json!(ctx.memory_limit_mb / 4));
    vars.insert("effective_cache_size_mb".to_string(), json!(ctx.memory_limit_mb * 3 / 4));
    vars.insert(
        "hba_entries".to_string(),
        json!([{"type": "host", "database": "all", "user": "all", "address": ctx.network.cidr, "method": "scram-sha-256"},
               {"type": "host", "database": "replication", "user": ctx.credentials.replication_user, "address": ctx.network.cidr, "method": "scram-sha-256"}]),
    );
    if let Some(replica) = &ctx.replica {
        vars.insert("hot_standby".to_string(), json!(true));
        vars.insert(
            "primary_conninfo".to_string(),
            json!(format!(
                "host={} port={} user={} password={}",
                replica.master_host, replica.master_port, replica.replication_user, replica.replication_password
            )),
        );
    }
    vars
}

fn roles(ctx: &ProvisioningContext) -> Value {
    let creds = &ctx.credentials;
    let mut roles = vec![
        json!({"name": creds.admin_user, "password": creds.admin_password, "attributes": ["LOGIN", "CREATEDB", "CREATEROLE"], "grants": []}),
        json!({"name": creds.replication_user, "password": creds.replication_password, "attributes": ["LOGIN", "REPLICATION"], "grants": []}),
    ];
    if let (Some(user), Some(password)) = (&creds.app_user, &creds.app_password) {
        let grants = match &ctx.database {
            Some(db) => json!([{"database": db, "privileges": ["CONNECT", "CREATE", "TEMPORARY"]}]),
            None => json!([]),
        };
        roles.push(json!({"name": user, "password": password, "attributes": ["LOGIN"], "grants": grants}));
    }
    json!({
        "superuser": creds.superuser,
        "roles": roles,
        "databases": ctx.database.iter().map(|db| json!({"name": db, "owner": creds.app_user.as_ref().unwrap_or(&creds.admin_user)})).collect::<Vec<_>>(),
    })
}

impl EngineBuilder for PostgreSqlBuilder {
    fn kind(&self) -> EngineKind {
        EngineKind::PostgreSql
    }

    fn build_actions(&self, ctx: &ProvisioningContext) -> Vec<ActionDeclaration> {
        let mut actions = vec![
            instance_action(ctx),
            wait_reachable_action(),
            bootstrap_host_action(ctx),
        ];
        actions.extend(data_volume_actions(ctx));
        actions.push(install_action(ctx, install_vars(ctx)));
        if ctx.replica.is_none() {
            actions.push(accounts_action(ctx, roles(ctx)));
            actions.extend(extensions_action(ctx));
        }
        actions.extend(monitoring_action(ctx));
        actions
    }
}
