//! Replication updates for existing SQL stacks.
//!
//! The context is re-derived from the stack's persisted attributes; the
//! resulting update appends one reconfigure action and then commits the
//! new role to the attribute bag and the topology graph.

use serde_json::{json, Map, Value};
use strata_core::{LinkKind, Stack, StackId, Step, UpdateDefinition};

use crate::attributes::{ReplicationRole, SqlAttributes, MASTER_KEY, REPLICATION_ROLE_KEY};
use crate::builder::playbook;
use crate::context::ProvisioningContext;
use crate::error::{EngineError, EngineResult};

/// Requested replication change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationChange {
    /// Start replicating from another stack
    ReplicateFrom(StackId),
    /// Act as a replication source
    PromoteToMaster,
    /// Stop replicating
    Detach,
}

impl ReplicationChange {
    fn target_role(&self) -> ReplicationRole {
        match self {
            ReplicationChange::ReplicateFrom(_) => ReplicationRole::Replica,
            ReplicationChange::PromoteToMaster => ReplicationRole::Master,
            ReplicationChange::Detach => ReplicationRole::Standalone,
        }
    }
}

/// Plan a replication change for `stack`
///
/// `ctx` is the stack's re-derived context; for `ReplicateFrom` it must
/// carry the replica source. `existing_actions` keeps action names unique
/// across repeated updates.
pub fn plan_replication_update(
    stack: &Stack,
    attrs: &SqlAttributes,
    ctx: &ProvisioningContext,
    change: &ReplicationChange,
    existing_actions: usize,
) -> EngineResult<UpdateDefinition> {
    let target = change.target_role();
    if let ReplicationChange::ReplicateFrom(master) = change {
        if master == &stack.id {
            return Err(EngineError::InvalidRequest(format!(
                "Stack '{}' cannot replicate from itself",
                stack.name
            )));
        }
        if attrs.master.as_ref() == Some(master) {
            return Err(EngineError::InvalidRequest(format!(
                "Stack '{}' already replicates from {}",
                stack.name, master
            )));
        }
    } else if attrs.replication_role == target {
        return Err(EngineError::InvalidRequest(format!(
            "Stack '{}' is already {}",
            stack.name,
            target.as_str()
        )));
    }

    let mut vars = Map::new();
    vars.insert("role".to_string(), json!(target.as_str()));
    vars.insert("port".to_string(), json!(ctx.port));
    vars.insert("replication_user".to_string(), json!(ctx.credentials.replication_user));
    vars.insert(
        "replication_password".to_string(),
        json!(ctx.credentials.replication_password),
    );
    if let ReplicationChange::ReplicateFrom(_) = change {
        let source = ctx.replica.as_ref().ok_or_else(|| {
            EngineError::InvalidRequest(format!(
                "Replication source for stack '{}' is unknown",
                stack.name
            ))
        })?;
        vars.insert("master_host".to_string(), json!(source.master_host));
        vars.insert("master_port".to_string(), json!(source.master_port));
        vars.insert("master_user".to_string(), json!(source.replication_user));
        vars.insert("master_password".to_string(), json!(source.replication_password));
    }

    let action = playbook(
        &format!("reconfigure-replication-{}", existing_actions),
        ctx.profile.replication_playbook,
        Value::Object(vars),
    )
    .described(format!("Reconfigure replication as {}", target.as_str()));

    let mut patch = Map::new();
    patch.insert(REPLICATION_ROLE_KEY.to_string(), json!(target.as_str()));
    let mut update = UpdateDefinition::default().with_action(action);

    // The old link goes first so a re-point never leaves two masters
    if let Some(old_master) = &attrs.master {
        update = update.with_additional_step(Step::UnlinkStacks {
            master: old_master.clone(),
            kind: LinkKind::ReplicaOf,
        });
    }
    match change {
        ReplicationChange::ReplicateFrom(master) => {
            patch.insert(MASTER_KEY.to_string(), json!(master));
            update = update
                .with_additional_step(Step::SetAttributes { patch })
                .with_additional_step(Step::LinkStacks {
                    master: master.clone(),
                    kind: LinkKind::ReplicaOf,
                });
        }
        ReplicationChange::PromoteToMaster | ReplicationChange::Detach => {
            patch.insert(MASTER_KEY.to_string(), Value::Null);
            update = update.with_additional_step(Step::SetAttributes { patch });
        }
    }
    Ok(update)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{catalog, request};
    use crate::context::{derive_context, ReplicaSource};
    use crate::profile::EngineKind;
    use pretty_assertions::assert_eq;
    use strata_core::{EngineConfig, StackType};

    async fn setup(replica: Option<ReplicaSource>) -> (Stack, SqlAttributes, ProvisioningContext) {
        let ctx = derive_context(&request(EngineKind::MySql), replica, &catalog(), &EngineConfig::default())
            .await
            .unwrap();
        let attrs = SqlAttributes::from_context(&ctx);
        let mut stack = Stack::new("orders", StackType::Sql);
        stack.attributes = attrs.to_map().unwrap();
        (stack, attrs, ctx)
    }

    fn source(master: &StackId) -> ReplicaSource {
        ReplicaSource {
            master_id: master.clone(),
            master_name: "primary".to_string(),
            master_host: "10.1.0.9".to_string(),
            master_port: 3306,
            replication_user: "replicator".to_string(),
            replication_password: "pw".to_string(),
        }
    }

    #[tokio::test]
    async fn test_replicate_from_links_after_reconfigure() {
        let master = StackId("m-1".to_string());
        let (stack, attrs, _) = setup(None).await;
        let (_, _, ctx) = setup(Some(source(&master))).await;

        let update = plan_replication_update(
            &stack,
            &attrs,
            &ctx,
            &ReplicationChange::ReplicateFrom(master.clone()),
            9,
        )
        .unwrap();

        assert_eq!(update.actions.len(), 1);
        assert_eq!(update.actions[0].name, "reconfigure-replication-9");
        assert_eq!(
            update.actions[0].params.get("extra_vars").unwrap()["master_host"],
            json!("10.1.0.9")
        );
        assert_eq!(update.additional_steps.len(), 2);
        assert_eq!(
            update.additional_steps[1],
            Step::LinkStacks {
                master,
                kind: LinkKind::ReplicaOf
            }
        );
    }

    #[tokio::test]
    async fn test_detach_unlinks_old_master() {
        let master = StackId("m-1".to_string());
        let (stack, attrs, ctx) = setup(Some(source(&master))).await;
        assert_eq!(attrs.replication_role, ReplicationRole::Replica);

        let update =
            plan_replication_update(&stack, &attrs, &ctx, &ReplicationChange::Detach, 9).unwrap();

        assert_eq!(
            update.additional_steps[0],
            Step::UnlinkStacks {
                master,
                kind: LinkKind::ReplicaOf
            }
        );
        match &update.additional_steps[1] {
            Step::SetAttributes { patch } => {
                assert_eq!(patch[REPLICATION_ROLE_KEY], json!("standalone"));
                assert_eq!(patch[MASTER_KEY], Value::Null);
            }
            other => panic!("unexpected step {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_noop_changes_are_rejected() {
        let (stack, attrs, ctx) = setup(None).await;
        let err = plan_replication_update(&stack, &attrs, &ctx, &ReplicationChange::Detach, 9)
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(_)));

        let err = plan_replication_update(
            &stack,
            &attrs,
            &ctx,
            &ReplicationChange::ReplicateFrom(stack.id.clone()),
            9,
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidRequest(ref m) if m.contains("itself")));
    }
}
