//! Storage growth for SQL stacks.
//!
//! Growth adds a volume of the size delta next to the instance, attaches
//! it, extends the data filesystem over it and only then records the new
//! allocation on the stack.

use serde_json::{json, Map, Value};
use strata_core::{
    ActionDeclaration, CoreError, ParamBag, ResourceSpec, Stack, Step, UpdateDefinition,
};

use crate::attributes::{SqlAttributes, ALLOCATED_STORAGE_KEY};
use crate::builder::{instance_operation, resource_ref, ADD_VOLUME, EXTEND_FILESYSTEM, VOLUME_TYPE};
use crate::error::EngineResult;

/// Status the instance must report for growth
pub const RUNNING_STATUS: &str = "running";

/// Total size of the attached non-bootable volumes in an instance detail tree
pub fn allocated_storage_gb(instance: &Value) -> u64 {
    instance
        .get("volumes")
        .and_then(Value::as_array)
        .map(|volumes| {
            volumes
                .iter()
                .filter(|v| !v.get("bootable").and_then(Value::as_bool).unwrap_or(false))
                .filter_map(|v| v.get("size_gb").and_then(Value::as_u64))
                .sum()
        })
        .unwrap_or(0)
}

/// Plan growing a stack's storage to `new_size_gb`
///
/// Fails before anything is created when the instance is not running or
/// the requested size does not exceed the current allocation.
pub fn plan_growth(
    stack: &Stack,
    attrs: &SqlAttributes,
    instance: &Value,
    new_size_gb: u64,
    existing_actions: usize,
) -> EngineResult<UpdateDefinition> {
    let status = instance.get("status").and_then(Value::as_str).unwrap_or("unknown");
    if status != RUNNING_STATUS {
        return Err(CoreError::PreconditionFailed(format!(
            "Storage of stack '{}' can only grow while its instance is running (instance is {})",
            stack.name, status
        ))
        .into());
    }

    let current = allocated_storage_gb(instance);
    if new_size_gb <= current {
        return Err(CoreError::PreconditionFailed(format!(
            "Requested size {} GB for stack '{}' must be greater than the allocated {} GB",
            new_size_gb, stack.name, current
        ))
        .into());
    }
    let delta = new_size_gb - current;

    let volume = format!("grow-volume-{}", existing_actions);
    let create = ActionDeclaration::new(
        volume.as_str(),
        ResourceSpec::create(VOLUME_TYPE),
        ParamBag::new()
            .with("size_gb", delta)
            .with("flavor", attrs.volume_flavor.as_str())
            .with("availability_zone", attrs.availability_zone.as_str()),
    )
    .described(format!("Create {} GB growth volume", delta));

    let attach = instance_operation(
        &format!("grow-attach-{}", existing_actions),
        ADD_VOLUME,
        ParamBag::new()
            .with("volume_id", resource_ref(&volume))
            .with("size_gb", delta),
    )
    .described("Attach growth volume");

    let extend = instance_operation(
        &format!("grow-extend-{}", existing_actions),
        EXTEND_FILESYSTEM,
        ParamBag::new()
            .with("volume_id", resource_ref(&volume))
            .with("volume_group", attrs.volume_group.as_str())
            .with("logical_volume", attrs.logical_volume.as_str())
            .with("mount_point", attrs.data_mount.as_str()),
    )
    .described("Extend data filesystem");

    let mut patch = Map::new();
    patch.insert(ALLOCATED_STORAGE_KEY.to_string(), json!(new_size_gb));

    Ok(UpdateDefinition::default()
        .with_action(create)
        .with_action(attach)
        .with_action(extend)
        .with_additional_step(Step::SetAttributes { patch }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::tests::{catalog, request};
    use crate::context::derive_context;
    use crate::error::EngineError;
    use crate::profile::EngineKind;
    use strata_core::{EngineConfig, StackType};

    async fn attrs() -> SqlAttributes {
        let ctx = derive_context(&request(EngineKind::MySql), None, &catalog(), &EngineConfig::default())
            .await
            .unwrap();
        SqlAttributes::from_context(&ctx)
    }

    fn instance(status: &str) -> Value {
        json!({
            "status": status,
            "volumes": [
                {"id": "root", "size_gb": 20, "bootable": true},
                {"id": "vol-1", "size_gb": 50},
                {"id": "vol-2", "size_gb": 30, "bootable": false}
            ]
        })
    }

    #[test]
    fn test_allocated_storage_ignores_boot_volume() {
        assert_eq!(allocated_storage_gb(&instance("running")), 80);
        assert_eq!(allocated_storage_gb(&json!({})), 0);
    }

    #[tokio::test]
    async fn test_growth_adds_delta_volume() {
        let stack = Stack::new("orders", StackType::Sql);
        let plan = plan_growth(&stack, &attrs().await, &instance("running"), 120, 11).unwrap();

        let names: Vec<&str> = plan.actions.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["grow-volume-11", "grow-attach-11", "grow-extend-11"]);
        assert_eq!(plan.actions[0].params.get("size_gb"), Some(&json!(40)));
        assert_eq!(plan.actions[0].params.get("availability_zone"), Some(&json!("eu-1a")));
        assert!(matches!(plan.additional_steps[0], Step::SetAttributes { .. }));
    }

    #[tokio::test]
    async fn test_growth_rejects_non_increasing_size() {
        let stack = Stack::new("orders", StackType::Sql);
        for size in [40, 80] {
            let err = plan_growth(&stack, &attrs().await, &instance("running"), size, 11).unwrap_err();
            assert!(matches!(err, EngineError::Core(CoreError::PreconditionFailed(ref m)) if m.contains("80 GB")));
        }
    }

    #[tokio::test]
    async fn test_growth_requires_running_instance() {
        let stack = Stack::new("orders", StackType::Sql);
        let err = plan_growth(&stack, &attrs().await, &instance("stopped"), 200, 11).unwrap_err();
        assert!(matches!(err, EngineError::Core(CoreError::PreconditionFailed(ref m)) if m.contains("stopped")));
    }
}
