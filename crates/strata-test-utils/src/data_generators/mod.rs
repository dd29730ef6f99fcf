//! Fixture backends and stack definitions.

use serde_json::json;
use strata_core::{
    ActionDeclaration, InputDeclaration, ParamBag, ResourceSpec, StackDefinition, StackType,
};

use crate::implementations::{FakeBackend, FakeResourceType};

/// Backend with `vm`, `volume` and `network` types
///
/// VMs expose `start`, `stop`, `attach` and `resize`; volumes expose
/// `attach`. Factory calls on `vm` return a job settling after two polls.
pub fn standard_backend() -> FakeBackend {
    FakeBackend::new()
        .with_type(
            "vm",
            FakeResourceType::new()
                .with_capabilities(&["start", "stop", "attach", "resize"])
                .with_detail(json!({
                    "status": "running",
                    "addresses": [{"ip": "10.0.0.5", "network": "net-a"}],
                    "volumes": []
                }))
                .with_job_polls(2)
                .with_effect("stop", |detail, _| detail["status"] = json!("stopped"))
                .with_effect("start", |detail, _| detail["status"] = json!("running")),
        )
        .with_type(
            "volume",
            FakeResourceType::new()
                .with_capabilities(&["attach"])
                .with_detail(json!({"status": "available"})),
        )
        .with_type("network", FakeResourceType::new())
}

/// Backend with the `instance` and `volume` types SQL stacks are built from
///
/// Attaching a volume appends it to the instance's `volumes`; `stop` and
/// `start` flip the instance status.
pub fn sql_backend() -> FakeBackend {
    FakeBackend::new()
        .with_type(
            "instance",
            FakeResourceType::new()
                .with_capabilities(&[
                    "wait_reachable",
                    "run_playbook",
                    "add_volume",
                    "extend_filesystem",
                    "start",
                    "stop",
                    "restart",
                    "register_lb",
                    "deregister_lb",
                ])
                .with_detail(json!({
                    "status": "running",
                    "addresses": [{"ip": "10.1.0.7", "network": "backend"}],
                    "volumes": [{"id": "boot", "size_gb": 20, "bootable": true}]
                }))
                .with_job_polls(1)
                .with_effect("add_volume", |detail, params| {
                    let volume = json!({
                        "id": params.get("volume_id").cloned().unwrap_or_default(),
                        "size_gb": params.get("size_gb").cloned().unwrap_or_default(),
                    });
                    if let Some(volumes) = detail["volumes"].as_array_mut() {
                        volumes.push(volume);
                    }
                })
                .with_effect("stop", |detail, _| detail["status"] = json!("stopped"))
                .with_effect("start", |detail, _| detail["status"] = json!("running")),
        )
        .with_type(
            "volume",
            FakeResourceType::new().with_detail(json!({"status": "available"})),
        )
}

/// Three chained actions: network, vm on the network, volume sized by input
pub fn three_tier_definition(name: &str) -> StackDefinition {
    StackDefinition::new(name, StackType::Generic)
        .with_input(InputDeclaration::new("size", json!("10")))
        .with_action(ActionDeclaration::new(
            "net",
            ResourceSpec::create("network"),
            ParamBag::new().with("cidr", json!("10.0.0.0/24")),
        ))
        .with_action(ActionDeclaration::new(
            "vm",
            ResourceSpec::create("vm"),
            ParamBag::new()
                .with("network", json!("$$action_resource.net$$"))
                .with("flavor", json!("small")),
        ))
        .with_action(ActionDeclaration::new(
            "data",
            ResourceSpec::create("volume"),
            ParamBag::new()
                .with("size", json!("$$input.size$$"))
                .with("near", json!("$$action_resource.vm::addresses.0.ip$$")),
        ))
        .with_output("address", json!("$$action_resource.vm::addresses.0.ip$$"))
}
