//! Delete workflow: reverse order, preserve and tolerant teardown

use pretty_assertions::assert_eq;

use strata_core::{CoreError, JobStatus, ParamBag, ResourceBackend, Step};
use strata_integration_tests::utils::{harness, resource_of, three_tier};
use strata_test_utils::assertions::assert_call_order;

#[tokio::test]
async fn test_delete_expunges_actions_in_reverse_creation_order() {
    let harness = harness();
    let stack = three_tier(&harness, "shop").await;
    let net = resource_of(&harness, &stack, "net").await;
    let vm = resource_of(&harness, &stack, "vm").await;
    let data = resource_of(&harness, &stack, "data").await;
    harness.backend.clear_calls();

    let job = harness.service.delete(&stack.id, false).await.unwrap();
    let expunged: Vec<&str> = job
        .steps
        .iter()
        .filter_map(|s| match s {
            Step::ExpungeAction { action } => Some(action.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(expunged, vec!["shop-data", "shop-vm", "shop-net"]);

    let done = harness.run(&job).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);

    assert_call_order(
        &harness,
        "invoke:",
        &[
            &format!("invoke:{}:delete", data),
            &format!("invoke:{}:delete", vm),
            &format!("invoke:{}:delete", net),
        ],
    );
    assert!(!harness.backend.exists(vm.as_str()));
    assert!(harness.repos.actions.list_for_stack(&stack.id).await.unwrap().is_empty());
    assert!(harness.topology.resources_of(&stack.id).await.unwrap().is_empty());
    assert!(matches!(
        harness.stack(&stack.id).await.unwrap_err(),
        CoreError::StackNotFound(_)
    ));
}

#[tokio::test]
async fn test_preserve_keeps_every_backing_resource() {
    let harness = harness();
    let stack = three_tier(&harness, "shop").await;
    let vm = resource_of(&harness, &stack, "vm").await;
    harness.backend.clear_calls();

    let job = harness.service.delete(&stack.id, true).await.unwrap();
    harness.run(&job).await.unwrap();

    assert_eq!(harness.backend.count_calls("invoke:"), 0);
    assert!(harness.backend.exists(vm.as_str()));
    assert_eq!(harness.backend.resources_of_type("volume").len(), 1);
    assert!(harness.service.find_by_name("shop").await.unwrap().is_none());
}

#[tokio::test]
async fn test_resource_already_gone_does_not_stop_teardown() {
    let harness = harness();
    let stack = three_tier(&harness, "shop").await;
    let data = resource_of(&harness, &stack, "data").await;
    harness
        .backend
        .invoke(&data, "delete", &ParamBag::new())
        .await
        .unwrap();

    let job = harness.service.delete(&stack.id, false).await.unwrap();
    let done = harness.run(&job).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert!(harness.backend.resources_of_type("vm").is_empty());
    assert!(harness.backend.resources_of_type("network").is_empty());
}

#[tokio::test]
async fn test_backend_failure_during_delete_leaves_remaining_actions() {
    let harness = harness();
    let stack = three_tier(&harness, "shop").await;
    harness.backend.fail_operation("delete", "volume is busy");

    let job = harness.service.delete(&stack.id, false).await.unwrap();
    let err = harness.run(&job).await.unwrap_err();

    assert!(err.to_string().contains("volume is busy"));
    let remaining = harness.repos.actions.list_for_stack(&stack.id).await.unwrap();
    assert_eq!(remaining.len(), 3);
    let stack = harness.stack(&stack.id).await.unwrap();
    assert!(stack.status_reason.unwrap().contains("volume is busy"));
}
