//! Reference resolution against live stacks

use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::Arc;

use strata_core::{CoreError, ReferenceResolver};
use strata_integration_tests::utils::{harness, resource_of, three_tier};
use strata_test_utils::data_generators::three_tier_definition;
use strata_test_utils::TestHarness;

fn resolver(harness: &TestHarness) -> ReferenceResolver {
    ReferenceResolver::new(harness.repos.actions.clone(), Arc::new(harness.backend.clone()))
}

#[tokio::test]
async fn test_indexed_path_resolves_after_action_produced_resource() {
    let harness = harness();
    let stack = three_tier(&harness, "shop").await;

    let value = resolver(&harness)
        .resolve(&stack, &json!("$$action_resource.vm::addresses.0.ip$$"))
        .await
        .unwrap();

    assert_eq!(value, json!("10.0.0.5"));
}

#[tokio::test]
async fn test_reference_before_resource_exists_is_an_error() {
    let harness = harness();
    // Compiled and persisted, but the job never ran
    let (stack, _job) = harness.service.create(&three_tier_definition("shop")).await.unwrap();

    let err = resolver(&harness)
        .resolve(&stack, &json!("$$action_resource.vm::addresses.0.ip$$"))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::ReferenceError(_)));
    assert!(harness.backend.calls().is_empty());
}

#[tokio::test]
async fn test_values_without_placeholders_are_untouched() {
    let harness = harness();
    let stack = three_tier(&harness, "shop").await;
    harness.backend.clear_calls();
    let tree = json!({"name": "db", "sizes": [1, 2, {"deep": "value $ not a ref"}]});

    let resolved = resolver(&harness).resolve(&stack, &tree).await.unwrap();
    let again = resolver(&harness).resolve(&stack, &resolved).await.unwrap();

    assert_eq!(resolved, tree);
    assert_eq!(again, tree);
    assert!(harness.backend.calls().is_empty());
}

#[tokio::test]
async fn test_embedded_and_direct_resource_references() {
    let harness = harness();
    let stack = three_tier(&harness, "shop").await;
    let vm = resource_of(&harness, &stack, "vm").await;

    let tree = json!({
        "url": "postgres://$$action_resource.vm::addresses.0.ip$$:5432/app",
        "vm": "$$action_resource.vm$$",
        "status": format!("$$resource.{}::status$$", vm),
    });
    let resolved = resolver(&harness).resolve(&stack, &tree).await.unwrap();

    assert_eq!(resolved["url"], json!("postgres://10.0.0.5:5432/app"));
    assert_eq!(resolved["vm"], json!(vm.as_str()));
    assert_eq!(resolved["status"], json!("running"));
}

#[tokio::test]
async fn test_missing_field_and_unknown_action_are_errors() {
    let harness = harness();
    let stack = three_tier(&harness, "shop").await;
    let resolver = resolver(&harness);

    let missing = resolver
        .resolve(&stack, &json!("$$action_resource.vm::addresses.3.ip$$"))
        .await
        .unwrap_err();
    assert!(matches!(missing, CoreError::ReferenceError(_)));

    let unknown = resolver
        .resolve(&stack, &json!("$$action_resource.ghost::id$$"))
        .await
        .unwrap_err();
    assert!(matches!(unknown, CoreError::ReferenceError(ref m) if m.contains("ghost")));
}
