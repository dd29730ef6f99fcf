//! Create, update and operation workflows end to end

use pretty_assertions::assert_eq;
use serde_json::json;

use strata_core::{
    ActionDeclaration, ActionStatus, CoreError, JobStatus, ParamBag, ResourceSpec, StackStatus,
    Step, StepContext, StepHandler, UpdateDefinition, WorkflowCompiler, WorkflowKind,
};
use strata_integration_tests::utils::{harness, resource_of, text_at, three_tier};
use strata_test_utils::assertions::{assert_action_status, assert_stack_status};
use strata_test_utils::data_generators::three_tier_definition;
use strata_test_utils::mocks::create_untouchable_backend;

#[tokio::test]
async fn test_run_action_steps_keep_declaration_order_inside_brackets() {
    let harness = harness();
    let compiled = harness
        .service
        .compiler()
        .compile_for_create(&three_tier_definition("shop"))
        .unwrap();

    assert_eq!(compiled.steps.first(), Some(&Step::Pre { workflow: WorkflowKind::Create }));
    assert_eq!(compiled.steps.last(), Some(&Step::Post { workflow: WorkflowKind::Create }));
    let brackets = compiled
        .steps
        .iter()
        .filter(|s| matches!(s, Step::Pre { .. } | Step::Post { .. }))
        .count();
    assert_eq!(brackets, 2);

    let run_actions: Vec<&str> = compiled
        .steps
        .iter()
        .filter_map(|s| match s {
            Step::RunAction { action } => Some(action.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(run_actions, vec!["shop-net", "shop-vm", "shop-data"]);
}

#[tokio::test]
async fn test_create_builds_resources_in_order_and_resolves_outputs() {
    let harness = harness();
    let stack = three_tier(&harness, "shop").await;

    assert_eq!(stack.status, StackStatus::Active);
    assert_eq!(stack.outputs["address"], json!("10.0.0.5"));

    let creates: Vec<String> = harness
        .backend
        .calls()
        .into_iter()
        .filter(|c| c.starts_with("create:"))
        .collect();
    assert_eq!(creates, vec!["create:network", "create:vm", "create:volume"]);

    // The volume saw its references resolved against the earlier actions
    let net = resource_of(&harness, &stack, "net").await;
    let vm = resource_of(&harness, &stack, "vm").await;
    let data = resource_of(&harness, &stack, "data").await;
    let vm_detail = harness.backend.detail(vm.as_str()).unwrap();
    assert_eq!(text_at(&vm_detail, "/params/network"), Some(net.as_str()));
    let volume = harness.backend.detail(data.as_str()).unwrap();
    assert_eq!(text_at(&volume, "/params/near"), Some("10.0.0.5"));
    assert_eq!(text_at(&volume, "/params/size"), Some("10"));

    let info = harness.service.info(&stack.id).await.unwrap();
    assert_eq!(info.action_count, 3);
    assert_eq!(info.resource_count, 3);
    assert!(info.actions.iter().all(|a| a.status == ActionStatus::Active));
}

#[tokio::test]
async fn test_actions_are_written_by_the_materialize_step() {
    let harness = harness();
    let (stack, job) = harness.service.create(&three_tier_definition("shop")).await.unwrap();

    // Submitting only stores the stack and the pending job
    assert!(harness.service.actions(&stack.id).await.unwrap().is_empty());
    assert_eq!(harness.service.info(&stack.id).await.unwrap().action_count, 0);

    let mut job = harness.job(&job).await.unwrap();
    job.start().unwrap();
    for expected in [Step::Pre { workflow: WorkflowKind::Create }, Step::MaterializeActions] {
        let step = job.current().cloned().unwrap();
        assert_eq!(step, expected);
        job.begin_step().unwrap();
        let ctx = StepContext {
            job_id: job.id.clone(),
            stack_id: job.stack_id.clone(),
            workflow: job.kind,
            step_index: job.current_step,
            params: job.params.clone(),
        };
        let outcome = harness.steps.run_step(&ctx, &step).await.unwrap();
        job.complete_step(outcome).unwrap();
    }

    assert_eq!(job.step_results[1], json!({"actions": 3, "created": 3}));
    assert!(job.params.get("actions").is_none());

    let actions = harness.service.actions(&stack.id).await.unwrap();
    let names: Vec<&str> = actions.iter().map(|a| a.name.as_str()).collect();
    assert_eq!(names, vec!["shop-net", "shop-vm", "shop-data"]);
    assert!(actions.iter().all(|a| a.status == ActionStatus::Pending));
    assert_eq!(harness.backend.count_calls("create:"), 0);
}

#[tokio::test]
async fn test_inputs_are_substituted_and_runtime_references_kept() {
    let harness = harness();
    let definition = three_tier_definition("shop").with_action(ActionDeclaration::new(
        "counter",
        ResourceSpec::create("volume"),
        ParamBag::new()
            .with("count", json!("$$input.size$$"))
            .with("origin", json!("$$resource.vol-7::zone$$")),
    ));

    let compiled = harness.service.compiler().compile_for_create(&definition).unwrap();
    let counter = compiled.actions.iter().find(|a| a.short_name == "counter").unwrap();

    assert_eq!(counter.params.get("count"), Some(&json!("10")));
    assert_eq!(counter.params.get("origin"), Some(&json!("$$resource.vol-7::zone$$")));
    let data = compiled.actions.iter().find(|a| a.short_name == "data").unwrap();
    assert_eq!(
        data.params.get("near"),
        Some(&json!("$$action_resource.vm::addresses.0.ip$$"))
    );
}

#[tokio::test]
async fn test_unknown_input_is_rejected_before_any_backend_call() {
    let harness = harness();
    let definition = three_tier_definition("shop").with_action(ActionDeclaration::new(
        "broken",
        ResourceSpec::create("volume"),
        ParamBag::new().with("size", json!("$$input.missing$$")),
    ));

    let err = harness.service.create(&definition).await.unwrap_err();

    assert!(matches!(err, CoreError::ValidationError(_) | CoreError::ReferenceError(_)));
    assert!(harness.backend.calls().is_empty());
    assert!(harness.service.find_by_name("shop").await.unwrap().is_none());
}

#[test]
fn test_compilation_never_touches_the_backend() {
    let backend = create_untouchable_backend(&["network", "vm", "volume"]);
    let compiler = WorkflowCompiler::for_backend(&backend);

    let compiled = compiler.compile_for_create(&three_tier_definition("shop")).unwrap();
    assert_eq!(compiled.actions.len(), 3);

    let definition = three_tier_definition("shop").with_action(ActionDeclaration::new(
        "db",
        ResourceSpec::create("database"),
        ParamBag::new(),
    ));
    let err = compiler.compile_for_create(&definition).unwrap_err();
    assert!(
        matches!(&err, CoreError::ValidationError(msg) if msg.contains("Unknown resource type: database")),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_failed_action_is_terminal_for_its_job() {
    let harness = harness();
    harness.backend.fail_create("volume", "quota exceeded");

    let (stack, job) = harness.service.create(&three_tier_definition("shop")).await.unwrap();
    let err = harness.run(&job).await.unwrap_err();
    assert!(err.to_string().contains("quota exceeded"));

    assert_action_status(&harness, &stack, "net", ActionStatus::Active).await;
    assert_action_status(&harness, &stack, "vm", ActionStatus::Active).await;
    assert_action_status(&harness, &stack, "data", ActionStatus::Error).await;
    assert_stack_status(&harness, &stack, StackStatus::Error).await;

    let failed = harness.job(&job).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert_eq!(failed.failed_step, Some(4));
    let resumed = harness.runner.resume(&job.id).await.unwrap_err();
    assert!(matches!(resumed, CoreError::PreconditionFailed(_)));

    let data = harness.action(&stack, "data").await.unwrap().unwrap();
    assert!(data.error.unwrap().contains("quota exceeded"));
    assert_eq!(harness.backend.count_calls("create:volume"), 1);
}

#[tokio::test]
async fn test_update_appends_actions_after_existing_ones() {
    let harness = harness();
    let stack = three_tier(&harness, "shop").await;

    let update = UpdateDefinition::default().with_action(ActionDeclaration::new(
        "logs",
        ResourceSpec::create("volume"),
        ParamBag::new().with("size", json!(5)),
    ));
    let job = harness.service.update(&stack.id, &update).await.unwrap();
    assert_eq!(harness.stack(&stack.id).await.unwrap().status, StackStatus::Updating);

    harness.run(&job).await.unwrap();

    let logs = harness.action(&stack, "logs").await.unwrap().unwrap();
    assert_eq!(logs.sequence, 3);
    assert_eq!(logs.status, ActionStatus::Active);
    assert_stack_status(&harness, &stack, StackStatus::Active).await;
}

#[tokio::test]
async fn test_operation_without_capability_never_invokes_backend() {
    let harness = harness();
    let stack = three_tier(&harness, "shop").await;
    let vm = resource_of(&harness, &stack, "vm").await;
    harness.backend.clear_calls();

    let operation = UpdateDefinition::default().with_action(ActionDeclaration::new(
        "explode",
        ResourceSpec::on_resource(vm.as_str(), "explode"),
        ParamBag::new(),
    ));
    let job = harness.service.run_operation(&stack.id, &operation).await.unwrap();
    let err = harness.run(&job).await.unwrap_err();

    assert!(matches!(err, CoreError::UnsupportedOperation { ref operation, .. } if operation == "explode"));
    assert_eq!(harness.backend.count_calls("invoke:"), 0);
    // Operation failures leave the stack operable
    assert_stack_status(&harness, &stack, StackStatus::Active).await;
}

#[tokio::test]
async fn test_operation_runs_capability_and_reports_events() {
    let harness = harness();
    let stack = three_tier(&harness, "shop").await;
    let vm = resource_of(&harness, &stack, "vm").await;

    let operation = UpdateDefinition::default().with_action(ActionDeclaration::new(
        "stop-vm",
        ResourceSpec::on_resource(vm.as_str(), "stop"),
        ParamBag::new().with("force", true),
    ));
    let job = harness.service.run_operation(&stack.id, &operation).await.unwrap();
    let done = harness.run(&job).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(
        harness.backend.detail(vm.as_str()).unwrap()["status"],
        json!("stopped")
    );
    let events = harness.events.event_types(&job.id);
    assert_eq!(events.last(), Some(&"job.completed"));
    assert!(events.contains(&"job.step_started"));
    assert!(!events.contains(&"job.failed"));
}
