//! Resumption, per-stack guards and nested job handling

use pretty_assertions::assert_eq;

use strata_core::{
    ActionStatus, CoreError, EngineConfig, JobStatus, StackStatus, StepContext,
    StepHandler, UpdateDefinition,
};
use strata_integration_tests::utils::{fast_config, harness, harness_with, three_tier};
use strata_test_utils::assertions::{assert_action_status, assert_stack_status};
use strata_test_utils::data_generators::three_tier_definition;

#[tokio::test]
async fn test_resume_continues_from_recorded_step() {
    let harness = harness();
    let (stack, job) = harness.service.create(&three_tier_definition("shop")).await.unwrap();

    // A worker runs pre, materialize and the first action, then dies
    let mut job = harness.job(&job).await.unwrap();
    job.start().unwrap();
    for _ in 0..3 {
        let step = job.current().cloned().unwrap();
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
        harness.repos.jobs.save(&job).await.unwrap();
    }
    assert_eq!(harness.backend.count_calls("create:"), 1);

    let done = harness.runner.resume(&job.id).await.unwrap();

    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(harness.backend.count_calls("create:network"), 1);
    assert_eq!(harness.backend.count_calls("create:"), 3);
    assert_stack_status(&harness, &stack, StackStatus::Active).await;

    // Resuming a finished job is a no-op
    let again = harness.runner.resume(&job.id).await.unwrap();
    assert_eq!(again.status, JobStatus::Completed);
    assert_eq!(harness.backend.count_calls("create:"), 3);
}

#[tokio::test]
async fn test_second_job_on_same_stack_is_rejected() {
    let harness = harness();
    let (stack, job) = harness.service.create(&three_tier_definition("shop")).await.unwrap();

    let update = harness
        .service
        .update(&stack.id, &UpdateDefinition::default())
        .await
        .unwrap_err();
    assert!(matches!(update, CoreError::PreconditionFailed(ref m) if m.contains("in progress")));
    let delete = harness.service.delete(&stack.id, false).await.unwrap_err();
    assert!(matches!(delete, CoreError::PreconditionFailed(_)));

    harness.run(&job).await.unwrap();
    let delete = harness.service.delete(&stack.id, false).await;
    assert!(delete.is_ok());
}

#[tokio::test]
async fn test_update_requires_active_stack() {
    let harness = harness();
    harness.backend.fail_create("volume", "no capacity");
    let (stack, job) = harness.service.create(&three_tier_definition("shop")).await.unwrap();
    assert!(harness.run(&job).await.is_err());

    let err = harness
        .service
        .update(&stack.id, &UpdateDefinition::default())
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::InvalidStateTransition(_) | CoreError::PreconditionFailed(_)));

    // Cleanup is still possible from the error state
    let job = harness.service.delete(&stack.id, false).await.unwrap();
    harness.run(&job).await.unwrap();
    assert!(harness.backend.resources_of_type("vm").is_empty());
}

#[tokio::test]
async fn test_duplicate_stack_names_are_rejected() {
    let harness = harness();
    three_tier(&harness, "shop").await;

    let err = harness
        .service
        .create(&three_tier_definition("shop"))
        .await
        .unwrap_err();

    assert!(matches!(err, CoreError::ValidationError(ref m) if m.contains("already exists")));
}

#[tokio::test]
async fn test_nested_job_timeout_fails_the_step() {
    let harness = harness_with(EngineConfig {
        nested_job_timeout_secs: Some(0),
        ..fast_config()
    });

    let (stack, job) = harness.service.create(&three_tier_definition("shop")).await.unwrap();
    let err = harness.run(&job).await.unwrap_err();

    assert!(matches!(err, CoreError::Timeout(_)));
    assert_action_status(&harness, &stack, "net", ActionStatus::Active).await;
    assert_action_status(&harness, &stack, "vm", ActionStatus::Error).await;
    assert_stack_status(&harness, &stack, StackStatus::Error).await;
    assert_eq!(harness.backend.count_calls("create:volume"), 0);
}

#[tokio::test]
async fn test_failed_nested_job_carries_context() {
    let harness = harness();
    harness.backend.fail_jobs_of("create", "hypervisor lost");

    let (stack, job) = harness.service.create(&three_tier_definition("shop")).await.unwrap();
    let err = harness.run(&job).await.unwrap_err();

    match err {
        CoreError::NestedJobFailed(message) => {
            assert!(message.contains("hypervisor lost"));
            assert!(message.contains("create"));
        }
        other => panic!("unexpected error {:?}", other),
    }
    let failed = harness.job(&job).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.error.unwrap().contains("hypervisor lost"));
    assert_stack_status(&harness, &stack, StackStatus::Error).await;
}
