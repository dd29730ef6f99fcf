//! Assertion helpers for stack state.

use strata_core::{ActionStatus, Stack, StackStatus};

use crate::builders::TestHarness;

/// Assert a stack's persisted status
pub async fn assert_stack_status(harness: &TestHarness, stack: &Stack, expected: StackStatus) {
    let current = harness
        .stack(&stack.id)
        .await
        .unwrap_or_else(|e| panic!("stack {} could not be loaded: {}", stack.name, e));
    assert_eq!(
        current.status, expected,
        "stack {} status (reason: {:?})",
        stack.name, current.status_reason
    );
}

/// Assert an action's persisted status
pub async fn assert_action_status(
    harness: &TestHarness,
    stack: &Stack,
    short_name: &str,
    expected: ActionStatus,
) {
    let action = harness
        .action(stack, short_name)
        .await
        .unwrap_or_else(|e| panic!("action {} could not be loaded: {}", short_name, e))
        .unwrap_or_else(|| panic!("action {} does not exist", short_name));
    assert_eq!(
        action.status, expected,
        "action {} status (error: {:?})",
        action.name, action.error
    );
}

/// Assert the order of `prefix` calls in the backend call log
pub fn assert_call_order(harness: &TestHarness, prefix: &str, expected: &[&str]) {
    let calls: Vec<String> = harness
        .backend
        .calls()
        .into_iter()
        .filter(|c| c.starts_with(prefix))
        .collect();
    let expected: Vec<String> = expected.iter().map(|c| c.to_string()).collect();
    assert_eq!(calls, expected);
}
