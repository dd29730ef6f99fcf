// Strata Integration Tests
//
// Cross-crate scenarios run against the in-memory state store and the fake
// backend from strata-test-utils.

/// Shared setup for the scenario tests
pub mod utils {
    use serde_json::Value;
    use strata_core::{EngineConfig, ResourceId, Stack};
    use strata_test_utils::data_generators::{standard_backend, three_tier_definition};
    use strata_test_utils::{init_test_logging, TestHarness};
    use tracing::debug;

    /// Harness over the standard fixture backend
    pub fn harness() -> TestHarness {
        init_test_logging();
        TestHarness::new(standard_backend())
    }

    /// Harness over the standard fixture backend with custom settings
    pub fn harness_with(config: EngineConfig) -> TestHarness {
        init_test_logging();
        TestHarness::with_config(standard_backend(), &config)
    }

    /// Create and run the three-tier fixture stack
    pub async fn three_tier(harness: &TestHarness, name: &str) -> Stack {
        let (stack, job) = harness
            .create_stack(&three_tier_definition(name))
            .await
            .unwrap_or_else(|e| panic!("stack {} failed to build: {}", name, e));
        debug!(stack = %stack.name, job = %job.id, "Fixture stack built");
        stack
    }

    /// Resource bound to an action of a stack
    pub async fn resource_of(harness: &TestHarness, stack: &Stack, short_name: &str) -> ResourceId {
        harness
            .action(stack, short_name)
            .await
            .ok()
            .flatten()
            .and_then(|a| a.resource_id)
            .unwrap_or_else(|| panic!("action {} has no resource", short_name))
    }

    /// Settings with millisecond polling
    pub fn fast_config() -> EngineConfig {
        EngineConfig {
            poll_interval_ms: 1,
            ..EngineConfig::default()
        }
    }

    /// String at a JSON pointer, if any
    pub fn text_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
        value.pointer(pointer).and_then(Value::as_str)
    }
}
