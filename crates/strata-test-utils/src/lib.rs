//! Testing utilities for the Strata engine.
//!
//! This crate provides mocks, test implementations (fakes), an engine
//! harness over in-memory state, assertion helpers and fixture data.

pub mod assertions;
pub mod builders;
pub mod data_generators;
pub mod implementations;
pub mod mocks;

/// Re-export commonly used types for convenience
pub use mockall;

pub use builders::TestHarness;
pub use implementations::{FakeBackend, FakeResourceType, RecordingEventHandler};
pub use mocks::MockResourceBackend;

/// Install a test subscriber once; safe to call from every test
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
