/// Workflow compiler
pub mod compiler;

/// Runtime reference resolution
pub mod resolver;

/// Nested backend job polling
pub mod waiter;

/// Topology linking between stacks
pub mod topology;

/// Step implementations
pub mod steps;

/// Job runner (step executor)
pub mod job_runner;

/// Stack lifecycle service
pub mod stack_service;
