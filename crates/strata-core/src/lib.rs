//!
//! Strata Core - stack workflow orchestration engine
//!
//! This crate turns a declarative description of a composite resource (a
//! "stack") into an ordered, resumable list of steps, runs those steps
//! against a pluggable resource backend, resolves cross-step value
//! references at runtime and tracks per-action lifecycle state.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - stacks, actions, jobs, steps, references and links
pub mod domain;

/// Application services - compiler, resolver, step executor, topology
pub mod application;

/// Backend resource contract
pub mod backend;

/// Engine configuration
pub mod config;

/// Core types
pub mod types;

/// Error types
pub mod error;

pub use backend::{
    BackendError, NestedJobRef, NestedJobState, OperationResult, Provisioned,
    ResourceBackend,
};
pub use config::EngineConfig;
pub use error::CoreError;
pub use types::{ParamBag, ResourceId};

pub use domain::action::{
    Action, ActionDeclaration, ActionId, ActionStatus, ResourceDescriptor, ResourceSpec,
};
pub use domain::job::{Job, JobId, JobStatus, ProgressMessage};
pub use domain::link::{Edge, LinkKind, NodeRef};
pub use domain::reference::{FieldPath, Reference};
pub use domain::repository::{ActionRepository, JobRepository, ResourceGraph, StackRepository};
pub use domain::stack::{InputDeclaration, Stack, StackId, StackStatus, StackType};
pub use domain::step::{Step, StepContext, StepOutcome, WorkflowKind};

pub use application::compiler::{
    CompiledWorkflow, StackDefinition, UpdateDefinition, WorkflowCompiler,
};
pub use application::job_runner::{JobEventHandler, JobRunner, LoggingEventHandler};
pub use application::resolver::ReferenceResolver;
pub use application::stack_service::{ActionSummary, StackInfo, StackService, StackServiceDeps};
pub use application::steps::{StepHandler, WorkflowSteps};
pub use application::topology::TopologyService;
pub use application::waiter::NestedJobWaiter;
