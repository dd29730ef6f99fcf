//! Repository traits for the Strata engine
//!
//! Persistence lives outside the engine; implement these traits to plug in
//! a store. `strata-state-inmemory` provides the in-memory versions.

use async_trait::async_trait;

use super::action::Action;
use super::job::{Job, JobId};
use super::link::{Edge, LinkKind, NodeRef};
use super::stack::{Stack, StackId};
use crate::CoreError;

/// Repository for stacks
#[async_trait]
pub trait StackRepository: Send + Sync {
    /// Find a stack by ID
    async fn find_by_id(&self, id: &StackId) -> Result<Option<Stack>, CoreError>;

    /// Find a stack by its unique name
    async fn find_by_name(&self, name: &str) -> Result<Option<Stack>, CoreError>;

    /// Save a stack
    async fn save(&self, stack: &Stack) -> Result<(), CoreError>;

    /// Delete a stack record
    async fn delete(&self, id: &StackId) -> Result<(), CoreError>;

    /// List all stacks
    async fn list(&self) -> Result<Vec<Stack>, CoreError>;
}

/// Repository for actions
#[async_trait]
pub trait ActionRepository: Send + Sync {
    /// Find an action by its full name within a stack
    async fn find_by_name(&self, stack_id: &StackId, name: &str)
        -> Result<Option<Action>, CoreError>;

    /// All actions of a stack, ordered by creation sequence
    async fn list_for_stack(&self, stack_id: &StackId) -> Result<Vec<Action>, CoreError>;

    /// Save an action
    async fn save(&self, action: &Action) -> Result<(), CoreError>;

    /// Delete an action by full name
    async fn delete(&self, stack_id: &StackId, name: &str) -> Result<(), CoreError>;
}

/// Repository for jobs
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Find a job by ID
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>, CoreError>;

    /// Save a job
    async fn save(&self, job: &Job) -> Result<(), CoreError>;

    /// The pending or running job of a stack, if any
    async fn find_active_for_stack(&self, stack_id: &StackId) -> Result<Option<Job>, CoreError>;

    /// All jobs of a stack, oldest first
    async fn list_for_stack(&self, stack_id: &StackId) -> Result<Vec<Job>, CoreError>;
}

/// Typed edge store linking stacks to resources and to each other
#[async_trait]
pub trait ResourceGraph: Send + Sync {
    /// Record an edge
    async fn add_edge(&self, edge: Edge) -> Result<(), CoreError>;

    /// Remove every edge matching the endpoints and kind; returns how many
    async fn remove_edges(
        &self,
        source: &NodeRef,
        target: &NodeRef,
        kind: LinkKind,
    ) -> Result<usize, CoreError>;

    /// Edges leaving a node, in insertion order
    async fn edges_from(&self, node: &NodeRef) -> Result<Vec<Edge>, CoreError>;

    /// Edges arriving at a node, in insertion order
    async fn edges_to(&self, node: &NodeRef) -> Result<Vec<Edge>, CoreError>;
}
