use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use strata_core::{
    domain::repository::{ActionRepository, JobRepository, ResourceGraph, StackRepository},
    Action, CoreError, Edge, Job, JobId, LinkKind, NodeRef, Stack, StackId,
};

/// In-memory implementation of the StackRepository
pub struct InMemoryStackRepository {
    stacks: Arc<RwLock<HashMap<String, Stack>>>,
}

impl InMemoryStackRepository {
    /// Create a new in-memory stack repository
    pub fn new(stacks: Arc<RwLock<HashMap<String, Stack>>>) -> Self {
        Self { stacks }
    }
}

#[async_trait]
impl StackRepository for InMemoryStackRepository {
    async fn find_by_id(&self, id: &StackId) -> Result<Option<Stack>, CoreError> {
        let stacks = self.stacks.read().await;
        Ok(stacks.get(&id.0).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Stack>, CoreError> {
        let stacks = self.stacks.read().await;
        Ok(stacks.values().find(|s| s.name == name).cloned())
    }

    async fn save(&self, stack: &Stack) -> Result<(), CoreError> {
        let mut stacks = self.stacks.write().await;
        if let Some(existing) = stacks.values().find(|s| s.name == stack.name && s.id != stack.id) {
            return Err(CoreError::StateStoreError(format!(
                "Stack name '{}' is already used by {}",
                stack.name, existing.id
            )));
        }
        stacks.insert(stack.id.0.clone(), stack.clone());
        Ok(())
    }

    async fn delete(&self, id: &StackId) -> Result<(), CoreError> {
        let mut stacks = self.stacks.write().await;
        stacks.remove(&id.0);
        debug!(stack = %id, "Deleted stack record");
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Stack>, CoreError> {
        let stacks = self.stacks.read().await;
        let mut result: Vec<Stack> = stacks.values().cloned().collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        Ok(result)
    }
}

/// In-memory implementation of the ActionRepository
pub struct InMemoryActionRepository {
    actions: Arc<RwLock<HashMap<String, HashMap<String, Action>>>>,
}

impl InMemoryActionRepository {
    /// Create a new in-memory action repository
    pub fn new(actions: Arc<RwLock<HashMap<String, HashMap<String, Action>>>>) -> Self {
        Self { actions }
    }
}

#[async_trait]
impl ActionRepository for InMemoryActionRepository {
    async fn find_by_name(
        &self,
        stack_id: &StackId,
        name: &str,
    ) -> Result<Option<Action>, CoreError> {
        let actions = self.actions.read().await;
        Ok(actions
            .get(&stack_id.0)
            .and_then(|by_name| by_name.get(name))
            .cloned())
    }

    async fn list_for_stack(&self, stack_id: &StackId) -> Result<Vec<Action>, CoreError> {
        let actions = self.actions.read().await;
        let mut result: Vec<Action> = actions
            .get(&stack_id.0)
            .map(|by_name| by_name.values().cloned().collect())
            .unwrap_or_default();
        result.sort_by_key(|a| a.sequence);
        Ok(result)
    }

    async fn save(&self, action: &Action) -> Result<(), CoreError> {
        let mut actions = self.actions.write().await;
        actions
            .entry(action.stack_id.0.clone())
            .or_default()
            .insert(action.name.clone(), action.clone());
        Ok(())
    }

    async fn delete(&self, stack_id: &StackId, name: &str) -> Result<(), CoreError> {
        let mut actions = self.actions.write().await;
        if let Some(by_name) = actions.get_mut(&stack_id.0) {
            by_name.remove(name);
            if by_name.is_empty() {
                actions.remove(&stack_id.0);
            }
        }
        Ok(())
    }
}

/// In-memory implementation of the JobRepository
pub struct InMemoryJobRepository {
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl InMemoryJobRepository {
    /// Create a new in-memory job repository
    pub fn new(jobs: Arc<RwLock<HashMap<String, Job>>>) -> Self {
        Self { jobs }
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn find_by_id(&self, id: &JobId) -> Result<Option<Job>, CoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs.get(&id.0).cloned())
    }

    async fn save(&self, job: &Job) -> Result<(), CoreError> {
        let mut jobs = self.jobs.write().await;
        jobs.insert(job.id.0.clone(), job.clone());
        Ok(())
    }

    async fn find_active_for_stack(&self, stack_id: &StackId) -> Result<Option<Job>, CoreError> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .values()
            .find(|j| &j.stack_id == stack_id && j.is_active())
            .cloned())
    }

    async fn list_for_stack(&self, stack_id: &StackId) -> Result<Vec<Job>, CoreError> {
        let jobs = self.jobs.read().await;
        let mut result: Vec<Job> = jobs
            .values()
            .filter(|j| &j.stack_id == stack_id)
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(result)
    }
}

/// In-memory edge list implementing the ResourceGraph
pub struct InMemoryResourceGraph {
    edges: Arc<RwLock<Vec<Edge>>>,
}

impl InMemoryResourceGraph {
    /// Create a new in-memory resource graph
    pub fn new(edges: Arc<RwLock<Vec<Edge>>>) -> Self {
        Self { edges }
    }
}

#[async_trait]
impl ResourceGraph for InMemoryResourceGraph {
    async fn add_edge(&self, edge: Edge) -> Result<(), CoreError> {
        let mut edges = self.edges.write().await;
        edges.push(edge);
        Ok(())
    }

    async fn remove_edges(
        &self,
        source: &NodeRef,
        target: &NodeRef,
        kind: LinkKind,
    ) -> Result<usize, CoreError> {
        let mut edges = self.edges.write().await;
        let before = edges.len();
        edges.retain(|e| !e.connects(source, target, kind));
        Ok(before - edges.len())
    }

    async fn edges_from(&self, node: &NodeRef) -> Result<Vec<Edge>, CoreError> {
        let edges = self.edges.read().await;
        Ok(edges.iter().filter(|e| &e.source == node).cloned().collect())
    }

    async fn edges_to(&self, node: &NodeRef) -> Result<Vec<Edge>, CoreError> {
        let edges = self.edges.read().await;
        Ok(edges.iter().filter(|e| &e.target == node).cloned().collect())
    }
}
