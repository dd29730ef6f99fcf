//! In-memory state store for Strata
//!
//! This crate provides in-memory implementations of the repository traits
//! defined in strata-core. It is primarily useful for development, tests
//! and single-process deployments where persistence is not required.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

pub mod repositories;
pub use repositories::{
    InMemoryActionRepository, InMemoryJobRepository, InMemoryResourceGraph,
    InMemoryStackRepository,
};

use strata_core::{
    domain::repository::{ActionRepository, JobRepository, ResourceGraph, StackRepository},
    Action, Edge, Job, Stack,
};

/// Repositories handed out by the provider
#[derive(Clone)]
pub struct Repositories {
    /// Stack store
    pub stacks: Arc<dyn StackRepository>,
    /// Action store
    pub actions: Arc<dyn ActionRepository>,
    /// Job store
    pub jobs: Arc<dyn JobRepository>,
    /// Resource graph
    pub graph: Arc<dyn ResourceGraph>,
}

/// Provider for in-memory state store repositories
///
/// Repositories created from the same provider share storage.
pub struct InMemoryStateStoreProvider {
    stacks: Arc<RwLock<HashMap<String, Stack>>>,

    // Keyed by stack id, then full action name
    actions: Arc<RwLock<HashMap<String, HashMap<String, Action>>>>,

    jobs: Arc<RwLock<HashMap<String, Job>>>,

    edges: Arc<RwLock<Vec<Edge>>>,
}

impl InMemoryStateStoreProvider {
    /// Create a new in-memory state store provider
    pub fn new() -> Self {
        Self {
            stacks: Arc::new(RwLock::new(HashMap::new())),
            actions: Arc::new(RwLock::new(HashMap::new())),
            jobs: Arc::new(RwLock::new(HashMap::new())),
            edges: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Create the full set of repositories over the shared storage
    pub fn create_repositories(&self) -> Repositories {
        Repositories {
            stacks: Arc::new(InMemoryStackRepository::new(self.stacks.clone())),
            actions: Arc::new(InMemoryActionRepository::new(self.actions.clone())),
            jobs: Arc::new(InMemoryJobRepository::new(self.jobs.clone())),
            graph: Arc::new(InMemoryResourceGraph::new(self.edges.clone())),
        }
    }
}

impl Default for InMemoryStateStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}
