use std::sync::Arc;
use std::time::Duration;

use strata_core::{
    Action, CoreError, EngineConfig, Job, JobRunner, NestedJobWaiter, Stack, StackDefinition,
    StackId, StackService, StackServiceDeps, TopologyService, WorkflowCompiler, WorkflowSteps,
};
use strata_state_inmemory::{InMemoryStateStoreProvider, Repositories};

use crate::implementations::{FakeBackend, RecordingEventHandler};

/// Fully wired engine over in-memory state and a fake backend
#[derive(Clone)]
pub struct TestHarness {
    /// The backend, for seeding and inspecting resources
    pub backend: FakeBackend,
    /// Shared repositories
    pub repos: Repositories,
    /// Topology service over the shared graph
    pub topology: TopologyService,
    /// Step catalogue
    pub steps: Arc<WorkflowSteps>,
    /// Job runner
    pub runner: JobRunner,
    /// Stack service
    pub service: StackService,
    /// Every job event the runner dispatched
    pub events: Arc<RecordingEventHandler>,
}

impl TestHarness {
    /// Harness with millisecond polling and default settings
    pub fn new(backend: FakeBackend) -> Self {
        let config = EngineConfig {
            poll_interval_ms: 1,
            ..EngineConfig::default()
        };
        Self::with_config(backend, &config)
    }

    /// Harness honouring the given configuration
    pub fn with_config(backend: FakeBackend, config: &EngineConfig) -> Self {
        let repos = InMemoryStateStoreProvider::new().create_repositories();
        let shared_backend = Arc::new(backend.clone());

        let topology = TopologyService::new(repos.graph.clone(), config.deduplicate_links);
        let waiter = NestedJobWaiter::new(
            shared_backend.clone(),
            Duration::from_millis(config.poll_interval_ms),
            config.nested_job_timeout(),
        );
        let steps = Arc::new(WorkflowSteps::new(
            repos.stacks.clone(),
            repos.actions.clone(),
            shared_backend.clone(),
            waiter,
            topology.clone(),
        ));
        let events = Arc::new(RecordingEventHandler::new());
        let runner = JobRunner::new(repos.jobs.clone(), steps.clone(), events.clone());

        let service = StackService::new(StackServiceDeps {
            stacks: repos.stacks.clone(),
            actions: repos.actions.clone(),
            jobs: repos.jobs.clone(),
            topology: topology.clone(),
            compiler: WorkflowCompiler::for_backend(shared_backend.as_ref()),
        });

        Self {
            backend,
            repos,
            topology,
            steps,
            runner,
            service,
            events,
        }
    }

    /// Create a stack and run its workflow to the end
    pub async fn create_stack(&self, definition: &StackDefinition) -> Result<(Stack, Job), CoreError> {
        let (stack, job) = self.service.create(definition).await?;
        let job = self.runner.run(&job.id).await?;
        let stack = self.stack(&stack.id).await?;
        Ok((stack, job))
    }

    /// Run a submitted job
    pub async fn run(&self, job: &Job) -> Result<Job, CoreError> {
        self.runner.run(&job.id).await
    }

    /// Reload a stack
    pub async fn stack(&self, id: &StackId) -> Result<Stack, CoreError> {
        self.service.load(id).await
    }

    /// Reload an action by its short name
    pub async fn action(&self, stack: &Stack, short_name: &str) -> Result<Option<Action>, CoreError> {
        self.repos
            .actions
            .find_by_name(&stack.id, &stack.action_name(short_name))
            .await
    }

    /// Reload a job
    pub async fn job(&self, job: &Job) -> Result<Job, CoreError> {
        self.repos
            .jobs
            .find_by_id(&job.id)
            .await?
            .ok_or_else(|| CoreError::JobNotFound(job.id.to_string()))
    }
}
