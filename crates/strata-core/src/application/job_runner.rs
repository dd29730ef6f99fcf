use async_trait::async_trait;
use std::sync::Arc;
use std::time::Instant;
use strata_monitoring::EngineMetrics;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::application::steps::StepHandler;
use crate::domain::events::DomainEvent;
use crate::domain::job::{Job, JobId, JobStatus};
use crate::domain::repository::JobRepository;
use crate::domain::step::StepContext;
use crate::CoreError;

/// Receives the domain events a job records
#[async_trait]
pub trait JobEventHandler: Send + Sync {
    /// Handle a domain event
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError>;
}

/// Writes every job event to the log
#[derive(Debug, Default, Clone)]
pub struct LoggingEventHandler;

#[async_trait]
impl JobEventHandler for LoggingEventHandler {
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError> {
        debug!(
            event_type = event.event_type(),
            job = %event.job_id(),
            timestamp = %event.timestamp(),
            "Job event"
        );
        Ok(())
    }
}

/// Runs a job's steps strictly in order, persisting after every step.
///
/// The job record carries the step index and parameter bag, so a job can be
/// picked up again by any runner after a crash between steps.
#[derive(Clone)]
pub struct JobRunner {
    jobs: Arc<dyn JobRepository>,
    handler: Arc<dyn StepHandler>,
    events: Arc<dyn JobEventHandler>,
}

impl JobRunner {
    /// Create a job runner
    pub fn new(
        jobs: Arc<dyn JobRepository>,
        handler: Arc<dyn StepHandler>,
        events: Arc<dyn JobEventHandler>,
    ) -> Self {
        Self {
            jobs,
            handler,
            events,
        }
    }

    /// Persist a new job without running it
    pub async fn submit(&self, job: &mut Job) -> Result<JobId, CoreError> {
        self.jobs.save(job).await?;
        self.dispatch_events(job).await?;
        Ok(job.id.clone())
    }

    /// Run a pending job to the end.
    ///
    /// A failed step stops the job and its error is returned; the failed job
    /// record stays in the repository.
    #[instrument(skip(self), fields(job = %job_id))]
    pub async fn run(&self, job_id: &JobId) -> Result<Job, CoreError> {
        let mut job = self.load(job_id).await?;
        job.start()?;
        self.jobs.save(&job).await?;
        info!(stack = %job.stack_id, kind = %job.kind, steps = job.steps.len(), "Job started");
        self.drive(job).await
    }

    /// Continue a running job from its recorded step
    #[instrument(skip(self), fields(job = %job_id))]
    pub async fn resume(&self, job_id: &JobId) -> Result<Job, CoreError> {
        let mut job = self.load(job_id).await?;
        match job.status {
            JobStatus::Pending => {
                job.start()?;
                self.jobs.save(&job).await?;
            }
            JobStatus::Running => {}
            JobStatus::Completed => return Ok(job),
            JobStatus::Failed => {
                return Err(CoreError::PreconditionFailed(format!(
                    "Job {} failed at step {:?} and cannot be resumed",
                    job.id, job.failed_step
                )))
            }
        }
        info!(stack = %job.stack_id, step = job.current_step, "Job resumed");
        self.drive(job).await
    }

    /// Run a job on the tokio runtime
    pub fn spawn(&self, job_id: JobId) -> JoinHandle<Result<Job, CoreError>> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(&job_id).await })
    }

    async fn drive(&self, mut job: Job) -> Result<Job, CoreError> {
        while let Some(step) = job.current().cloned() {
            job.begin_step()?;
            self.jobs.save(&job).await?;
            self.dispatch_events(&mut job).await?;

            let ctx = StepContext {
                job_id: job.id.clone(),
                stack_id: job.stack_id.clone(),
                workflow: job.kind,
                step_index: job.current_step,
                params: job.params.clone(),
            };

            debug!(step = %step, index = ctx.step_index, "Running step");
            let started = Instant::now();
            let result = self.handler.run_step(&ctx, &step).await;
            let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
            EngineMetrics::record_step(step.label(), elapsed_ms, result.is_ok());

            match result {
                Ok(outcome) => {
                    for message in &outcome.progress {
                        info!(step = %step, "{}", message);
                    }
                    job.complete_step(outcome)?;
                    self.jobs.save(&job).await?;
                    self.dispatch_events(&mut job).await?;
                }
                Err(e) => {
                    error!(step = %step, error = %e, "Step failed");
                    job.fail_step(&e)?;
                    self.jobs.save(&job).await?;
                    self.dispatch_events(&mut job).await?;
                    EngineMetrics::record_job(job.kind.as_str(), false);
                    if let Err(cleanup) = self.handler.on_job_failed(&job, &e).await {
                        error!(error = %cleanup, "Failed to record job failure on stack");
                    }
                    return Err(e);
                }
            }
        }

        job.complete()?;
        self.jobs.save(&job).await?;
        self.dispatch_events(&mut job).await?;
        EngineMetrics::record_job(job.kind.as_str(), true);
        info!(stack = %job.stack_id, kind = %job.kind, "Job completed");
        Ok(job)
    }

    async fn load(&self, job_id: &JobId) -> Result<Job, CoreError> {
        self.jobs
            .find_by_id(job_id)
            .await?
            .ok_or_else(|| CoreError::JobNotFound(job_id.0.clone()))
    }

    async fn dispatch_events(&self, job: &mut Job) -> Result<(), CoreError> {
        for event in job.take_events() {
            self.events.handle_event(event).await?;
        }
        Ok(())
    }
}
