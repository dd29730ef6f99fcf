use chrono::{DateTime, Utc};
use std::fmt::Debug;

use crate::domain::job::JobId;
use crate::domain::stack::StackId;
use crate::domain::step::WorkflowKind;

/// Domain event trait for all job events
pub trait DomainEvent: Debug + Send + Sync {
    /// Returns the type of the event as a string
    fn event_type(&self) -> &'static str;

    /// Returns the job this event belongs to
    fn job_id(&self) -> &JobId;

    /// Returns the timestamp when the event occurred
    fn timestamp(&self) -> DateTime<Utc>;
}

macro_rules! job_event {
    ($name:ident, $event_type:literal) => {
        impl DomainEvent for $name {
            fn event_type(&self) -> &'static str {
                $event_type
            }

            fn job_id(&self) -> &JobId {
                &self.job_id
            }

            fn timestamp(&self) -> DateTime<Utc> {
                self.timestamp
            }
        }
    };
}

/// Event: job created
#[derive(Debug, Clone)]
pub struct JobCreated {
    /// Job id
    pub job_id: JobId,
    /// Stack the job runs against
    pub stack_id: StackId,
    /// Workflow kind
    pub workflow: WorkflowKind,
    /// Number of steps
    pub step_count: usize,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}
job_event!(JobCreated, "job.created");

/// Event: step started
#[derive(Debug, Clone)]
pub struct StepStarted {
    /// Job id
    pub job_id: JobId,
    /// Step identifier
    pub step_id: String,
    /// Step position
    pub step_index: usize,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}
job_event!(StepStarted, "job.step_started");

/// Event: step completed
#[derive(Debug, Clone)]
pub struct StepCompleted {
    /// Job id
    pub job_id: JobId,
    /// Step identifier
    pub step_id: String,
    /// Step position
    pub step_index: usize,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}
job_event!(StepCompleted, "job.step_completed");

/// Event: step failed
#[derive(Debug, Clone)]
pub struct StepFailed {
    /// Job id
    pub job_id: JobId,
    /// Step identifier
    pub step_id: String,
    /// Error message
    pub error: String,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}
job_event!(StepFailed, "job.step_failed");

/// Event: job completed
#[derive(Debug, Clone)]
pub struct JobCompleted {
    /// Job id
    pub job_id: JobId,
    /// Stack the job ran against
    pub stack_id: StackId,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}
job_event!(JobCompleted, "job.completed");

/// Event: job failed
#[derive(Debug, Clone)]
pub struct JobFailed {
    /// Job id
    pub job_id: JobId,
    /// Stack the job ran against
    pub stack_id: StackId,
    /// Error message
    pub error: String,
    /// When it happened
    pub timestamp: DateTime<Utc>,
}
job_event!(JobFailed, "job.failed");
