use crate::{
    domain::events::{
        DomainEvent, JobCompleted, JobCreated, JobFailed, StepCompleted, StepFailed, StepStarted,
    },
    domain::stack::StackId,
    domain::step::{Step, StepOutcome, WorkflowKind},
    CoreError, ParamBag,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Submitted, not picked up yet
    Pending,
    /// Steps are executing
    Running,
    /// Every step completed
    Completed,
    /// A step failed; remaining steps were not run
    Failed,
}

/// Value object: Job ID
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Advisory progress message tied to a step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressMessage {
    /// Step identifier
    pub step_id: String,
    /// Message text
    pub message: String,
    /// When it was reported
    pub timestamp: DateTime<Utc>,
}

/// Aggregate: one sequential run of a step list against a stack
#[derive(Debug, Serialize, Deserialize)]
pub struct Job {
    /// Unique identifier
    pub id: JobId,

    /// Stack the job runs against
    pub stack_id: StackId,

    /// Workflow kind
    pub kind: WorkflowKind,

    /// Ordered step list
    pub steps: Vec<Step>,

    /// Index of the next step to run
    pub current_step: usize,

    /// Accumulated parameter bag
    pub params: ParamBag,

    /// Primary result of each completed step
    pub step_results: Vec<Value>,

    /// Current status
    pub status: JobStatus,

    /// Error message if the job failed
    pub error: Option<String>,

    /// Index of the step that failed
    pub failed_step: Option<usize>,

    /// Progress messages in report order
    pub progress: Vec<ProgressMessage>,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,

    /// Domain events
    #[serde(skip)]
    pub events: Vec<Box<dyn DomainEvent>>,
}

// Domain events are not cloned
impl Clone for Job {
    fn clone(&self) -> Self {
        Self {
            id: self.id.clone(),
            stack_id: self.stack_id.clone(),
            kind: self.kind,
            steps: self.steps.clone(),
            current_step: self.current_step,
            params: self.params.clone(),
            step_results: self.step_results.clone(),
            status: self.status,
            error: self.error.clone(),
            failed_step: self.failed_step,
            progress: self.progress.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
            events: Vec::new(),
        }
    }
}

impl Job {
    /// Create a new pending job
    pub fn new(stack_id: StackId, kind: WorkflowKind, steps: Vec<Step>, params: ParamBag) -> Self {
        let id = JobId(Uuid::new_v4().to_string());
        let now = Utc::now();
        let step_count = steps.len();

        let mut job = Self {
            id: id.clone(),
            stack_id: stack_id.clone(),
            kind,
            steps,
            current_step: 0,
            params,
            step_results: Vec::with_capacity(step_count),
            status: JobStatus::Pending,
            error: None,
            failed_step: None,
            progress: Vec::new(),
            created_at: now,
            updated_at: now,
            events: Vec::with_capacity(8),
        };

        job.record_event(Box::new(JobCreated {
            job_id: id,
            stack_id,
            workflow: kind,
            step_count,
            timestamp: now,
        }));

        job
    }

    /// PENDING -> RUNNING
    pub fn start(&mut self) -> Result<(), CoreError> {
        if self.status != JobStatus::Pending {
            return Err(CoreError::InvalidStateTransition(format!(
                "Cannot start job {} in state {:?}",
                self.id, self.status
            )));
        }
        self.status = JobStatus::Running;
        self.update_timestamp();
        Ok(())
    }

    /// The step that runs next
    pub fn current(&self) -> Option<&Step> {
        if self.status != JobStatus::Running {
            return None;
        }
        self.steps.get(self.current_step)
    }

    /// Whether the job still occupies its stack
    pub fn is_active(&self) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Running)
    }

    /// Record that the current step began
    pub fn begin_step(&mut self) -> Result<(), CoreError> {
        let step_id = self.require_current("begin")?.id();
        self.record_event(Box::new(StepStarted {
            job_id: self.id.clone(),
            step_id,
            step_index: self.current_step,
            timestamp: Utc::now(),
        }));
        self.update_timestamp();
        Ok(())
    }

    /// Store the step's outcome and advance
    pub fn complete_step(&mut self, outcome: StepOutcome) -> Result<(), CoreError> {
        let step_id = self.require_current("complete")?.id();

        for message in outcome.progress {
            self.report_progress(&step_id, message);
        }
        self.params = outcome.params;
        self.step_results.push(outcome.result);

        self.record_event(Box::new(StepCompleted {
            job_id: self.id.clone(),
            step_id,
            step_index: self.current_step,
            timestamp: Utc::now(),
        }));

        self.current_step += 1;
        self.update_timestamp();
        Ok(())
    }

    /// Fail the current step; the job stops here
    pub fn fail_step(&mut self, error: &CoreError) -> Result<(), CoreError> {
        let step_id = self.require_current("fail")?.id();
        let message = error.to_string();

        self.report_progress(&step_id, format!("Step failed: {}", message));
        self.status = JobStatus::Failed;
        self.failed_step = Some(self.current_step);
        self.error = Some(message.clone());

        let now = Utc::now();
        self.record_event(Box::new(StepFailed {
            job_id: self.id.clone(),
            step_id,
            error: message.clone(),
            timestamp: now,
        }));
        self.record_event(Box::new(JobFailed {
            job_id: self.id.clone(),
            stack_id: self.stack_id.clone(),
            error: message,
            timestamp: now,
        }));

        self.update_timestamp();
        Ok(())
    }

    /// RUNNING -> COMPLETED once every step ran
    pub fn complete(&mut self) -> Result<(), CoreError> {
        if self.status != JobStatus::Running || self.current_step < self.steps.len() {
            return Err(CoreError::InvalidStateTransition(format!(
                "Cannot complete job {} at step {}/{} in state {:?}",
                self.id,
                self.current_step,
                self.steps.len(),
                self.status
            )));
        }
        self.status = JobStatus::Completed;
        self.record_event(Box::new(JobCompleted {
            job_id: self.id.clone(),
            stack_id: self.stack_id.clone(),
            timestamp: Utc::now(),
        }));
        self.update_timestamp();
        Ok(())
    }

    /// Append a progress message for a step
    pub fn report_progress(&mut self, step_id: &str, message: impl Into<String>) {
        self.progress.push(ProgressMessage {
            step_id: step_id.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    /// Result of a completed step by index
    pub fn result_of(&self, index: usize) -> Option<&Value> {
        self.step_results.get(index)
    }

    /// Record a domain event
    pub fn record_event(&mut self, event: Box<dyn DomainEvent>) {
        self.events.push(event);
    }

    /// Drain recorded events
    pub fn take_events(&mut self) -> Vec<Box<dyn DomainEvent>> {
        std::mem::take(&mut self.events)
    }

    /// Update the timestamp
    #[inline]
    pub fn update_timestamp(&mut self) {
        self.updated_at = Utc::now();
    }

    fn require_current(&self, what: &str) -> Result<&Step, CoreError> {
        self.current().ok_or_else(|| {
            CoreError::InvalidStateTransition(format!(
                "Cannot {} step {} of job {} in state {:?}",
                what, self.current_step, self.id, self.status
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn job() -> Job {
        Job::new(
            StackId("stack-1".to_string()),
            WorkflowKind::Create,
            vec![
                Step::Pre {
                    workflow: WorkflowKind::Create,
                },
                Step::Post {
                    workflow: WorkflowKind::Create,
                },
            ],
            ParamBag::new().with("seed", 1),
        )
    }

    #[test]
    fn test_new_job_records_created_event() {
        let mut job = job();
        assert_eq!(job.status, JobStatus::Pending);
        let events = job.take_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type(), "job.created");
        assert!(job.take_events().is_empty());
    }

    #[test]
    fn test_steps_advance_and_complete() {
        let mut job = job();
        job.start().unwrap();
        assert!(job.start().is_err());

        job.begin_step().unwrap();
        let outcome = StepOutcome::unchanged(&job.params)
            .with_result(json!("ok"))
            .with_progress("opened");
        job.complete_step(outcome).unwrap();
        assert_eq!(job.current_step, 1);
        assert_eq!(job.progress[0].step_id, "pre_create");
        assert!(job.complete().is_err());

        job.begin_step().unwrap();
        job.complete_step(StepOutcome::unchanged(&job.params)).unwrap();
        job.complete().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.result_of(0), Some(&json!("ok")));
    }

    #[test]
    fn test_fail_step_halts_job() {
        let mut job = job();
        job.start().unwrap();
        job.begin_step().unwrap();
        job.fail_step(&CoreError::ReferenceError("x".to_string())).unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.failed_step, Some(0));
        assert!(job.current().is_none());
        assert!(job.begin_step().is_err());

        let types: Vec<_> = job.take_events().iter().map(|e| e.event_type()).collect();
        assert!(types.contains(&"job.step_failed"));
        assert!(types.contains(&"job.failed"));
    }

    #[test]
    fn test_clone_drops_events() {
        let job = job();
        assert!(!job.events.is_empty());
        assert!(job.clone().events.is_empty());
    }
}
