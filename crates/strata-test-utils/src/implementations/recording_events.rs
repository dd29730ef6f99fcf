//! Job event handler that keeps what it sees.

use async_trait::async_trait;
use parking_lot::Mutex;
use strata_core::domain::events::DomainEvent;
use strata_core::{CoreError, JobEventHandler, JobId};

/// Records `(job, event type)` pairs in arrival order
#[derive(Debug, Default)]
pub struct RecordingEventHandler {
    events: Mutex<Vec<(JobId, &'static str)>>,
}

impl RecordingEventHandler {
    /// An empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Event types recorded for a job
    pub fn event_types(&self, job: &JobId) -> Vec<&'static str> {
        self.events
            .lock()
            .iter()
            .filter(|(id, _)| id == job)
            .map(|(_, kind)| *kind)
            .collect()
    }

    /// Total number of recorded events
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

#[async_trait]
impl JobEventHandler for RecordingEventHandler {
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError> {
        self.events
            .lock()
            .push((event.job_id().clone(), event.event_type()));
        Ok(())
    }
}
