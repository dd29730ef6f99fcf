use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_monitoring::EngineMetrics;
use tracing::{debug, warn};

use crate::backend::{NestedJobRef, NestedJobState, ResourceBackend};
use crate::{CoreError, EngineConfig};

/// Blocks a step until a backend job settles.
///
/// Polls at a fixed interval. Without a timeout a stuck job stalls the
/// calling step indefinitely.
#[derive(Clone)]
pub struct NestedJobWaiter {
    backend: Arc<dyn ResourceBackend>,
    interval: Duration,
    timeout: Option<Duration>,
}

impl NestedJobWaiter {
    /// Create a waiter with explicit timing
    pub fn new(
        backend: Arc<dyn ResourceBackend>,
        interval: Duration,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            backend,
            interval,
            timeout,
        }
    }

    /// Create a waiter from engine configuration
    pub fn from_config(backend: Arc<dyn ResourceBackend>, config: &EngineConfig) -> Self {
        Self::new(backend, config.poll_interval(), config.nested_job_timeout())
    }

    /// Poll until the job succeeds; failure and timeout become errors
    pub async fn wait(&self, job: &NestedJobRef) -> Result<(), CoreError> {
        let started = Instant::now();
        loop {
            EngineMetrics::record_nested_poll();
            let state = self.backend.poll(job).await?;
            match state {
                NestedJobState::Succeeded => {
                    debug!(job = %job.id, resource = %job.resource_id, "Nested job succeeded");
                    return Ok(());
                }
                NestedJobState::Failed { reason } => {
                    warn!(job = %job.id, resource = %job.resource_id, %reason, "Nested job failed");
                    return Err(CoreError::NestedJobFailed(format!(
                        "job {} ({} on {}): {}",
                        job.id, job.operation, job.resource_id, reason
                    )));
                }
                NestedJobState::Running => {}
            }

            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    return Err(CoreError::Timeout(format!(
                        "job {} ({} on {}) still running after {:?}",
                        job.id, job.operation, job.resource_id, timeout
                    )));
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, OperationResult, Provisioned};
    use crate::{ParamBag, ResourceId};
    use async_trait::async_trait;
    use mockall::mock;
    use serde_json::Value;

    mock! {
        pub Backend {}

        #[async_trait]
        impl ResourceBackend for Backend {
            fn resource_types(&self) -> Vec<String>;
            async fn create(&self, resource_type: &str, params: &ParamBag) -> Result<Provisioned, BackendError>;
            async fn get(&self, id: &ResourceId) -> Result<Value, BackendError>;
            async fn capabilities(&self, id: &ResourceId) -> Result<Vec<String>, BackendError>;
            async fn invoke(&self, id: &ResourceId, operation: &str, params: &ParamBag) -> Result<OperationResult, BackendError>;
            async fn poll(&self, job: &NestedJobRef) -> Result<NestedJobState, BackendError>;
        }
    }

    fn job_ref() -> NestedJobRef {
        NestedJobRef {
            id: "job-1".to_string(),
            resource_id: ResourceId::new("vm-1"),
            operation: "create".to_string(),
        }
    }

    #[tokio::test]
    async fn test_wait_polls_until_success() {
        let mut backend = MockBackend::new();
        let mut seq = mockall::Sequence::new();
        backend
            .expect_poll()
            .times(2)
            .in_sequence(&mut seq)
            .returning(|_| Ok(NestedJobState::Running));
        backend
            .expect_poll()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Ok(NestedJobState::Succeeded));

        let waiter = NestedJobWaiter::new(Arc::new(backend), Duration::from_millis(1), None);
        waiter.wait(&job_ref()).await.unwrap();
    }

    #[tokio::test]
    async fn test_wait_propagates_failure() {
        let mut backend = MockBackend::new();
        backend.expect_poll().returning(|_| {
            Ok(NestedJobState::Failed {
                reason: "disk full".to_string(),
            })
        });

        let waiter = NestedJobWaiter::new(Arc::new(backend), Duration::from_millis(1), None);
        let err = waiter.wait(&job_ref()).await.unwrap_err();
        match err {
            CoreError::NestedJobFailed(msg) => {
                assert!(msg.contains("disk full"));
                assert!(msg.contains("vm-1"));
            }
            other => panic!("Expected NestedJobFailed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_wait_times_out_when_configured() {
        let mut backend = MockBackend::new();
        backend.expect_poll().returning(|_| Ok(NestedJobState::Running));

        let waiter = NestedJobWaiter::new(
            Arc::new(backend),
            Duration::from_millis(2),
            Some(Duration::from_millis(10)),
        );
        let err = waiter.wait(&job_ref()).await.unwrap_err();
        assert!(matches!(err, CoreError::Timeout(_)));
    }
}
