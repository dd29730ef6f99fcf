//! Mock implementation of the ResourceBackend trait.

use async_trait::async_trait;
use mockall::mock;
use serde_json::Value;
use strata_core::{
    BackendError, NestedJobRef, NestedJobState, OperationResult, ParamBag, Provisioned,
    ResourceBackend, ResourceId,
};

mock! {
    pub ResourceBackend {}

    #[async_trait]
    impl ResourceBackend for ResourceBackend {
        fn resource_types(&self) -> Vec<String>;
        async fn create(&self, resource_type: &str, params: &ParamBag) -> Result<Provisioned, BackendError>;
        async fn get(&self, id: &ResourceId) -> Result<Value, BackendError>;
        async fn capabilities(&self, id: &ResourceId) -> Result<Vec<String>, BackendError>;
        async fn invoke(&self, id: &ResourceId, operation: &str, params: &ParamBag) -> Result<OperationResult, BackendError>;
        async fn poll(&self, job: &NestedJobRef) -> Result<NestedJobState, BackendError>;
    }
}

/// A mock that fails the test on any call except `resource_types`
pub fn create_untouchable_backend(types: &[&str]) -> MockResourceBackend {
    let types: Vec<String> = types.iter().map(|t| t.to_string()).collect();
    let mut mock = MockResourceBackend::new();
    mock.expect_resource_types().returning(move || types.clone());
    mock.expect_create().never();
    mock.expect_get().never();
    mock.expect_capabilities().never();
    mock.expect_invoke().never();
    mock.expect_poll().never();
    mock
}
