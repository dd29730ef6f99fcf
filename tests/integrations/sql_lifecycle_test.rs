//! SQL stacks from request to teardown

use pretty_assertions::assert_eq;
use std::sync::Arc;

use strata_core::{CoreError, JobStatus, LinkKind, ParamBag, Stack, StackStatus};
use strata_engines::{
    ComputeFlavor, ComputeZone, EngineError, EngineKind, HypervisorFamily, MemoryCatalog,
    Network, SecurityPolicy, Site, SqlAttributes, SqlOperation, SqlRequest, SqlStackService,
    VolumeFlavor,
};
use strata_integration_tests::utils::fast_config;
use strata_test_utils::data_generators::sql_backend;
use strata_test_utils::{init_test_logging, TestHarness};

fn catalog() -> MemoryCatalog {
    let catalog = MemoryCatalog::new();
    catalog
        .upsert_zone(ComputeZone {
            name: "us".to_string(),
            hypervisor: HypervisorFamily::Vmware,
        })
        .upsert_site(Site {
            name: "nyc1".to_string(),
            zone: "us".to_string(),
            availability_zone: "us-1b".to_string(),
        })
        .upsert_network(Network {
            name: "east".to_string(),
            site: "nyc1".to_string(),
            cidr: "10.2.0.0/16".to_string(),
        })
        .upsert_policy(SecurityPolicy {
            name: "db".to_string(),
            open_ports: vec![1433, 3306, 5432],
        })
        .upsert_compute_flavor(ComputeFlavor {
            name: "m1.xlarge".to_string(),
            vcpus: 8,
            memory_mb: 16384,
        })
        .upsert_volume_flavor(VolumeFlavor {
            name: "ssd".to_string(),
            iops: 3000,
        });
    catalog
}

fn setup() -> (TestHarness, SqlStackService) {
    init_test_logging();
    let harness = TestHarness::new(sql_backend());
    let service = SqlStackService::new(
        harness.service.clone(),
        Arc::new(catalog()),
        Arc::new(harness.backend.clone()),
        fast_config(),
    );
    (harness, service)
}

fn request(name: &str, engine: EngineKind) -> SqlRequest {
    let mut request = SqlRequest::new(name, engine)
        .placed("us", "nyc1", "east")
        .sized("m1.xlarge", "ssd", 100);
    request.security_policy = Some("db".to_string());
    request
}

async fn build(harness: &TestHarness, service: &SqlStackService, request: SqlRequest) -> Stack {
    let (stack, job) = service.create(request).await.unwrap();
    let job = harness.run(&job).await.unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    harness.stack(&stack.id).await.unwrap()
}

#[tokio::test]
async fn test_postgres_primary_and_replica_lifecycle() {
    let (harness, service) = setup();
    let primary = build(
        &harness,
        &service,
        request("ledger", EngineKind::PostgreSql)
            .with_app("ledger_app", "ledger")
            .with_extension("pgcrypto"),
    )
    .await;
    let replica = build(
        &harness,
        &service,
        request("ledger-ro", EngineKind::PostgreSql).replica_of("ledger"),
    )
    .await;

    let edges = harness.topology.links_of(&replica.id).await.unwrap();
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].kind, LinkKind::ReplicaOf);

    // VMware sites present their disks as SCSI devices
    let attrs = SqlAttributes::from_stack(&primary).unwrap();
    assert_eq!(attrs.device_path, "/dev/sdb");
    assert_eq!(attrs.extensions, vec!["pgcrypto".to_string()]);

    let job = service
        .run_operation(
            &primary.id,
            "create_database",
            ParamBag::new().with("name", "audit"),
        )
        .await
        .unwrap();
    assert_eq!(harness.run(&job).await.unwrap().status, JobStatus::Completed);

    let detail = service.detail(&primary.id).await.unwrap();
    assert_eq!(detail.sql.listener_port, 5432);
    assert_eq!(detail.sql.allocated_storage_gb, 100);
    assert_eq!(detail.info.status, StackStatus::Active);
    assert!(detail
        .info
        .actions
        .iter()
        .any(|a| a.name.starts_with("ledger-create-database-")));

    let job = service.delete(&replica.id, false).await.unwrap();
    harness.run(&job).await.unwrap();
    assert!(harness.topology.links_of(&primary.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unsupported_engine_operation_makes_no_backend_calls() {
    let (harness, service) = setup();
    let stack = build(&harness, &service, request("billing", EngineKind::SqlServer)).await;
    let actions_before = harness.repos.actions.list_for_stack(&stack.id).await.unwrap().len();
    harness.backend.clear_calls();

    let err = service
        .run_operation(&stack.id, "enable_log_shipping", ParamBag::new())
        .await
        .unwrap_err();

    assert_eq!(
        err.to_string(),
        "Operation 'enable_log_shipping' is not supported by SQL Server"
    );
    assert!(harness.backend.calls().is_empty());
    let actions_after = harness.repos.actions.list_for_stack(&stack.id).await.unwrap().len();
    assert_eq!(actions_after, actions_before);

    let offered = service.operations(&stack.id).await.unwrap();
    assert!(!offered.contains(&SqlOperation::EnableLogShipping));
    assert!(offered.contains(&SqlOperation::ResizeStorage));
}

#[tokio::test]
async fn test_growth_rejection_creates_no_volume() {
    let (harness, service) = setup();
    let stack = build(&harness, &service, request("billing", EngineKind::SqlServer)).await;
    let volumes = harness.backend.resources_of_type("volume").len();

    // Data plus backup volumes make up the current allocation
    let err = service.grow(&stack.id, 200).await.unwrap_err();
    assert!(matches!(err, EngineError::Core(CoreError::PreconditionFailed(_))));
    assert_eq!(harness.backend.resources_of_type("volume").len(), volumes);

    let job = service.grow(&stack.id, 250).await.unwrap();
    harness.run(&job).await.unwrap();
    assert_eq!(harness.backend.resources_of_type("volume").len(), volumes + 1);
    let stack = harness.stack(&stack.id).await.unwrap();
    assert_eq!(SqlAttributes::from_stack(&stack).unwrap().allocated_storage_gb, 250);
}
