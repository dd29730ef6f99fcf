//! Stack-to-stack links through workflows and the topology service

use pretty_assertions::assert_eq;

use strata_core::{EngineConfig, LinkKind, NodeRef, Step, UpdateDefinition};
use strata_integration_tests::utils::{fast_config, harness, harness_with, three_tier};

#[tokio::test]
async fn test_unlinking_from_replica_removes_both_edges() {
    let harness = harness();
    let master = three_tier(&harness, "primary").await;
    let replica = three_tier(&harness, "secondary").await;

    let link = UpdateDefinition::default().with_additional_step(Step::LinkStacks {
        master: master.id.clone(),
        kind: LinkKind::ReplicaOf,
    });
    let job = harness.service.update(&replica.id, &link).await.unwrap();
    harness.run(&job).await.unwrap();

    let forward = harness.topology.links_of(&replica.id).await.unwrap();
    assert_eq!(forward.len(), 1);
    assert_eq!(forward[0].target, NodeRef::Stack(master.id.clone()));
    assert_eq!(forward[0].kind, LinkKind::ReplicaOf);
    let back = harness.topology.links_of(&master.id).await.unwrap();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].kind, LinkKind::MasterOf);

    let unlink = UpdateDefinition::default().with_additional_step(Step::UnlinkStacks {
        master: master.id.clone(),
        kind: LinkKind::ReplicaOf,
    });
    let job = harness.service.update(&replica.id, &unlink).await.unwrap();
    harness.run(&job).await.unwrap();

    assert!(harness.topology.links_of(&replica.id).await.unwrap().is_empty());
    assert!(harness.topology.links_of(&master.id).await.unwrap().is_empty());
    // Resource ownership edges are untouched
    assert_eq!(harness.topology.resources_of(&master.id).await.unwrap().len(), 3);
}

#[tokio::test]
async fn test_repeated_links_accumulate_by_default() {
    let harness = harness();
    let master = three_tier(&harness, "primary").await;
    let replica = three_tier(&harness, "secondary").await;

    for _ in 0..2 {
        harness
            .topology
            .add_link(&replica.id, &master.id, LinkKind::ReplicaOf)
            .await
            .unwrap();
    }

    assert_eq!(harness.topology.links_of(&replica.id).await.unwrap().len(), 2);
    assert_eq!(harness.topology.links_of(&master.id).await.unwrap().len(), 2);

    let removed = harness
        .topology
        .remove_link(&replica.id, &master.id, LinkKind::ReplicaOf)
        .await
        .unwrap();
    assert_eq!(removed, 4);
}

#[tokio::test]
async fn test_deduplication_when_configured() {
    let harness = harness_with(EngineConfig {
        deduplicate_links: true,
        ..fast_config()
    });
    let master = three_tier(&harness, "primary").await;
    let replica = three_tier(&harness, "secondary").await;

    let first = harness
        .topology
        .add_link(&replica.id, &master.id, LinkKind::ReplicaOf)
        .await
        .unwrap();
    let second = harness
        .topology
        .add_link(&replica.id, &master.id, LinkKind::ReplicaOf)
        .await
        .unwrap();

    assert_eq!((first, second), (2, 0));
    assert_eq!(harness.topology.links_of(&replica.id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_deleting_a_stack_drops_its_links_on_both_sides() {
    let harness = harness();
    let master = three_tier(&harness, "primary").await;
    let replica = three_tier(&harness, "secondary").await;
    harness
        .topology
        .add_link(&replica.id, &master.id, LinkKind::ReplicaOf)
        .await
        .unwrap();

    let job = harness.service.delete(&replica.id, false).await.unwrap();
    harness.run(&job).await.unwrap();

    assert!(harness.topology.links_of(&master.id).await.unwrap().is_empty());
    let info = harness.service.info(&master.id).await.unwrap();
    assert!(info.links.is_empty());
}
