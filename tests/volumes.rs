// tests/volumes.rs

mod common;
use crate::common::*;

use std::time::Duration;

use kubelaunch::cluster::ClaimSpec;
use kubelaunch::errors::LaunchError;
use kubelaunch::labels::OwnerScope;
use kubelaunch::types::UnitPhase;

#[tokio::test]
async fn submitted_task_mounts_the_owners_volume() -> TestResult {
    init_tracing();
    let (engine, cluster) = engine();
    let alice = owner("alice");

    let volume_id = engine
        .create_volume(&VolumeDefinitionBuilder::new("datasets", "50Gi").build(), &alice)
        .await?;
    let claim_name = format!("datasets-{volume_id}");
    assert_eq!(engine.resolve_volume("datasets", &alice).await?, claim_name);

    let task = TaskDefinitionBuilder::new("ls /data")
        .num_nodes(2)
        .volume("/data", "datasets")
        .build();
    let task_id = engine.submit(&task, &alice).await?;

    for unit in units_of(cluster.units(), &task_id) {
        assert_eq!(unit.mounts.len(), 1);
        assert_eq!(unit.mounts[0].mount_path, "/data");
        assert_eq!(unit.mounts[0].claim_name, claim_name);
    }
    Ok(())
}

#[tokio::test]
async fn other_owners_name_falls_back_to_literal_claim() -> TestResult {
    let (engine, cluster) = engine();
    let alice = owner("alice");
    let bob = owner("bob");

    engine
        .create_volume(&VolumeDefinitionBuilder::new("datasets", "10Gi").build(), &alice)
        .await?;

    // Bob has no volume of that name: the name is used as a claim name as-is.
    assert_eq!(engine.resolve_volume("datasets", &bob).await?, "datasets");

    let task = TaskDefinitionBuilder::new("ls").volume("/data", "datasets").build();
    let task_id = engine.submit(&task, &bob).await?;
    let units = units_of(cluster.units(), &task_id);
    assert_eq!(units[0].mounts[0].claim_name, "datasets");
    Ok(())
}

#[tokio::test]
async fn ambiguous_volume_name_is_rejected() -> TestResult {
    let (engine, cluster) = engine();
    let alice = owner("alice");

    for id in ["aaaa0001", "aaaa0002"] {
        cluster.add_claim(ClaimSpec {
            name: format!("dup-{id}"),
            labels: labels(&[
                ("type", "volume"),
                ("volume-id", id),
                ("volume-name", "dup"),
                ("owner", "alice"),
            ]),
            annotations: Default::default(),
            size: "1Gi".to_string(),
            storage_class: None,
            access_modes: vec!["ReadWriteOnce".to_string()],
        });
    }

    let err = engine.resolve_volume("dup", &alice).await.unwrap_err();
    assert!(err.is_validation(), "{err}");

    let task = TaskDefinitionBuilder::new("ls").volume("/d", "dup").build();
    assert!(engine.submit(&task, &alice).await.is_err());
    assert!(cluster.units().is_empty());
    Ok(())
}

#[tokio::test]
async fn volume_in_use_cannot_be_deleted() -> TestResult {
    let (engine, cluster) = engine();
    let alice = owner("alice");

    let volume_id = engine
        .create_volume(&VolumeDefinitionBuilder::new("ckpt", "5Gi").build(), &alice)
        .await?;
    let task = TaskDefinitionBuilder::new("train").volume("/ckpt", "ckpt").build();
    let task_id = engine.submit(&task, &alice).await?;

    match engine.delete_volume(&volume_id, &alice).await {
        Err(LaunchError::VolumeInUse { users, .. }) => assert_eq!(users.len(), 1),
        other => panic!("expected VolumeInUse, got {other:?}"),
    }

    cluster.set_node_phase(&task_id, 0, UnitPhase::Succeeded);
    engine.delete_volume(&volume_id, &alice).await?;
    assert!(cluster.claims().is_empty());
    Ok(())
}

#[tokio::test]
async fn only_the_owner_sees_and_deletes_a_volume() -> TestResult {
    let (engine, cluster) = engine();
    let alice = owner("alice");
    let bob = owner("bob");

    let volume_id = engine
        .create_volume(
            &VolumeDefinitionBuilder::new("scratch", "1Gi")
                .storage_class("fast")
                .access_modes(&["ReadWriteMany"])
                .build(),
            &alice,
        )
        .await?;

    let snap = engine.volume_status(&volume_id, &alice).await?;
    assert_eq!(snap.name, "scratch");
    assert_eq!(snap.storage_class.as_deref(), Some("fast"));
    assert_eq!(snap.access_modes, vec!["ReadWriteMany".to_string()]);
    assert_eq!(snap.metadata.claim_name, format!("scratch-{volume_id}"));

    assert!(engine.volume_status(&volume_id, &bob).await.unwrap_err().is_not_found());
    assert!(engine.delete_volume(&volume_id, &bob).await.unwrap_err().is_not_found());
    assert_eq!(cluster.claims().len(), 1);
    Ok(())
}

#[tokio::test]
async fn volumes_list_newest_first() -> TestResult {
    let (engine, _cluster) = engine();
    let alice = owner("alice");
    let bob = owner("bob");

    let a = engine
        .create_volume(&VolumeDefinitionBuilder::new("one", "1Gi").build(), &alice)
        .await?;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = engine
        .create_volume(&VolumeDefinitionBuilder::new("two", "1Gi").build(), &alice)
        .await?;
    engine
        .create_volume(&VolumeDefinitionBuilder::new("three", "1Gi").build(), &bob)
        .await?;

    let ids: Vec<String> = engine
        .list_volumes(&OwnerScope::owner(&alice))
        .await?
        .into_iter()
        .map(|v| v.volume_id)
        .collect();
    assert_eq!(ids, vec![b, a]);
    assert_eq!(engine.list_volumes(&OwnerScope::AllOwners).await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn mounts_are_fixed_at_submission() -> TestResult {
    let (engine, cluster) = engine();
    let alice = owner("alice");

    let first = engine
        .create_volume(&VolumeDefinitionBuilder::new("datasets", "1Gi").build(), &alice)
        .await?;
    let task = TaskDefinitionBuilder::new("ls").volume("/data", "datasets").build();
    let task_id = engine.submit(&task, &alice).await?;

    cluster.set_node_phase(&task_id, 0, UnitPhase::Succeeded);
    engine.delete_volume(&first, &alice).await?;
    let second = engine
        .create_volume(&VolumeDefinitionBuilder::new("datasets", "1Gi").build(), &alice)
        .await?;
    assert_ne!(first, second);
    assert_eq!(
        engine.resolve_volume("datasets", &alice).await?,
        format!("datasets-{second}")
    );

    let units = units_of(cluster.units(), &task_id);
    assert_eq!(units[0].mounts[0].claim_name, format!("datasets-{first}"));
    Ok(())
}
