#![forbid(unsafe_code)]

mod common;

use std::time::Duration;

use common::*;
use invsync_core::objects::{Application, ApplicationInstance, Project};
use invsync_core::{InventoryObject, Kind, Operation};
use invsync_kubehub::fixtures;
use serde_json::json;

fn project(id: &str, name: &str) -> InventoryObject {
    InventoryObject::Project(Project { external_id: id.into(), display_name: name.into(), ..Default::default() })
}

fn instance(id: &str, name: &str, project: &str, apps: &[&str]) -> InventoryObject {
    InventoryObject::ApplicationInstance(ApplicationInstance {
        external_id: id.into(),
        display_name: name.into(),
        container_project_id: project.into(),
        container_application_ids: apps.iter().map(|s| s.to_string()).collect(),
        ..Default::default()
    })
}

fn application(id: &str, name: &str, project: &str) -> InventoryObject {
    InventoryObject::Application(Application {
        external_id: id.into(),
        display_name: name.into(),
        container_project_id: project.into(),
        ..Default::default()
    })
}

#[tokio::test]
async fn orphan_is_deleted_even_if_pod_exists() {
    let h = harness(10, Duration::from_secs(60));
    shop(&h.cluster);
    {
        let mut st = h.engine.state().await;
        st.stores.upsert(project("ns-1", "shop")).unwrap();
        st.stores.upsert(instance("pod-0", "web-0", "ns-1", &[])).unwrap();
        st.stores.upsert(instance("pod-1", "web-1", "ns-missing", &[])).unwrap();
    }
    let report = h.engine.collect_garbage().await;
    assert_eq!(report.deleted, 1);
    assert_eq!(ops(&h.inventory.submitted()[0]), vec![(
        Operation::Delete,
        "ContainerApplicationInstance".to_string(),
        "pod-1".to_string()
    )]);
    let st = h.engine.state().await;
    assert!(st.stores.lookup(Kind::ApplicationInstance, "pod-0").is_some());
    assert!(st.stores.lookup(Kind::ApplicationInstance, "pod-1").is_none());
}

#[tokio::test]
async fn vanished_namespace_takes_its_children_in_one_write() {
    let h = harness(10, Duration::from_secs(60));
    shop(&h.cluster);
    {
        let mut st = h.engine.state().await;
        st.stores.upsert(project("ns-1", "shop")).unwrap();
        st.stores.upsert(project("ns-old", "old")).unwrap();
        st.stores.upsert(application("svc-old", "api", "ns-old")).unwrap();
    }
    let report = h.engine.collect_garbage().await;
    assert_eq!(report.deleted, 2);
    let batches = h.inventory.submitted();
    assert_eq!(batches.len(), 1);
    assert_eq!(ops(&batches[0]), vec![
        (Operation::Delete, "ContainerApplication".to_string(), "svc-old".to_string()),
        (Operation::Delete, "ContainerProject".to_string(), "ns-old".to_string()),
    ]);
    let st = h.engine.state().await;
    assert!(st.stores.lookup(Kind::Project, "ns-1").is_some());
    assert_eq!(st.stores.total(), 1);
}

#[tokio::test]
async fn recreated_pod_and_gone_service_are_collected() {
    let h = harness(10, Duration::from_secs(60));
    shop(&h.cluster);
    // web-0 now runs under a new identity; the service behind svc-1 is gone.
    h.cluster.put_pod(fixtures::pod("shop", "web-0", "pod-0b", None, None));
    {
        let mut st = h.engine.state().await;
        st.stores.upsert(project("ns-1", "shop")).unwrap();
        st.stores.upsert(application("svc-1", "web", "ns-1")).unwrap();
        st.stores.upsert(instance("pod-0", "web-0", "ns-1", &["svc-1"])).unwrap();
        st.stores.upsert(instance("pod-1", "web-1", "ns-1", &["svc-1"])).unwrap();
    }
    let report = h.engine.collect_garbage().await;
    assert_eq!(report.deleted, 2);
    assert_eq!(report.updated, 1);
    assert_eq!(ops(&h.inventory.submitted()[0]), vec![
        (Operation::Delete, "ContainerApplicationInstance".to_string(), "pod-0".to_string()),
        (Operation::Update, "ContainerApplicationInstance".to_string(), "pod-1".to_string()),
        (Operation::Delete, "ContainerApplication".to_string(), "svc-1".to_string()),
    ]);
    let st = h.engine.state().await;
    assert!(app_ids(&st.stores, "pod-1").is_empty());
}

#[tokio::test]
async fn failed_gc_write_keeps_everything() {
    let h = harness(10, Duration::from_secs(60));
    {
        let mut st = h.engine.state().await;
        st.stores.upsert(project("ns-old", "old")).unwrap();
    }
    h.inventory.set_fail_submits(true);
    let report = h.engine.collect_garbage().await;
    assert!(report.submit_failed);
    assert_eq!(report.deleted, 0);
    assert!(h.engine.state().await.stores.lookup(Kind::Project, "ns-old").is_some());
}

#[tokio::test]
async fn bootstrap_sweeps_dead_letters_and_enqueues_cluster() {
    let mut h = harness(10, Duration::from_secs(60));
    shop(&h.cluster);
    h.inventory.seed(Kind::Project, vec![json!({
        "resource_type": "ContainerProject", "external_id": "ns-1", "display_name": "shop", "status": "UP"
    })]);
    h.inventory.seed(Kind::ApplicationInstance, vec![
        json!({ "resource_type": "ContainerApplicationInstance", "external_id": "pod-0",
                "display_name": "web-0", "container_project_id": "ns-1" }),
        json!({ "resource_type": "ContainerApplicationInstance", "external_id": "pod-x", "display_name": "stray" }),
    ]);

    h.engine.bootstrap().await.unwrap();

    assert_eq!(ops(&h.inventory.submitted()[0]), vec![(
        Operation::Delete,
        "ContainerApplicationInstance".to_string(),
        "pod-x".to_string()
    )]);
    {
        let st = h.engine.state().await;
        assert!(st.dead_letters.is_empty());
        assert_eq!(st.stores.get(Kind::ApplicationInstance).len(), 1);
    }
    assert_eq!(h.rx.recv().await, Some(identity().change_key()));

    // The cluster key builds the cluster entry.
    let report = h.engine.accept(identity().change_key()).await;
    assert!(report.is_none());
    h.engine.tick().await.expect("flush");
    let st = h.engine.state().await;
    match st.stores.lookup(Kind::Cluster, &identity().id) {
        Some(InventoryObject::Cluster(c)) => assert_eq!(c.display_name, "prod"),
        other => panic!("cluster not mirrored: {:?}", other),
    }
}

#[tokio::test]
async fn dead_letters_survive_a_failed_sweep() {
    let h = harness(10, Duration::from_secs(60));
    h.inventory.seed(Kind::Application, vec![json!({
        "resource_type": "ContainerApplication", "external_id": "svc-x", "display_name": "stray"
    })]);
    h.inventory.fail_next_submits(1);

    h.engine.bootstrap().await.unwrap();
    assert_eq!(h.engine.state().await.dead_letters.len(), 1);
    assert_eq!(h.inventory.submit_count(), 0);

    let report = h.engine.collect_garbage().await;
    assert!(!report.submit_failed);
    assert_eq!(report.dead_letters_swept, 1);
    assert_eq!(ops(&h.inventory.submitted()[0]), vec![(
        Operation::Delete,
        "ContainerApplication".to_string(),
        "svc-x".to_string()
    )]);
    assert!(h.engine.state().await.dead_letters.is_empty());
}

#[tokio::test]
async fn bootstrap_fails_when_listing_fails() {
    let h = harness(10, Duration::from_secs(60));
    h.inventory.set_fail_list(true);
    assert!(h.engine.bootstrap().await.is_err());
}
