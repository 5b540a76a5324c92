#![forbid(unsafe_code)]

use invsync_core::{InventoryObject, Kind};
use invsync_store::{DeadLetters, MirrorStores, INDEX_APPLICATION};
use serde_json::json;

fn instance(id: &str, apps: &[&str]) -> serde_json::Value {
    json!({
        "resource_type": "ContainerApplicationInstance",
        "external_id": id,
        "display_name": id,
        "container_project_id": "ns-1",
        "container_application_ids": apps,
    })
}

/// Feed raw remote objects the way startup population does: valid ones into the
/// stores, invalid ones aside.
fn replay(stores: &mut MirrorStores, dead: &mut DeadLetters, raw: Vec<serde_json::Value>) {
    for v in raw {
        let obj = InventoryObject::from_value(v).expect("decodes");
        if let Err(e) = stores.upsert(obj.clone()) {
            dead.insert(obj, &e.to_string());
        }
    }
}

#[test]
fn replay_builds_indexes_and_quarantines_invalid_entries() {
    let mut stores = MirrorStores::new();
    let mut dead = DeadLetters::new();

    replay(&mut stores, &mut dead, vec![
        json!({ "resource_type": "ContainerProject", "external_id": "ns-1", "display_name": "shop" }),
        instance("pod-0", &["svc-1"]),
        instance("pod-1", &["svc-1", "svc-2"]),
        // same id again: replaces
        instance("pod-1", &["svc-2"]),
        // no project: quarantined
        json!({ "resource_type": "ContainerApplication", "external_id": "svc-x", "display_name": "x" }),
    ]);

    assert_eq!(stores.total(), 3);
    assert_eq!(dead.len(), 1);
    assert_eq!(dead.entries()[0].external_id(), "svc-x");

    let inst = stores.get(Kind::ApplicationInstance);
    let on_svc1: Vec<_> = inst.by_index(INDEX_APPLICATION, "svc-1").iter().map(|o| o.external_id()).collect();
    assert_eq!(on_svc1, vec!["pod-0"]);
    let on_svc2: Vec<_> = inst.by_index(INDEX_APPLICATION, "svc-2").iter().map(|o| o.external_id()).collect();
    assert_eq!(on_svc2, vec!["pod-1"]);
}
