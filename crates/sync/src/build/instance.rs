//! Pod → ApplicationInstance.

use std::collections::BTreeSet;

use invsync_core::objects::{Addresses, ApplicationInstance, Status};
use invsync_core::{ChangeKey, InventoryObject, NamespacedName};
use invsync_kubehub::{uid_of, ClusterIdentity, ClusterView};
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;

use super::{labels_of, namespace_of, owned_uid, BuildContext, BuildResult, Built, NotReady};

pub(super) fn live_uid(view: &dyn ClusterView, _: &ClusterIdentity, name: &NamespacedName) -> Option<String> {
    owned_uid(view.pod(namespace_of(name), &name.name))
}

fn pod_ips(pod: &Pod) -> Addresses {
    let Some(status) = pod.status.as_ref() else { return Addresses::new() };
    // PodIP is read through JSON: the `ip` field changed optionality across k8s-openapi releases.
    let listed: Addresses = status
        .pod_ips
        .iter()
        .flatten()
        .filter_map(|p| serde_json::to_value(p).ok())
        .filter_map(|v| v.get("ip").and_then(|ip| ip.as_str()).map(str::to_string))
        .filter(|ip| !ip.is_empty())
        .collect();
    if !listed.is_empty() {
        return listed;
    }
    status.pod_ip.iter().filter(|ip| !ip.is_empty()).cloned().collect()
}

fn status_of(pod: &Pod) -> Status {
    match pod.status.as_ref().and_then(|s| s.phase.as_deref()) {
        Some("Running") => Status::Up,
        Some("Succeeded") | Some("Failed") => Status::Down,
        _ => Status::Unknown,
    }
}

/// Ids of services whose endpoints list this pod as a ready address, sorted.
fn backed_services(view: &dyn ClusterView, ns: &str, pod_name: &str) -> Vec<String> {
    let mut ids = BTreeSet::new();
    for ep in view.endpoints_in(ns) {
        let targets_pod = ep
            .subsets
            .iter()
            .flatten()
            .flat_map(|s| s.addresses.iter().flatten())
            .filter_map(|a| a.target_ref.as_ref())
            .any(|t| t.kind.as_deref() == Some("Pod") && t.name.as_deref() == Some(pod_name));
        if !targets_pod {
            continue;
        }
        let Some(svc_name) = ep.metadata.name.as_deref() else { continue };
        if let Some(uid) = view.service(ns, svc_name).as_deref().and_then(uid_of) {
            ids.insert(uid.to_string());
        }
    }
    ids.into_iter().collect()
}

pub(super) fn build(ctx: &BuildContext<'_>, key: &ChangeKey) -> BuildResult {
    let ns = namespace_of(&key.name);
    let pod = ctx
        .view
        .pod(ns, &key.name.name)
        .ok_or_else(|| NotReady(format!("pod {} not in cache", key.name)))?;
    let project_id = ctx.project_id(ns)?;

    let cluster_node_id = match pod.spec.as_ref().and_then(|s| s.node_name.as_deref()) {
        None | Some("") => {
            debug!(pod = %key.name, "pod not scheduled yet");
            String::new()
        }
        Some(node_name) => ctx
            .view
            .node(node_name)
            .as_deref()
            .and_then(uid_of)
            .map(str::to_string)
            .ok_or_else(|| NotReady(format!("node {} of pod {} not in cache", node_name, key.name)))?,
    };

    let inst = ApplicationInstance {
        external_id: key.external_id.clone(),
        display_name: key.name.name.clone(),
        container_project_id: project_id,
        container_application_ids: backed_services(ctx.view, ns, &key.name.name),
        cluster_node_id,
        ip_addresses: pod_ips(&pod),
        labels: labels_of(&pod.metadata),
        status: status_of(&pod),
    };
    Ok(Built::alone(InventoryObject::ApplicationInstance(inst)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use invsync_core::Kind;
    use invsync_kubehub::{fixtures, MockCluster};
    use invsync_store::MirrorStores;

    fn build_pod(c: &MockCluster, name: &str, uid: &str) -> BuildResult {
        let id = ClusterIdentity { id: "c-1".into(), name: "prod".into() };
        let stores = MirrorStores::new();
        let ctx = BuildContext { view: c, cluster: &id, lookup: &stores };
        build(&ctx, &ChangeKey::new(Kind::ApplicationInstance, uid, NamespacedName::namespaced("shop", name)))
    }

    fn inst(r: BuildResult) -> ApplicationInstance {
        match r.unwrap().object {
            InventoryObject::ApplicationInstance(i) => i,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unscheduled_pod_builds_without_node() {
        let c = MockCluster::new();
        c.put_namespace(fixtures::namespace("shop", "ns-1"));
        c.put_pod(fixtures::pod("shop", "web-0", "pod-0", None, None));
        let i = inst(build_pod(&c, "web-0", "pod-0"));
        assert_eq!(i.cluster_node_id, "");
        assert_eq!(i.container_project_id, "ns-1");
    }

    #[test]
    fn declared_but_missing_node_is_not_ready() {
        let c = MockCluster::new();
        c.put_namespace(fixtures::namespace("shop", "ns-1"));
        c.put_pod(fixtures::pod("shop", "web-0", "pod-0", Some("n1"), None));
        assert!(build_pod(&c, "web-0", "pod-0").is_err());
        c.put_node(fixtures::node("n1", "node-1", "192.168.0.1", true));
        assert_eq!(inst(build_pod(&c, "web-0", "pod-0")).cluster_node_id, "node-1");
    }

    #[test]
    fn missing_namespace_is_not_ready() {
        let c = MockCluster::new();
        c.put_pod(fixtures::pod("shop", "web-0", "pod-0", None, None));
        let err = build_pod(&c, "web-0", "pod-0").unwrap_err();
        assert!(err.0.contains("namespace shop"));
    }

    #[test]
    fn application_ids_come_from_ready_endpoints() {
        let c = MockCluster::new();
        c.put_namespace(fixtures::namespace("shop", "ns-1"));
        c.put_pod(fixtures::pod("shop", "web-0", "pod-0", None, Some("10.1.0.5")));
        for (svc, uid) in [("web", "svc-b"), ("web-canary", "svc-a")] {
            c.put_service(fixtures::service("shop", svc, uid, &["10.0.0.1"]));
            c.put_endpoints(fixtures::endpoints("shop", svc, vec![fixtures::pod_address("shop", "web-0", "10.1.0.5")], vec![]));
        }
        c.put_service(fixtures::service("shop", "idle", "svc-c", &["10.0.0.2"]));
        c.put_endpoints(fixtures::endpoints("shop", "idle", vec![], vec![fixtures::pod_address("shop", "web-0", "10.1.0.5")]));
        let i = inst(build_pod(&c, "web-0", "pod-0"));
        assert_eq!(i.container_application_ids, vec!["svc-a".to_string(), "svc-b".to_string()]);
        assert_eq!(i.ip_addresses.as_slice(), ["10.1.0.5".to_string()]);
        assert_eq!(i.status, Status::Up);
    }
}
