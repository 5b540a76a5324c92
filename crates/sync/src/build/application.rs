//! Service → Application, plus the instance cross-reference it owns.

use std::collections::BTreeSet;

use invsync_core::objects::{Addresses, Application, NetworkError, NetworkStatus, Status};
use invsync_core::{ChangeKey, InventoryObject, Kind, NamespacedName};
use invsync_kubehub::{uid_of, ClusterIdentity, ClusterView};
use k8s_openapi::api::core::v1::{Endpoints, Service};
use tracing::debug;

use super::{labels_of, namespace_of, owned_uid, BuildContext, BuildResult, Built, NotReady};

/// Diagnostic when addresses exist but none is backed by a ready pod.
pub const ENDPOINTS_NOT_READY: &str = "Endpoints for Service are not ready";
/// Diagnostic when the service has no addresses at all.
pub const NO_ENDPOINTS: &str = "Failed to get endpoints for Service";
/// Annotations whose non-empty value is reported as a network error.
pub const SERVICE_ERROR_ANNOTATIONS: [&str; 3] = [
    "inventory.sync/error.loadbalancer",
    "inventory.sync/error.snat",
    "inventory.sync/error.ipallocation",
];

pub(super) fn live_uid(view: &dyn ClusterView, _: &ClusterIdentity, name: &NamespacedName) -> Option<String> {
    owned_uid(view.service(namespace_of(name), &name.name))
}

/// Pods behind ready addresses, and the total address count (ready or not).
struct EndpointSummary {
    ready_pods: BTreeSet<String>,
    addresses: usize,
}

fn summarize(ep: Option<&Endpoints>) -> EndpointSummary {
    let mut out = EndpointSummary { ready_pods: BTreeSet::new(), addresses: 0 };
    for subset in ep.and_then(|e| e.subsets.as_deref()).unwrap_or_default() {
        let ready = subset.addresses.as_deref().unwrap_or_default();
        let not_ready = subset.not_ready_addresses.as_deref().unwrap_or_default();
        out.addresses += ready.len() + not_ready.len();
        for addr in ready {
            if let Some(target) = addr.target_ref.as_ref().filter(|t| t.kind.as_deref() == Some("Pod")) {
                if let Some(name) = &target.name {
                    out.ready_pods.insert(name.clone());
                }
            }
        }
    }
    out
}

fn annotation_errors(svc: &Service) -> impl Iterator<Item = NetworkError> + '_ {
    let annotations = svc.metadata.annotations.as_ref();
    SERVICE_ERROR_ANNOTATIONS.iter().filter_map(move |k| {
        let v = annotations?.get(*k)?.trim();
        (!v.is_empty()).then(|| NetworkError::new(v))
    })
}

fn cluster_ips(svc: &Service) -> Addresses {
    let Some(spec) = svc.spec.as_ref() else { return Addresses::new() };
    let ips: Vec<&String> = match spec.cluster_ips.as_ref() {
        Some(v) if !v.is_empty() => v.iter().collect(),
        _ => spec.cluster_ip.iter().collect(),
    };
    ips.into_iter().filter(|ip| !ip.is_empty() && ip.as_str() != "None").cloned().collect()
}

fn ports(svc: &Service) -> Vec<String> {
    let ports = svc.spec.as_ref().and_then(|s| s.ports.as_deref()).unwrap_or_default();
    ports.iter().map(|p| format!("{}/{}", p.port, p.protocol.as_deref().unwrap_or("TCP"))).collect()
}

/// Canonical Application from the service and its endpoints. Status is decided by priority:
/// ready pods, then any address, then nothing.
fn application_of(svc: &Service, external_id: &str, project_id: String, summary: &EndpointSummary) -> Application {
    let (status, synthetic) = if !summary.ready_pods.is_empty() {
        (Status::Up, None)
    } else if summary.addresses > 0 {
        (Status::Unknown, Some(NetworkError::new(ENDPOINTS_NOT_READY)))
    } else {
        (Status::Down, Some(NetworkError::new(NO_ENDPOINTS)))
    };
    let network_errors = NetworkError::dedup(synthetic.into_iter().chain(annotation_errors(svc)));
    Application {
        external_id: external_id.to_string(),
        display_name: svc.metadata.name.clone().unwrap_or_default(),
        container_project_id: project_id,
        labels: labels_of(&svc.metadata),
        service_type: svc.spec.as_ref().and_then(|s| s.type_.clone()).unwrap_or_else(|| "ClusterIP".into()),
        ip_addresses: cluster_ips(svc),
        ports: ports(svc),
        status,
        network_status: NetworkStatus::from_errors(&network_errors),
        network_errors,
    }
}

/// `inst` with `app_id` added to its application ids, or `None` if already present.
/// Presence is checked by scan; only the insert position assumes sorted ids.
pub(crate) fn attach_application(inst: &InventoryObject, app_id: &str) -> Option<InventoryObject> {
    let InventoryObject::ApplicationInstance(i) = inst else { return None };
    let ids = &i.container_application_ids;
    if ids.iter().any(|id| id == app_id) {
        return None;
    }
    let pos = ids.partition_point(|id| id.as_str() < app_id);
    let mut next = i.clone();
    next.container_application_ids.insert(pos, app_id.to_string());
    Some(InventoryObject::ApplicationInstance(next))
}

/// `obj` (an instance or ingress) without `app_id`, or `None` if it never referenced it.
pub(crate) fn detach_application(obj: &InventoryObject, app_id: &str) -> Option<InventoryObject> {
    if !obj.application_ids()?.iter().any(|id| id == app_id) {
        return None;
    }
    let mut next = obj.clone();
    next.application_ids_mut()?.retain(|id| id != app_id);
    Some(next)
}

pub(super) fn build(ctx: &BuildContext<'_>, key: &ChangeKey) -> BuildResult {
    let ns = namespace_of(&key.name);
    let svc = ctx
        .view
        .service(ns, &key.name.name)
        .ok_or_else(|| NotReady(format!("service {} not in cache", key.name)))?;
    let project_id = ctx.project_id(ns)?;
    let endpoints = ctx.view.endpoints(ns, &key.name.name);
    let summary = summarize(endpoints.as_deref());
    let app = application_of(&svc, &key.external_id, project_id, &summary);

    let mut dependents = Vec::new();
    let mut backing: BTreeSet<String> = BTreeSet::new();
    for pod_name in &summary.ready_pods {
        let pod = ctx
            .view
            .pod(ns, pod_name)
            .ok_or_else(|| NotReady(format!("pod {}/{} behind service not in cache", ns, pod_name)))?;
        let pod_uid = uid_of(pod.as_ref()).unwrap_or_default().to_string();
        let inst = ctx
            .lookup
            .current(Kind::ApplicationInstance, &pod_uid)
            .ok_or_else(|| NotReady(format!("instance for pod {}/{} not mirrored yet", ns, pod_name)))?;
        dependents.extend(attach_application(inst, &key.external_id));
        backing.insert(pod_uid);
    }
    for inst in ctx.lookup.referencing(Kind::ApplicationInstance, &key.external_id) {
        if !backing.contains(inst.external_id()) {
            debug!(service = %key.name, instance = inst.external_id(), "instance no longer backs service");
            dependents.extend(detach_application(inst, &key.external_id));
        }
    }
    Ok(Built { object: InventoryObject::Application(app), dependents })
}
