//! NetworkPolicy and Ingress. Neither has runtime state, so both are always UP; the Kubernetes `spec` is
//! carried as JSON.

use std::collections::BTreeSet;

use invsync_core::objects::{IngressPolicy, NetworkPolicy, Status};
use invsync_core::{ChangeKey, InventoryObject, NamespacedName};
use invsync_kubehub::{ingress_backends, uid_of, ClusterIdentity, ClusterView};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicySpec};
use tracing::debug;

use super::{namespace_of, owned_uid, BuildContext, BuildResult, Built, NotReady};

pub(super) fn network_policy_live_uid(view: &dyn ClusterView, _: &ClusterIdentity, name: &NamespacedName) -> Option<String> {
    owned_uid(view.network_policy(namespace_of(name), &name.name))
}

pub(super) fn ingress_live_uid(view: &dyn ClusterView, _: &ClusterIdentity, name: &NamespacedName) -> Option<String> {
    owned_uid(view.ingress(namespace_of(name), &name.name))
}

fn spec_json<T: serde::Serialize>(spec: Option<&T>) -> serde_json::Value {
    spec.and_then(|s| serde_json::to_value(s).ok()).unwrap_or_default()
}

/// Declared policy types, or the apiserver defaulting rule when absent.
fn policy_types(spec: Option<&NetworkPolicySpec>) -> Vec<String> {
    let Some(spec) = spec else { return vec!["Ingress".into()] };
    match spec.policy_types.as_ref() {
        Some(t) if !t.is_empty() => t.clone(),
        _ => {
            let mut out = vec!["Ingress".to_string()];
            if spec.egress.as_ref().is_some_and(|e| !e.is_empty()) {
                out.push("Egress".into());
            }
            out
        }
    }
}

pub(super) fn build_network_policy(ctx: &BuildContext<'_>, key: &ChangeKey) -> BuildResult {
    let ns = namespace_of(&key.name);
    let np = ctx
        .view
        .network_policy(ns, &key.name.name)
        .ok_or_else(|| NotReady(format!("network policy {} not in cache", key.name)))?;
    let obj = NetworkPolicy {
        external_id: key.external_id.clone(),
        display_name: key.name.name.clone(),
        container_project_id: ctx.project_id(ns)?,
        policy_types: policy_types(np.spec.as_ref()),
        spec: spec_json(np.spec.as_ref()),
        status: Status::Up,
    };
    Ok(Built::alone(InventoryObject::NetworkPolicy(obj)))
}

fn hosts(ing: &Ingress) -> Vec<String> {
    let Some(spec) = ing.spec.as_ref() else { return Vec::new() };
    let mut out: BTreeSet<String> = spec.rules.iter().flatten().filter_map(|r| r.host.clone()).collect();
    out.extend(spec.tls.iter().flatten().flat_map(|t| t.hosts.iter().flatten().cloned()));
    out.into_iter().collect()
}

pub(super) fn build_ingress(ctx: &BuildContext<'_>, key: &ChangeKey) -> BuildResult {
    let ns = namespace_of(&key.name);
    let ing = ctx
        .view
        .ingress(ns, &key.name.name)
        .ok_or_else(|| NotReady(format!("ingress {} not in cache", key.name)))?;
    let project_id = ctx.project_id(ns)?;

    let mut app_ids = BTreeSet::new();
    for backend in ingress_backends(&ing) {
        let Some(svc_name) = backend.service.as_ref().map(|s| s.name.as_str()) else { continue };
        match ctx.view.service(ns, svc_name).as_deref().and_then(uid_of) {
            Some(uid) => {
                app_ids.insert(uid.to_string());
            }
            None => debug!(ingress = %key.name, service = svc_name, "ingress backend not resolved"),
        }
    }

    let obj = IngressPolicy {
        external_id: key.external_id.clone(),
        display_name: key.name.name.clone(),
        container_project_id: project_id,
        container_application_ids: app_ids.into_iter().collect(),
        hosts: hosts(&ing),
        spec: spec_json(ing.spec.as_ref()),
        status: Status::Up,
    };
    Ok(Built::alone(InventoryObject::IngressPolicy(obj)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use invsync_core::Kind;
    use invsync_kubehub::{fixtures, MockCluster};
    use invsync_store::MirrorStores;
    use k8s_openapi::api::networking::v1::{
        HTTPIngressPath, HTTPIngressRuleValue, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec,
        NetworkPolicy as KubePolicy,
    };

    fn ctx_build(c: &MockCluster, f: fn(&BuildContext<'_>, &ChangeKey) -> BuildResult, kind: Kind, name: &str) -> BuildResult {
        let id = ClusterIdentity { id: "c-1".into(), name: "prod".into() };
        let stores = MirrorStores::new();
        let ctx = BuildContext { view: c, cluster: &id, lookup: &stores };
        f(&ctx, &ChangeKey::new(kind, format!("uid-{}", name), NamespacedName::namespaced("shop", name)))
    }

    fn path_to(svc: &str) -> HTTPIngressPath {
        HTTPIngressPath {
            path: Some("/".into()),
            path_type: "Prefix".into(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend { name: svc.into(), ..Default::default() }),
                ..Default::default()
            },
        }
    }

    #[test]
    fn ingress_resolves_known_backends_only() {
        let c = MockCluster::new();
        c.put_namespace(fixtures::namespace("shop", "ns-1"));
        c.put_service(fixtures::service("shop", "web", "svc-1", &["10.0.0.1"]));
        c.put_ingress(Ingress {
            metadata: fixtures::meta(Some("shop"), "front", "uid-front"),
            spec: Some(IngressSpec {
                rules: Some(vec![
                    IngressRule {
                        host: Some("b.example.com".into()),
                        http: Some(HTTPIngressRuleValue { paths: vec![path_to("web"), path_to("missing")] }),
                    },
                    IngressRule { host: Some("a.example.com".into()), http: None },
                ]),
                ..Default::default()
            }),
            ..Default::default()
        });
        let built = ctx_build(&c, build_ingress, Kind::IngressPolicy, "front").unwrap();
        let InventoryObject::IngressPolicy(p) = built.object else { panic!("wrong kind") };
        assert_eq!(p.container_application_ids, vec!["svc-1".to_string()]);
        assert_eq!(p.hosts, vec!["a.example.com".to_string(), "b.example.com".to_string()]);
        assert_eq!(p.status, Status::Up);
    }

    #[test]
    fn policy_types_default_from_rules() {
        let c = MockCluster::new();
        c.put_namespace(fixtures::namespace("shop", "ns-1"));
        c.put_network_policy(KubePolicy {
            metadata: fixtures::meta(Some("shop"), "deny", "uid-deny"),
            spec: Some(NetworkPolicySpec { egress: Some(vec![Default::default()]), ..Default::default() }),
            ..Default::default()
        });
        let built = ctx_build(&c, build_network_policy, Kind::NetworkPolicy, "deny").unwrap();
        let InventoryObject::NetworkPolicy(p) = built.object else { panic!("wrong kind") };
        assert_eq!(p.policy_types, vec!["Ingress".to_string(), "Egress".to_string()]);
        assert!(p.spec.is_object());
    }
}
