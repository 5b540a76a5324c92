//! Cluster object constructors for tests.

use k8s_openapi::api::core::v1::{
    EndpointAddress, EndpointSubset, Endpoints, Namespace, NamespaceStatus, Node, NodeAddress, NodeCondition,
    NodeStatus, NodeSystemInfo, ObjectReference, Pod, PodSpec, PodStatus, Service, ServicePort, ServiceSpec,
};
use k8s_openapi::api::networking::v1::{
    HTTPIngressPath, HTTPIngressRuleValue, Ingress, IngressBackend, IngressRule, IngressServiceBackend, IngressSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;

pub fn meta(namespace: Option<&str>, name: &str, uid: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.into()),
        namespace: namespace.map(Into::into),
        uid: Some(uid.into()),
        ..Default::default()
    }
}

pub fn namespace(name: &str, uid: &str) -> Namespace {
    Namespace {
        metadata: meta(None, name, uid),
        status: Some(NamespaceStatus { phase: Some("Active".into()), ..Default::default() }),
        ..Default::default()
    }
}

pub fn service(ns: &str, name: &str, uid: &str, cluster_ips: &[&str]) -> Service {
    Service {
        metadata: meta(Some(ns), name, uid),
        spec: Some(ServiceSpec {
            type_: Some("ClusterIP".into()),
            cluster_ip: cluster_ips.first().map(|s| s.to_string()),
            cluster_ips: Some(cluster_ips.iter().map(|s| s.to_string()).collect()),
            ports: Some(vec![ServicePort { port: 80, protocol: Some("TCP".into()), ..Default::default() }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// An endpoint address targeting the pod `pod` in `ns`.
pub fn pod_address(ns: &str, pod: &str, ip: &str) -> EndpointAddress {
    EndpointAddress {
        ip: ip.into(),
        target_ref: Some(ObjectReference {
            kind: Some("Pod".into()),
            name: Some(pod.into()),
            namespace: Some(ns.into()),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn endpoints(ns: &str, name: &str, ready: Vec<EndpointAddress>, not_ready: Vec<EndpointAddress>) -> Endpoints {
    let subset = EndpointSubset {
        addresses: (!ready.is_empty()).then_some(ready),
        not_ready_addresses: (!not_ready.is_empty()).then_some(not_ready),
        ..Default::default()
    };
    Endpoints { metadata: meta(Some(ns), name, &format!("ep-{}", name)), subsets: Some(vec![subset]) }
}

pub fn pod(ns: &str, name: &str, uid: &str, node: Option<&str>, ip: Option<&str>) -> Pod {
    Pod {
        metadata: meta(Some(ns), name, uid),
        spec: Some(PodSpec { node_name: node.map(Into::into), ..Default::default() }),
        status: Some(PodStatus {
            phase: Some("Running".into()),
            pod_ip: ip.map(Into::into),
            ..Default::default()
        }),
    }
}

pub fn node(name: &str, uid: &str, ip: &str, ready: bool) -> Node {
    Node {
        metadata: meta(None, name, uid),
        status: Some(NodeStatus {
            addresses: Some(vec![NodeAddress { address: ip.into(), type_: "InternalIP".into() }]),
            conditions: Some(vec![NodeCondition {
                type_: "Ready".into(),
                status: if ready { "True" } else { "False" }.into(),
                ..Default::default()
            }]),
            node_info: Some(NodeSystemInfo { kubelet_version: "v1.29.2".into(), ..Default::default() }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// An Ingress with one rule whose paths route to `services`, in order.
pub fn ingress(ns: &str, name: &str, uid: &str, services: &[&str]) -> Ingress {
    let paths = services
        .iter()
        .map(|svc| HTTPIngressPath {
            path: Some(format!("/{}", svc)),
            path_type: "Prefix".into(),
            backend: IngressBackend {
                service: Some(IngressServiceBackend { name: svc.to_string(), ..Default::default() }),
                ..Default::default()
            },
        })
        .collect();
    Ingress {
        metadata: meta(Some(ns), name, uid),
        spec: Some(IngressSpec {
            rules: Some(vec![IngressRule { host: None, http: Some(HTTPIngressRuleValue { paths }) }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
