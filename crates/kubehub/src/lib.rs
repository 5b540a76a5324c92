//! invsync kubehub: read access to live cluster state and watch adapters feeding change keys.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use k8s_openapi::api::core::v1::{Endpoints, Namespace, Node, Pod, Service};
use k8s_openapi::api::networking::v1::{Ingress, IngressBackend, NetworkPolicy};
use kube::runtime::reflector::{ObjectRef, Store};

pub mod fixtures;
mod watch;

pub use kube::{Resource, ResourceExt};
pub use watch::{connect, spawn_watchers, ClusterIdentity, Watchers};

/// Point-get and list access to the local cluster-state cache.
///
/// Lists are sorted by name so builders stay deterministic.
pub trait ClusterView: Send + Sync {
    fn namespace(&self, name: &str) -> Option<Arc<Namespace>>;
    fn service(&self, namespace: &str, name: &str) -> Option<Arc<Service>>;
    fn endpoints(&self, namespace: &str, name: &str) -> Option<Arc<Endpoints>>;
    fn endpoints_in(&self, namespace: &str) -> Vec<Arc<Endpoints>>;
    fn pod(&self, namespace: &str, name: &str) -> Option<Arc<Pod>>;
    fn node(&self, name: &str) -> Option<Arc<Node>>;
    fn nodes(&self) -> Vec<Arc<Node>>;
    fn network_policy(&self, namespace: &str, name: &str) -> Option<Arc<NetworkPolicy>>;
    fn ingress(&self, namespace: &str, name: &str) -> Option<Arc<Ingress>>;
}

/// UID of a cluster object, if set.
pub fn uid_of<K: Resource>(obj: &K) -> Option<&str> {
    obj.meta().uid.as_deref()
}

/// The default backend, then every HTTP path backend, in rule order.
pub fn ingress_backends(ing: &Ingress) -> Vec<&IngressBackend> {
    let Some(spec) = ing.spec.as_ref() else { return Vec::new() };
    let rules = spec.rules.iter().flatten();
    let paths = rules.flat_map(|r| r.http.iter().flat_map(|h| h.paths.iter()));
    spec.default_backend.iter().chain(paths.map(|p| &p.backend)).collect()
}

/// Whether any backend of `ing` names the Service `service`.
pub fn routes_to(ing: &Ingress, service: &str) -> bool {
    ingress_backends(ing).iter().any(|b| b.service.as_ref().is_some_and(|s| s.name == service))
}

/// [`ClusterView`] over kube reflector stores.
#[derive(Clone)]
pub struct KubeClusterView {
    pub namespaces: Store<Namespace>,
    pub services: Store<Service>,
    pub endpoints: Store<Endpoints>,
    pub pods: Store<Pod>,
    pub nodes: Store<Node>,
    pub network_policies: Store<NetworkPolicy>,
    pub ingresses: Store<Ingress>,
}

fn sorted_by_name<K: Resource>(mut v: Vec<Arc<K>>) -> Vec<Arc<K>> {
    v.sort_by(|a, b| a.meta().name.cmp(&b.meta().name));
    v
}

impl ClusterView for KubeClusterView {
    fn namespace(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.get(&ObjectRef::new(name))
    }

    fn service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> {
        self.services.get(&ObjectRef::new(name).within(namespace))
    }

    fn endpoints(&self, namespace: &str, name: &str) -> Option<Arc<Endpoints>> {
        self.endpoints.get(&ObjectRef::new(name).within(namespace))
    }

    fn endpoints_in(&self, namespace: &str) -> Vec<Arc<Endpoints>> {
        let v = self.endpoints.state().into_iter().filter(|e| e.namespace().as_deref() == Some(namespace)).collect();
        sorted_by_name(v)
    }

    fn pod(&self, namespace: &str, name: &str) -> Option<Arc<Pod>> {
        self.pods.get(&ObjectRef::new(name).within(namespace))
    }

    fn node(&self, name: &str) -> Option<Arc<Node>> {
        self.nodes.get(&ObjectRef::new(name))
    }

    fn nodes(&self) -> Vec<Arc<Node>> {
        sorted_by_name(self.nodes.state())
    }

    fn network_policy(&self, namespace: &str, name: &str) -> Option<Arc<NetworkPolicy>> {
        self.network_policies.get(&ObjectRef::new(name).within(namespace))
    }

    fn ingress(&self, namespace: &str, name: &str) -> Option<Arc<Ingress>> {
        self.ingresses.get(&ObjectRef::new(name).within(namespace))
    }
}

type Objects<K> = RwLock<BTreeMap<(String, String), Arc<K>>>;

/// In-memory [`ClusterView`] for tests. Objects are keyed by `(namespace, name)`;
/// cluster-scoped objects use an empty namespace.
#[derive(Default)]
pub struct MockCluster {
    namespaces: Objects<Namespace>,
    services: Objects<Service>,
    endpoints: Objects<Endpoints>,
    pods: Objects<Pod>,
    nodes: Objects<Node>,
    network_policies: Objects<NetworkPolicy>,
    ingresses: Objects<Ingress>,
}

fn key_of<K: Resource>(obj: &K) -> (String, String) {
    (obj.meta().namespace.clone().unwrap_or_default(), obj.meta().name.clone().unwrap_or_default())
}

fn put<K: Resource>(map: &Objects<K>, obj: K) {
    let mut m = map.write().unwrap_or_else(PoisonError::into_inner);
    m.insert(key_of(&obj), Arc::new(obj));
}

fn take<K>(map: &Objects<K>, namespace: &str, name: &str) -> Option<Arc<K>> {
    let mut m = map.write().unwrap_or_else(PoisonError::into_inner);
    m.remove(&(namespace.to_string(), name.to_string()))
}

fn fetch<K>(map: &Objects<K>, namespace: &str, name: &str) -> Option<Arc<K>> {
    let m = map.read().unwrap_or_else(PoisonError::into_inner);
    m.get(&(namespace.to_string(), name.to_string())).cloned()
}

fn list_ns<K>(map: &Objects<K>, namespace: &str) -> Vec<Arc<K>> {
    let m = map.read().unwrap_or_else(PoisonError::into_inner);
    m.iter().filter(|((ns, _), _)| ns == namespace).map(|(_, v)| Arc::clone(v)).collect()
}

impl MockCluster {
    pub fn new() -> Self { Self::default() }

    pub fn put_namespace(&self, o: Namespace) { put(&self.namespaces, o) }
    pub fn put_service(&self, o: Service) { put(&self.services, o) }
    pub fn put_endpoints(&self, o: Endpoints) { put(&self.endpoints, o) }
    pub fn put_pod(&self, o: Pod) { put(&self.pods, o) }
    pub fn put_node(&self, o: Node) { put(&self.nodes, o) }
    pub fn put_network_policy(&self, o: NetworkPolicy) { put(&self.network_policies, o) }
    pub fn put_ingress(&self, o: Ingress) { put(&self.ingresses, o) }

    pub fn remove_namespace(&self, name: &str) -> Option<Arc<Namespace>> { take(&self.namespaces, "", name) }
    pub fn remove_service(&self, ns: &str, name: &str) -> Option<Arc<Service>> { take(&self.services, ns, name) }
    pub fn remove_endpoints(&self, ns: &str, name: &str) -> Option<Arc<Endpoints>> { take(&self.endpoints, ns, name) }
    pub fn remove_pod(&self, ns: &str, name: &str) -> Option<Arc<Pod>> { take(&self.pods, ns, name) }
    pub fn remove_node(&self, name: &str) -> Option<Arc<Node>> { take(&self.nodes, "", name) }
}

impl ClusterView for MockCluster {
    fn namespace(&self, name: &str) -> Option<Arc<Namespace>> { fetch(&self.namespaces, "", name) }
    fn service(&self, namespace: &str, name: &str) -> Option<Arc<Service>> { fetch(&self.services, namespace, name) }
    fn endpoints(&self, namespace: &str, name: &str) -> Option<Arc<Endpoints>> { fetch(&self.endpoints, namespace, name) }
    fn endpoints_in(&self, namespace: &str) -> Vec<Arc<Endpoints>> { list_ns(&self.endpoints, namespace) }
    fn pod(&self, namespace: &str, name: &str) -> Option<Arc<Pod>> { fetch(&self.pods, namespace, name) }
    fn node(&self, name: &str) -> Option<Arc<Node>> { fetch(&self.nodes, "", name) }
    fn nodes(&self) -> Vec<Arc<Node>> { list_ns(&self.nodes, "") }
    fn network_policy(&self, namespace: &str, name: &str) -> Option<Arc<NetworkPolicy>> { fetch(&self.network_policies, namespace, name) }
    fn ingress(&self, namespace: &str, name: &str) -> Option<Arc<Ingress>> { fetch(&self.ingresses, namespace, name) }
}
