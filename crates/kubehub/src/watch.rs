//! Watch adapters: reflect cluster objects into local stores and translate every
//! add/update/delete into a [`ChangeKey`]. Adapters neither batch nor deduplicate.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use anyhow::{Context, Result};
use futures::StreamExt;
use invsync_core::{ChangeKey, Kind, NamespacedName};
use k8s_openapi::api::core::v1::{Endpoints, Namespace, Node, Pod, Service};
use k8s_openapi::api::networking::v1::{Ingress, NetworkPolicy};
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{routes_to, uid_of, KubeClusterView};

/// The mirrored cluster's own identity (ExternalId and display name of the Cluster entry).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterIdentity {
    pub id: String,
    pub name: String,
}

impl ClusterIdentity {
    pub fn change_key(&self) -> ChangeKey {
        ChangeKey::new(Kind::Cluster, self.id.clone(), NamespacedName::cluster(self.name.clone()))
    }
}

/// Running watch adapters plus the view over their stores.
pub struct Watchers {
    pub view: KubeClusterView,
    pub handles: Vec<JoinHandle<()>>,
}

impl Watchers {
    /// Block until every reflector store has completed its initial list.
    pub async fn wait_until_ready(&self) -> Result<()> {
        let v = &self.view;
        v.namespaces.wait_until_ready().await.context("namespace reflector")?;
        v.services.wait_until_ready().await.context("service reflector")?;
        v.endpoints.wait_until_ready().await.context("endpoints reflector")?;
        v.pods.wait_until_ready().await.context("pod reflector")?;
        v.nodes.wait_until_ready().await.context("node reflector")?;
        v.network_policies.wait_until_ready().await.context("network policy reflector")?;
        v.ingresses.wait_until_ready().await.context("ingress reflector")?;
        Ok(())
    }

    pub fn abort(&self) {
        for h in &self.handles { h.abort(); }
    }
}

fn key_for<K: Resource>(kind: Kind, obj: &K) -> Option<ChangeKey> {
    let uid = uid_of(obj)?;
    let meta = obj.meta();
    let name = NamespacedName { namespace: meta.namespace.clone(), name: meta.name.clone()? };
    Some(ChangeKey::new(kind, uid, name))
}

fn spawn_reflector<K, F>(api: Api<K>, label: &'static str, tx: UnboundedSender<ChangeKey>, to_keys: F) -> (Store<K>, JoinHandle<()>)
where
    K: Resource + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
    F: Fn(&K) -> Vec<ChangeKey> + Send + 'static,
{
    let (reader, writer): (Store<K>, Writer<K>) = reflector::store();
    let handle = tokio::spawn(async move {
        let stream = reflector::reflector(writer, watcher::watcher(api, watcher::Config::default())).default_backoff();
        futures::pin_mut!(stream);
        info!(resource = label, "watcher started");
        while let Some(ev) = stream.next().await {
            let objs = match ev {
                Ok(Event::Applied(o)) | Ok(Event::Deleted(o)) => vec![o],
                Ok(Event::Restarted(list)) => {
                    debug!(resource = label, count = list.len(), "watch restart");
                    list
                }
                Err(e) => {
                    warn!(resource = label, error = %e, "watch error");
                    continue;
                }
            };
            for o in objs.iter() {
                for key in to_keys(o) {
                    if tx.send(key).is_err() {
                        info!(resource = label, "change key receiver closed; stopping watcher");
                        return;
                    }
                }
            }
        }
        warn!(resource = label, "watcher stream ended");
    });
    (reader, handle)
}

/// A Service change re-evaluates the Service and every Ingress in its namespace routing to it.
fn service_keys(svc: &Service, ingresses: &[Arc<Ingress>]) -> Vec<ChangeKey> {
    let mut keys: Vec<ChangeKey> = key_for(Kind::Application, svc).into_iter().collect();
    let (Some(ns), Some(name)) = (svc.metadata.namespace.as_deref(), svc.metadata.name.as_deref()) else {
        return keys;
    };
    keys.extend(
        ingresses
            .iter()
            .filter(|ing| ing.metadata.namespace.as_deref() == Some(ns) && routes_to(ing, name))
            .filter_map(|ing| key_for(Kind::IngressPolicy, ing.as_ref())),
    );
    keys
}

/// Client from the ambient kubeconfig or in-cluster service account.
pub async fn connect() -> Result<Client> {
    Client::try_default().await.context("creating kube client")
}

/// Start one reflector per mirrored resource, feeding change keys into `tx`.
pub fn spawn_watchers(client: Client, cluster: ClusterIdentity, tx: UnboundedSender<ChangeKey>) -> Watchers {
    let mut handles = Vec::new();

    let (namespaces, h) = spawn_reflector(Api::<Namespace>::all(client.clone()), "namespaces", tx.clone(), |o| {
        key_for(Kind::Project, o).into_iter().collect()
    });
    handles.push(h);

    let (ingresses, h) = spawn_reflector(Api::<Ingress>::all(client.clone()), "ingresses", tx.clone(), |o| {
        key_for(Kind::IngressPolicy, o).into_iter().collect()
    });
    handles.push(h);

    let ing_reader = ingresses.clone();
    let (services, h) = spawn_reflector(Api::<Service>::all(client.clone()), "services", tx.clone(), move |o| {
        service_keys(o, &ing_reader.state())
    });
    handles.push(h);

    // An Endpoints change re-evaluates the Service of the same name.
    let svc_reader = services.clone();
    let (endpoints, h) = spawn_reflector(Api::<Endpoints>::all(client.clone()), "endpoints", tx.clone(), move |ep| {
        let Some(ns) = ep.namespace() else { return Vec::new() };
        let svc = svc_reader.get(&ObjectRef::new(&ep.name_any()).within(&ns));
        svc.and_then(|s| key_for(Kind::Application, s.as_ref())).into_iter().collect()
    });
    handles.push(h);

    let (pods, h) = spawn_reflector(Api::<Pod>::all(client.clone()), "pods", tx.clone(), |o| {
        key_for(Kind::ApplicationInstance, o).into_iter().collect()
    });
    handles.push(h);

    // Node changes also move the Cluster's derived status.
    let cluster_key = cluster.change_key();
    let (nodes, h) = spawn_reflector(Api::<Node>::all(client.clone()), "nodes", tx.clone(), move |o| {
        key_for(Kind::ClusterNode, o).into_iter().chain(std::iter::once(cluster_key.clone())).collect()
    });
    handles.push(h);

    let (network_policies, h) = spawn_reflector(Api::<NetworkPolicy>::all(client), "networkpolicies", tx, |o| {
        key_for(Kind::NetworkPolicy, o).into_iter().collect()
    });
    handles.push(h);

    let view = KubeClusterView { namespaces, services, endpoints, pods, nodes, network_policies, ingresses };
    Watchers { view, handles }
}
