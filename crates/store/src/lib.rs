//! invsync store: per-kind mirror tables, dead letters and the pending change-key set.
//!
//! A [`MirrorStore`] only ever reflects state the remote inventory has accepted. The engine
//! mutates it on batch commit and on GC deletion, both under the engine lock.

#![forbid(unsafe_code)]

use std::collections::VecDeque;

use invsync_core::{ChangeKey, InventoryObject, Kind, SyncError, SyncResult};
use metrics::gauge;
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;
use tracing::{debug, warn};

/// Secondary index over `container_application_ids` (instances and ingresses).
pub const INDEX_APPLICATION: &str = "application";
/// Secondary index over ClusterNode display names.
pub const INDEX_NODE_NAME: &str = "node-name";

pub type IndexValues = SmallVec<[String; 4]>;

struct SecondaryIndex {
    name: &'static str,
    extract: fn(&InventoryObject) -> IndexValues,
    postings: FxHashMap<String, FxHashSet<String>>,
}

impl SecondaryIndex {
    fn add(&mut self, obj: &InventoryObject) {
        for v in (self.extract)(obj) {
            self.postings.entry(v).or_default().insert(obj.external_id().to_string());
        }
    }

    fn remove(&mut self, obj: &InventoryObject) {
        for v in (self.extract)(obj) {
            if let Some(ids) = self.postings.get_mut(&v) {
                ids.remove(obj.external_id());
                if ids.is_empty() {
                    self.postings.remove(&v);
                }
            }
        }
    }
}

fn application_ids(obj: &InventoryObject) -> IndexValues {
    obj.application_ids().map(|ids| ids.iter().cloned().collect()).unwrap_or_default()
}

fn node_name(obj: &InventoryObject) -> IndexValues {
    match obj {
        InventoryObject::ClusterNode(n) if !n.display_name.is_empty() => {
            let mut out = IndexValues::new();
            out.push(n.display_name.clone());
            out
        }
        _ => IndexValues::new(),
    }
}

/// Indexed in-memory table of one kind, primary key `external_id`.
pub struct MirrorStore {
    kind: Kind,
    items: FxHashMap<String, InventoryObject>,
    indexes: Vec<SecondaryIndex>,
}

impl MirrorStore {
    pub fn new(kind: Kind) -> Self {
        Self { kind, items: FxHashMap::default(), indexes: Vec::new() }
    }

    /// Store with the default secondary indexes for `kind`.
    pub fn with_default_indexes(kind: Kind) -> Self {
        let mut s = Self::new(kind);
        match kind {
            Kind::ApplicationInstance | Kind::IngressPolicy => s.add_index(INDEX_APPLICATION, application_ids),
            Kind::ClusterNode => s.add_index(INDEX_NODE_NAME, node_name),
            _ => {}
        }
        s
    }

    /// Register a secondary index; existing entries are indexed immediately.
    pub fn add_index(&mut self, name: &'static str, extract: fn(&InventoryObject) -> IndexValues) {
        let mut idx = SecondaryIndex { name, extract, postings: FxHashMap::default() };
        for obj in self.items.values() {
            idx.add(obj);
        }
        self.indexes.push(idx);
    }

    pub fn kind(&self) -> Kind { self.kind }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn get(&self, external_id: &str) -> Option<&InventoryObject> { self.items.get(external_id) }
    pub fn contains(&self, external_id: &str) -> bool { self.items.contains_key(external_id) }
    pub fn iter(&self) -> impl Iterator<Item = &InventoryObject> { self.items.values() }

    /// Add or replace by `external_id`. Returns the replaced entry.
    pub fn upsert(&mut self, obj: InventoryObject) -> SyncResult<Option<InventoryObject>> {
        if obj.kind() != self.kind {
            return Err(SyncError::KindMismatch { store: self.kind, object: obj.kind() });
        }
        obj.validate()?;
        let prev = self.items.remove(obj.external_id());
        if let Some(p) = &prev {
            for idx in self.indexes.iter_mut() { idx.remove(p); }
        }
        for idx in self.indexes.iter_mut() { idx.add(&obj); }
        self.items.insert(obj.external_id().to_string(), obj);
        Ok(prev)
    }

    pub fn remove(&mut self, external_id: &str) -> Option<InventoryObject> {
        let prev = self.items.remove(external_id)?;
        for idx in self.indexes.iter_mut() { idx.remove(&prev); }
        Some(prev)
    }

    /// Entries whose index `name` yields `value`. Unknown index names match nothing.
    pub fn by_index(&self, name: &str, value: &str) -> Vec<&InventoryObject> {
        let Some(idx) = self.indexes.iter().find(|i| i.name == name) else {
            warn!(kind = %self.kind, index = name, "lookup on unregistered index");
            return Vec::new();
        };
        let mut out: Vec<&InventoryObject> = idx
            .postings
            .get(value)
            .map(|ids| ids.iter().filter_map(|id| self.items.get(id)).collect())
            .unwrap_or_default();
        out.sort_by(|a, b| a.external_id().cmp(b.external_id()));
        out
    }
}

/// One [`MirrorStore`] per kind.
pub struct MirrorStores {
    // slot `kind as usize`
    stores: Vec<MirrorStore>,
}

impl Default for MirrorStores {
    fn default() -> Self { Self::new() }
}

impl MirrorStores {
    pub fn new() -> Self {
        let mut stores: Vec<MirrorStore> = Kind::ALL.into_iter().map(MirrorStore::with_default_indexes).collect();
        stores.sort_by_key(|s| s.kind as usize);
        Self { stores }
    }

    pub fn get(&self, kind: Kind) -> &MirrorStore { &self.stores[kind as usize] }
    pub fn get_mut(&mut self, kind: Kind) -> &mut MirrorStore { &mut self.stores[kind as usize] }

    pub fn lookup(&self, kind: Kind, external_id: &str) -> Option<&InventoryObject> {
        self.get(kind).get(external_id)
    }

    pub fn upsert(&mut self, obj: InventoryObject) -> SyncResult<Option<InventoryObject>> {
        self.get_mut(obj.kind()).upsert(obj)
    }

    pub fn remove(&mut self, kind: Kind, external_id: &str) -> Option<InventoryObject> {
        self.get_mut(kind).remove(external_id)
    }

    pub fn total(&self) -> usize { self.stores.iter().map(|s| s.len()).sum() }

    pub fn publish_metrics(&self) {
        for s in self.stores.iter() {
            gauge!("invsync_mirror_objects", s.len() as f64, "kind" => s.kind.as_str());
        }
    }
}

/// Objects pulled at startup that are structurally invalid for indexing.
/// Held aside until a GC pass deletes them remotely.
#[derive(Default)]
pub struct DeadLetters {
    items: FxHashMap<(Kind, String), InventoryObject>,
}

impl DeadLetters {
    pub fn new() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }

    pub fn insert(&mut self, obj: InventoryObject, reason: &str) {
        warn!(kind = %obj.kind(), id = %obj.external_id(), reason, "quarantining inventory object");
        self.items.insert((obj.kind(), obj.external_id().to_string()), obj);
        gauge!("invsync_dead_letters", self.items.len() as f64);
    }

    /// Entries ordered by kind then id.
    pub fn entries(&self) -> Vec<&InventoryObject> {
        let mut out: Vec<_> = self.items.values().collect();
        out.sort_by(|a, b| a.kind().cmp(&b.kind()).then_with(|| a.external_id().cmp(b.external_id())));
        out
    }

    pub fn remove(&mut self, kind: Kind, external_id: &str) -> Option<InventoryObject> {
        let out = self.items.remove(&(kind, external_id.to_string()));
        gauge!("invsync_dead_letters", self.items.len() as f64);
        out
    }
}

/// Pending change keys, deduplicated by value, drained in arrival order.
#[derive(Default)]
pub struct PendingKeys {
    set: FxHashSet<ChangeKey>,
    order: VecDeque<ChangeKey>,
}

impl PendingKeys {
    pub fn new() -> Self { Self::default() }
    pub fn len(&self) -> usize { self.set.len() }
    pub fn is_empty(&self) -> bool { self.set.is_empty() }

    /// Returns false when the key was already pending.
    pub fn insert(&mut self, key: ChangeKey) -> bool {
        if !self.set.insert(key.clone()) {
            debug!(key = %key, "change key already pending");
            return false;
        }
        self.order.push_back(key);
        true
    }

    pub fn drain(&mut self) -> Vec<ChangeKey> {
        self.set.clear();
        self.order.drain(..).collect()
    }
}
