//! Startup population of the mirror stores from the remote inventory.

use anyhow::{bail, Context, Result};
use invsync_core::{InventoryObject, Kind, SyncError};
use invsync_inventory::InventoryClient;
use invsync_store::{DeadLetters, MirrorStores};
use tracing::{error, info};

/// Read every kind page by page (parents first) into `stores`. Objects that fail validation
/// but carry an id go to `dead`; unknown or undecodable entries are logged and skipped.
/// Any list failure aborts.
pub async fn populate(
    inventory: &dyn InventoryClient,
    cluster_id: &str,
    stores: &mut MirrorStores,
    dead: &mut DeadLetters,
) -> Result<usize> {
    let mut loaded = 0usize;
    for kind in Kind::ALL {
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = inventory
                .list_paged(kind, cluster_id, cursor.as_deref())
                .await
                .with_context(|| format!("populating {} from inventory", kind))?;
            pages += 1;
            for raw in page.results {
                loaded += usize::from(admit(kind, raw, stores, dead));
            }
            match page.cursor {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    bail!("inventory returned the same cursor twice while listing {}", kind)
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        info!(kind = %kind, pages, objects = stores.get(kind).len(), "mirror populated");
    }
    stores.publish_metrics();
    Ok(loaded)
}

/// Index one remote object; returns whether it landed in the stores.
fn admit(listed: Kind, raw: serde_json::Value, stores: &mut MirrorStores, dead: &mut DeadLetters) -> bool {
    let obj = match InventoryObject::from_value(raw) {
        Ok(o) => o,
        Err(SyncError::UnknownKind(rt)) => {
            error!(listed = %listed, resource_type = %rt, "unknown resource type in inventory listing");
            return false;
        }
        Err(e) => {
            error!(listed = %listed, error = %e, "undecodable inventory object");
            return false;
        }
    };
    if obj.kind() != listed {
        error!(listed = %listed, got = %obj.kind(), id = obj.external_id(), "inventory listing returned another kind");
        return false;
    }
    match obj.validate() {
        Ok(()) => match stores.upsert(obj) {
            Ok(_) => true,
            Err(e) => {
                error!(error = %e, "indexing inventory object");
                false
            }
        },
        Err(e) if !obj.external_id().is_empty() => {
            dead.insert(obj, &e.to_string());
            false
        }
        Err(e) => {
            error!(listed = %listed, error = %e, "inventory object without id");
            false
        }
    }
}
