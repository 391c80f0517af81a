//! Version Store: point and range access over the primary table (§4.3
//! "Read paths").
//!
//! Every read in the crate funnels through here — the Data Service's write
//! paths call [`read_most_recent`] to confirm existence before delegating to
//! the Bundle Service, and the Bundle Service's Phase 0 calls it to resolve
//! `idToVersionId`.

use std::sync::Arc;

use crate::error::{ResourceError, StoreResult};
use crate::item::Item;
use crate::kv::KvStore;
use crate::params::{most_recent_query, point_get};

/// Policy of [`read_most_recent`]: distinguishes "nothing visible" from
/// "visible, but reads should fall back to the version behind it" (top =
/// PENDING, §4.3 step 3). Returns `None` when no version should be visible.
fn pick_visible(mut versions: Vec<Item>) -> Option<Item> {
    if versions.is_empty() {
        return None;
    }
    let top = versions.remove(0);
    match top.document_status {
        crate::item::DocumentStatus::Deleted => None,
        crate::item::DocumentStatus::Available
        | crate::item::DocumentStatus::Locked
        | crate::item::DocumentStatus::PendingDelete => Some(top),
        crate::item::DocumentStatus::Pending => {
            // Open Question (a): resolved as ResourceNotFound when no prior
            // version exists to fall back to (SPEC_FULL §9).
            versions.pop()
        }
    }
}

/// Queries up to the 2 most recent versions of `(resourceType, storageId)`
/// and applies the visibility policy of §4.3.
///
/// Returns `ResourceNotFound` per I3 if nothing in
/// `{AVAILABLE, LOCKED, PENDING_DELETE}` is currently visible.
pub async fn read_most_recent(
    kv: &Arc<dyn KvStore>,
    resource_type: &str,
    storage_id: &str,
) -> StoreResult<Item> {
    let versions = kv.query_most_recent(&most_recent_query(storage_id)).await?;
    pick_visible(versions).ok_or_else(|| {
        ResourceError::NotFound {
            resource_type: resource_type.to_string(),
            id: storage_id.to_string(),
        }
        .into()
    })
}

/// Point-gets `(storageId, vid)` and enforces §4.3's `readVersion` policy:
/// fails with `VersionNotFound` if absent, if the stored `resourceType`
/// disagrees, or if the item is not `AVAILABLE`.
pub async fn read_version(
    kv: &Arc<dyn KvStore>,
    resource_type: &str,
    id: &str,
    storage_id: &str,
    vid: u64,
) -> StoreResult<Item> {
    let item = kv.get_item(&point_get(storage_id, vid)).await?;
    match item {
        Some(item)
            if item.resource_type == resource_type
                && item.document_status == crate::item::DocumentStatus::Available =>
        {
            Ok(item)
        }
        _ => Err(ResourceError::VersionNotFound {
            resource_type: resource_type.to_string(),
            id: id.to_string(),
            vid: vid.to_string(),
        }
        .into()),
    }
}

/// Lists every `vid` stored for `storageId`, ascending — SPEC_FULL §4.3
/// supplement.
pub async fn list_versions(kv: &Arc<dyn KvStore>, storage_id: &str) -> StoreResult<Vec<u64>> {
    // A real KV store would expose a dedicated unlimited range query; the
    // trait only promises a bounded most-recent-N query (§4.2), so we widen
    // the limit here rather than adding a second query shape to `KvStore`
    // for a SPEC_FULL-only convenience method.
    let query = crate::params::MostRecentQuery {
        storage_id: storage_id.to_string(),
        limit: u32::MAX,
    };
    let mut versions: Vec<u64> = kv.query_most_recent(&query).await?.into_iter().map(|i| i.vid).collect();
    versions.sort_unstable();
    Ok(versions)
}

/// `true` iff `readMostRecent` would currently return a visible version —
/// SPEC_FULL §4.3 supplement.
pub async fn exists(kv: &Arc<dyn KvStore>, resource_type: &str, storage_id: &str) -> bool {
    read_most_recent(kv, resource_type, storage_id).await.is_ok()
}
