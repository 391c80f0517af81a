//! Item Codec: translation between logical resources and stored items.
//!
//! Exposes the four operations named in the data model: [`build_storage_id`],
//! [`encode_for_insert`], [`decode_for_read`], and [`extract_references`].
//! This module performs no I/O — it is pure data transformation, the single
//! place where the on-the-wire resource shape and the stored item shape are
//! translated into one another.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::tenant::TenantId;

/// The per-version lifecycle field driving the state machine (§3, §4.2).
///
/// Ordering of variants has no semantic meaning; string identity does —
/// these are the tokens the Param Builder's conditional expressions
/// compare against, so [`DocumentStatus::as_str`] is the single source of
/// truth for their spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentStatus {
    /// Newly staged by the Bundle Service; not yet visible to readers.
    Pending,
    /// Held by an in-flight operation that needs to block concurrent
    /// transitions on this exact version without retiring it yet.
    Locked,
    /// Steady-state, visible version.
    Available,
    /// Staged for deletion; still visible to readers per I3.
    PendingDelete,
    /// Terminal: logically deleted.
    Deleted,
}

impl DocumentStatus {
    /// The canonical string token stored alongside the item and compared
    /// against in conditional expressions.
    pub fn as_str(self) -> &'static str {
        match self {
            DocumentStatus::Pending => "PENDING",
            DocumentStatus::Locked => "LOCKED",
            DocumentStatus::Available => "AVAILABLE",
            DocumentStatus::PendingDelete => "PENDING_DELETE",
            DocumentStatus::Deleted => "DELETED",
        }
    }

    /// `true` for the three transient states guarded by the lock-expiry
    /// escape hatch (I2).
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            DocumentStatus::Pending | DocumentStatus::Locked | DocumentStatus::PendingDelete
        )
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// System-generated version metadata stamped on every insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceMeta {
    /// Decimal rendering of `vid`.
    pub version_id: String,
    /// Timestamp of this version's creation.
    pub last_updated: DateTime<Utc>,
}

/// The stored record for a single version (§3 "Item").
///
/// `content` holds only the caller-supplied payload fields; `id`,
/// `resourceType`, and `meta` are reconstructed on [`decode_for_read`] from
/// this struct's typed fields rather than duplicated inside `content` — an
/// idiomatic-Rust rendering of what the source keeps as one flat merged
/// document (see `DESIGN.md`).
#[derive(Debug, Clone)]
pub struct Item {
    /// Composite primary key component: `id` alone, or `id || tenantId`.
    pub storage_id: String,
    /// Range key: the version number.
    pub vid: u64,
    pub resource_type: String,
    pub document_status: DocumentStatus,
    /// Earliest time this item entered its current transient status.
    /// Combined with `LOCK_DURATION_MS` to decide lock expiry.
    pub lock_end_ts: DateTime<Utc>,
    pub tenant_id: Option<TenantId>,
    /// `_references`: every leaf value found at a dotted path ending in
    /// `.reference`.
    pub references: BTreeSet<String>,
    pub meta: ResourceMeta,
    /// Blob-store key for offloaded payload (hybrid mode only).
    pub bulk_data_link: Option<String>,
    /// The caller-supplied payload, minus `id`, `resourceType`, and `meta`.
    pub content: Value,
}

/// Builds the primary table's partition-key value from a logical id and an
/// optional tenant id.
///
/// Single-tenant mode: `storageId = id`. Multi-tenant mode:
/// `storageId = id || tenantId` (plain concatenation, per §3 — the encoding
/// is confined entirely to this function and [`decode_for_read`], so a
/// cleaner native two-column composite key is a drop-in replacement; see
/// §9 design notes).
pub fn build_storage_id(id: &str, tenant_id: Option<&TenantId>) -> String {
    match tenant_id {
        Some(tenant_id) => format!("{id}{tenant_id}"),
        None => id.to_string(),
    }
}

/// Recovers the logical `id` from a `storageId`, given the tenant id that
/// was used to build it (the caller always has this in context — there is
/// no ambiguous reverse parse).
fn split_storage_id(storage_id: &str, tenant_id: Option<&TenantId>) -> String {
    match tenant_id {
        Some(tenant_id) => {
            let suffix = tenant_id.as_str();
            storage_id
                .strip_suffix(suffix)
                .unwrap_or(storage_id)
                .to_string()
        }
        None => storage_id.to_string(),
    }
}

/// Encodes a caller-supplied resource into a new [`Item`] ready for
/// insertion.
///
/// Overwrites any caller-supplied `meta.versionId`/`meta.lastUpdated` and
/// strips `id`/`resourceType`/`meta`/`bulkDataLink` out of the stored
/// `content` (they are reconstructed on read from the item's typed fields —
/// see [`Item::bulk_data_link`]).
pub fn encode_for_insert(
    mut resource: Value,
    id: &str,
    vid: u64,
    status: DocumentStatus,
    resource_type: &str,
    tenant_id: Option<&TenantId>,
) -> Item {
    let bulk_data_link = resource
        .as_object_mut()
        .and_then(|obj| {
            obj.remove("id");
            obj.remove("resourceType");
            obj.remove("meta");
            obj.remove("bulkDataLink")
        })
        .and_then(|v| v.as_str().map(str::to_string));

    let references = extract_references(&resource);
    let now = Utc::now();

    Item {
        storage_id: build_storage_id(id, tenant_id),
        vid,
        resource_type: resource_type.to_string(),
        document_status: status,
        lock_end_ts: now,
        tenant_id: tenant_id.cloned(),
        references,
        meta: ResourceMeta {
            version_id: vid.to_string(),
            last_updated: now,
        },
        bulk_data_link,
        content: resource,
    }
}

/// Reconstructs the public resource JSON from a stored [`Item`].
///
/// Strips `documentStatus`, `lockEndTs`, `vid`, `_references` (they were
/// never in `content` to begin with in this rendering) and splits the
/// logical `id` back out of `storageId`. `tenantId` is only included in
/// the output when `include_tenant_id` is set by the caller's projection.
/// `bulkDataLink` is restored from the item's typed field when present, so
/// hybrid stubs round-trip it across a store/read even though it never
/// lives in `content`.
pub fn decode_for_read(item: &Item, include_tenant_id: bool) -> Value {
    let id = split_storage_id(&item.storage_id, item.tenant_id.as_ref());

    let mut resource = item.content.clone();
    let obj = resource
        .as_object_mut()
        .expect("encode_for_insert always stores a JSON object");

    obj.insert("id".to_string(), Value::String(id));
    obj.insert(
        "resourceType".to_string(),
        Value::String(item.resource_type.clone()),
    );
    obj.insert(
        "meta".to_string(),
        serde_json::json!({
            "versionId": item.meta.version_id,
            "lastUpdated": item.meta.last_updated.to_rfc3339(),
        }),
    );

    if include_tenant_id {
        if let Some(tenant_id) = &item.tenant_id {
            obj.insert(
                "tenantId".to_string(),
                Value::String(tenant_id.as_str().to_string()),
            );
        }
    }

    if let Some(link) = &item.bulk_data_link {
        obj.insert("bulkDataLink".to_string(), Value::String(link.clone()));
    }

    resource
}

/// Collects every leaf value found at a dotted path whose terminal segment
/// is `reference` (P4).
pub fn extract_references(resource: &Value) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_references(resource, "reference", &mut out);
    out
}

fn collect_references(value: &Value, trailing_key: &str, out: &mut BTreeSet<String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if key == trailing_key {
                    if let Value::String(s) = child {
                        out.insert(s.clone());
                        continue;
                    }
                }
                collect_references(child, trailing_key, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                collect_references(item, trailing_key, out);
            }
        }
        _ => {}
    }
}
