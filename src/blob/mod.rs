//! `BlobStore`: the consumed interface over the blob/object store (§6).
//!
//! The Hybrid Store is the only component that talks to this trait; every
//! other component only ever sees the stripped resource the Data Service
//! returns. [`memory::InMemoryBlobStore`] backs the crate's own tests;
//! [`s3::S3BlobStore`] (feature `s3`) is the production adapter.

pub mod memory;

#[cfg(feature = "s3")]
pub mod s3;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StoreResult;
use crate::tenant::TenantId;

/// The body of a Bulk Object (§3): `{link, data}`, where `link` equals the
/// object's own key — a self-referential integrity check verified on every
/// read (I4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkObject {
    /// Must equal the key this object is stored under.
    pub link: String,
    /// The offloaded field values, keyed by field name.
    pub data: serde_json::Map<String, Value>,
}

/// The consumed interface over the blob store (§6).
///
/// Keys follow `[tenantId/]resourceType/id<SEP>uuid.json` (§3, §6); building
/// that key is [`build_blob_key`]'s job, not the store's.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Uploads `object` under `key`, overwriting any existing object at that
    /// key (the key always contains a fresh uuid, so overwrite never
    /// actually collides in practice).
    async fn put(&self, key: &str, object: &BulkObject) -> StoreResult<()>;

    /// Fetches the object at `key`, or `None` if it does not exist.
    async fn get(&self, key: &str) -> StoreResult<Option<BulkObject>>;

    /// Deletes the object at `key`. Never errors if the key is already
    /// absent — callers use this for best-effort cleanup (§4.5 steps 4, and
    /// delete).
    async fn delete(&self, key: &str) -> StoreResult<()>;
}

/// Builds a blob key `[tenantId/]resourceType/id<SEP>uuid.json` (§3, §6).
pub fn build_blob_key(
    resource_type: &str,
    id: &str,
    tenant_id: Option<&TenantId>,
    separator: char,
) -> String {
    let uuid = uuid::Uuid::new_v4();
    let leaf = format!("{resource_type}/{id}{separator}{uuid}.json");
    match tenant_id {
        Some(tenant_id) => format!("{tenant_id}/{leaf}"),
        None => leaf,
    }
}
