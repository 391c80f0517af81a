//! Hybrid Store: transparent offload of oversized fields to a blob store
//! (§4.5).
//!
//! `OffloadRegistry` is built once and handed to [`HybridStore::new`] —
//! registration is immutable for the store's lifetime (§9 design note), so
//! there is no mutable `register` method to race against concurrent reads.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;

use crate::blob::{build_blob_key, BlobStore, BulkObject};
use crate::data_service::{self, WriteOutcome};
use crate::error::{ResourceError, StoreResult};
use crate::kv::KvStore;
use crate::tenant::{TenancyMode, TenantId};

/// Which fields, per resource type, get offloaded to the blob store.
///
/// Built once at startup and handed to [`HybridStore::new`]; nothing in this
/// crate mutates it afterwards.
#[derive(Debug, Clone, Default)]
pub struct OffloadRegistry {
    fields_by_type: HashMap<String, Vec<String>>,
}

impl OffloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `resource_type` for offload of `field_names`. Intended to
    /// be called only while assembling the registry before it is passed to
    /// [`HybridStore::new`].
    pub fn register(mut self, resource_type: impl Into<String>, field_names: Vec<String>) -> Self {
        self.fields_by_type.insert(resource_type.into(), field_names);
        self
    }

    fn fields_for(&self, resource_type: &str) -> Option<&[String]> {
        self.fields_by_type.get(resource_type).map(Vec::as_slice)
    }

    fn is_registered(&self, resource_type: &str) -> bool {
        self.fields_by_type.contains_key(resource_type)
    }
}

/// Intercepts the Data Service's write/read paths for resource types with
/// registered offload fields, splitting/composing the blob-backed payload
/// around them.
pub struct HybridStore {
    kv: Arc<dyn KvStore>,
    blob: Arc<dyn BlobStore>,
    registry: OffloadRegistry,
    lock_duration: Duration,
    tenancy_mode: TenancyMode,
    blob_key_separator: char,
}

impl HybridStore {
    pub fn new(
        kv: Arc<dyn KvStore>,
        blob: Arc<dyn BlobStore>,
        registry: OffloadRegistry,
        lock_duration: Duration,
        tenancy_mode: TenancyMode,
        blob_key_separator: char,
    ) -> Self {
        Self {
            kv,
            blob,
            registry,
            lock_duration,
            tenancy_mode,
            blob_key_separator,
        }
    }

    fn assert_tenancy(&self, tenant_id: Option<&TenantId>) -> StoreResult<()> {
        self.tenancy_mode.check(tenant_id).map_err(Into::into)
    }

    /// Strips the registered fields of `resource` into a bulk object,
    /// uploads it, then inserts the stub via the Data Service — blob first,
    /// KV second (§4.5 "Order is significant").
    pub async fn create(
        &self,
        resource_type: &str,
        id: Option<&str>,
        mut resource: Value,
        tenant_id: Option<&TenantId>,
    ) -> StoreResult<WriteOutcome> {
        self.assert_tenancy(tenant_id)?;

        let Some(fields) = self.registry.fields_for(resource_type) else {
            return data_service::create_resource(&self.kv, resource_type, id, resource, tenant_id).await;
        };

        let offload_id = id
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let (stripped, link) = self
            .offload(resource_type, &offload_id, &mut resource, fields, tenant_id)
            .await?;
        let mut stub = stripped;
        if let Some(obj) = stub.as_object_mut() {
            obj.insert("bulkDataLink".to_string(), Value::String(link.clone()));
        }

        match data_service::create_resource(&self.kv, resource_type, Some(&offload_id), stub, tenant_id).await {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if let Err(cleanup_err) = self.blob.delete(&link).await {
                    warn!(key = %link, error = %cleanup_err, "failed to clean up orphaned blob after failed insert");
                }
                Err(err)
            }
        }
    }

    /// Same blob-first-then-KV ordering as [`HybridStore::create`], but for
    /// an update: a fresh blob is written under a fresh key (the old one is
    /// left for GC, per §4.5's "explicit delete path only" Non-goal) and the
    /// new version's `bulkDataLink` points at it (§4.5 "Write (create or
    /// update)").
    pub async fn update(
        &self,
        resource_type: &str,
        id: &str,
        update_create_supported: bool,
        lock_duration: Duration,
        mut resource: Value,
        tenant_id: Option<&TenantId>,
    ) -> StoreResult<WriteOutcome> {
        self.assert_tenancy(tenant_id)?;

        let Some(fields) = self.registry.fields_for(resource_type) else {
            return data_service::update_resource(
                &self.kv,
                lock_duration,
                update_create_supported,
                resource_type,
                id,
                resource,
                tenant_id,
            )
            .await;
        };

        let (stripped, link) = self.offload(resource_type, id, &mut resource, fields, tenant_id).await?;
        let mut stub = stripped;
        if let Some(obj) = stub.as_object_mut() {
            obj.insert("bulkDataLink".to_string(), Value::String(link.clone()));
        }

        match data_service::update_resource(
            &self.kv,
            lock_duration,
            update_create_supported,
            resource_type,
            id,
            stub,
            tenant_id,
        )
        .await
        {
            Ok(outcome) => Ok(outcome),
            Err(err) => {
                if let Err(cleanup_err) = self.blob.delete(&link).await {
                    warn!(key = %link, error = %cleanup_err, "failed to clean up orphaned blob after failed update");
                }
                Err(err)
            }
        }
    }

    /// Splits offload fields out of `data` into a fresh bulk object, uploads
    /// it, and returns the resource with those fields removed plus the new
    /// `bulkDataLink` key.
    async fn offload(
        &self,
        resource_type: &str,
        id: &str,
        data: &mut Value,
        fields: &[String],
        tenant_id: Option<&TenantId>,
    ) -> StoreResult<(Value, String)> {
        let link = build_blob_key(resource_type, id, tenant_id, self.blob_key_separator);

        let mut offloaded = serde_json::Map::new();
        if let Some(obj) = data.as_object_mut() {
            for field in fields {
                if let Some(value) = obj.remove(field) {
                    offloaded.insert(field.clone(), value);
                }
            }
        }

        let bulk_object = BulkObject {
            link: link.clone(),
            data: offloaded,
        };
        self.blob.put(&link, &bulk_object).await?;

        Ok((data.clone(), link))
    }

    /// Reads the stub via the caller-supplied closure, then — if
    /// `bulkDataLink` is set — fetches the blob, verifies its self-check,
    /// and splices `data.*` back in. Any blob-fetch or link-mismatch is
    /// surfaced as `ResourceNotFound` (I4; §9 Open Question (b): never the
    /// lenient swallow-and-strip behaviour).
    pub async fn compose(&self, resource_type: &str, id: &str, mut stub: Value) -> StoreResult<Value> {
        let Some(link) = stub.get("bulkDataLink").and_then(Value::as_str).map(str::to_string) else {
            return Ok(stub);
        };

        let bulk_object = self
            .blob
            .get(&link)
            .await?
            .ok_or_else(|| ResourceError::NotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            })?;

        if bulk_object.link != link {
            warn!(
                key = %link,
                claimed_link = %bulk_object.link,
                "blob link self-check failed"
            );
            return Err(ResourceError::NotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            }
            .into());
        }

        if let Some(obj) = stub.as_object_mut() {
            for (field, value) in bulk_object.data {
                obj.insert(field, value);
            }
            obj.remove("bulkDataLink");
        }
        Ok(stub)
    }

    /// Deletes the blob and the primary item concurrently, best-effort; if
    /// the KV transition fails the blob is left orphaned for GC (§4.5
    /// "Delete").
    pub async fn delete(
        &self,
        resource_type: &str,
        id: &str,
        tenant_id: Option<&TenantId>,
        bulk_data_link: Option<&str>,
    ) -> StoreResult<()> {
        self.assert_tenancy(tenant_id)?;

        let blob_delete = async {
            if let Some(link) = bulk_data_link {
                if let Err(err) = self.blob.delete(link).await {
                    warn!(key = %link, error = %err, "best-effort blob delete failed");
                }
            }
        };
        let kv_delete = data_service::delete_resource(&self.kv, self.lock_duration, resource_type, id, tenant_id);

        let (_, kv_result) = tokio::join!(blob_delete, kv_delete);
        kv_result
    }

    pub fn is_registered(&self, resource_type: &str) -> bool {
        self.registry.is_registered(resource_type)
    }
}
