//! Data Service: single-resource write paths (§4.3 "Write paths").
//!
//! `createResource` goes straight to the KV store since a brand-new id has
//! no prior version to stage against; `updateResource` and `deleteResource`
//! both degrade to a one-entry Bundle Service transaction (skipping straight
//! to `create_resource` for `updateResource`'s "doesn't exist yet, and
//! update-as-create is enabled" fast path), so that their staging/commit/
//! rollback semantics exactly match what a multi-resource bundle would do
//! for the same write.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::bundle::{run_bundle, BatchRequest, BundleMode, Operation};
use crate::error::{ResourceError, StoreResult};
use crate::item::{build_storage_id, decode_for_read, encode_for_insert, DocumentStatus};
use crate::kv::KvStore;
use crate::params::insert_new_version;
use crate::tenant::TenantId;
use crate::version_store::exists;

/// Result of a successful write: the resource as it now reads, plus its new
/// version id and timestamp.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub resource: Value,
    pub vid: u64,
    pub last_modified: DateTime<Utc>,
}

/// Creates a brand-new resource at `vid = 1`.
///
/// Generates an id when `id` is absent. Conditional insert at AVAILABLE —
/// unlike a bundle participant, a standalone create has no other entries to
/// roll back against, so it skips the PENDING staging step entirely and
/// writes its single version straight to AVAILABLE.
pub async fn create_resource(
    kv: &Arc<dyn KvStore>,
    resource_type: &str,
    id: Option<&str>,
    resource: Value,
    tenant_id: Option<&TenantId>,
) -> StoreResult<WriteOutcome> {
    let id = id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());
    let storage_id = build_storage_id(&id, tenant_id);

    let item = encode_for_insert(resource, &id, 1, DocumentStatus::Available, resource_type, tenant_id);
    let vid = item.vid;
    let last_modified = item.meta.last_updated;

    kv.transact_write(vec![insert_new_version(item.clone())])
        .await
        .map_err(|_| {
            ResourceError::InvalidResource {
                message: format!("{resource_type}/{id} already exists"),
            }
        })?;

    Ok(WriteOutcome {
        resource: decode_for_read(&item, false),
        vid,
        last_modified,
    })
}

/// Updates an existing resource, or creates it if absent and
/// `update_create_supported` is enabled.
///
/// Confirms current existence via the Version Store first; if nothing is
/// visible and update-as-create is disabled, fails with `ResourceNotFound`.
/// Otherwise delegates to the Bundle Service as a single-entry transaction
/// so the write gets the same staging/commit guarantees a multi-resource
/// bundle would give it.
pub async fn update_resource(
    kv: &Arc<dyn KvStore>,
    lock_duration: Duration,
    update_create_supported: bool,
    resource_type: &str,
    id: &str,
    resource: Value,
    tenant_id: Option<&TenantId>,
) -> StoreResult<WriteOutcome> {
    let storage_id = build_storage_id(id, tenant_id);
    let currently_exists = exists(kv, resource_type, &storage_id).await;

    if !currently_exists {
        if !update_create_supported {
            return Err(ResourceError::NotFound {
                resource_type: resource_type.to_string(),
                id: id.to_string(),
            }
            .into());
        }
        return create_resource(kv, resource_type, Some(id), resource, tenant_id).await;
    }

    let request = BatchRequest {
        operation: Operation::Update,
        resource_type: resource_type.to_string(),
        id: Some(id.to_string()),
        resource: Some(resource),
        tenant_id: tenant_id.cloned(),
        full_url: None,
    };
    let mut responses = run_bundle(kv, lock_duration, vec![request], BundleMode::Transaction).await?;
    let response = responses.remove(0);
    Ok(WriteOutcome {
        resource: response.resource.unwrap_or(Value::Null),
        vid: response.vid,
        last_modified: response.last_modified,
    })
}

/// Deletes the current AVAILABLE version, delegating to the Bundle Service
/// as a single-entry transaction so the AVAILABLE -> PENDING_DELETE ->
/// DELETED transition gets the same staging/commit/rollback guarantees a
/// multi-resource bundle would give it: a delete that fails partway is
/// rolled back (PENDING_DELETE -> AVAILABLE) instead of stranding the item
/// in PENDING_DELETE forever.
pub async fn delete_resource(
    kv: &Arc<dyn KvStore>,
    lock_duration: Duration,
    resource_type: &str,
    id: &str,
    tenant_id: Option<&TenantId>,
) -> StoreResult<()> {
    let request = BatchRequest {
        operation: Operation::Delete,
        resource_type: resource_type.to_string(),
        id: Some(id.to_string()),
        resource: None,
        tenant_id: tenant_id.cloned(),
        full_url: None,
    };
    run_bundle(kv, lock_duration, vec![request], BundleMode::Transaction).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::InMemoryKvStore;
    use crate::version_store::read_most_recent;

    fn kv_store() -> Arc<dyn KvStore> {
        Arc::new(InMemoryKvStore::new())
    }

    #[tokio::test]
    async fn create_assigns_vid_one() {
        let kv = kv_store();
        let outcome = create_resource(
            &kv,
            "Patient",
            Some("p1"),
            serde_json::json!({"name": [{"family": "Jameson"}]}),
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome.vid, 1);
        assert_eq!(outcome.resource["id"], "p1");
    }

    #[tokio::test]
    async fn create_generates_id_when_absent() {
        let kv = kv_store();
        let outcome = create_resource(&kv, "Patient", None, serde_json::json!({}), None)
            .await
            .unwrap();
        assert!(outcome.resource["id"].as_str().unwrap().len() > 0);
    }

    #[tokio::test]
    async fn create_conflict_on_duplicate_id() {
        let kv = kv_store();
        create_resource(&kv, "Patient", Some("p1"), serde_json::json!({}), None)
            .await
            .unwrap();
        let result = create_resource(&kv, "Patient", Some("p1"), serde_json::json!({}), None).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn update_existing_increments_vid() {
        let kv = kv_store();
        create_resource(&kv, "Patient", Some("p1"), serde_json::json!({}), None)
            .await
            .unwrap();
        let outcome = update_resource(
            &kv,
            Duration::from_millis(35_000),
            false,
            "Patient",
            "p1",
            serde_json::json!({"name": [{"family": "Changed"}]}),
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome.vid, 2);
    }

    #[tokio::test]
    async fn update_missing_without_create_support_fails() {
        let kv = kv_store();
        let result = update_resource(
            &kv,
            Duration::from_millis(35_000),
            false,
            "Patient",
            "missing",
            serde_json::json!({}),
            None,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn update_missing_with_create_support_creates() {
        let kv = kv_store();
        let outcome = update_resource(
            &kv,
            Duration::from_millis(35_000),
            true,
            "Patient",
            "new-id",
            serde_json::json!({}),
            None,
        )
        .await
        .unwrap();
        assert_eq!(outcome.vid, 1);
    }

    #[tokio::test]
    async fn delete_transitions_to_deleted() {
        let kv = kv_store();
        create_resource(&kv, "Patient", Some("p1"), serde_json::json!({}), None)
            .await
            .unwrap();
        delete_resource(&kv, Duration::from_millis(35_000), "Patient", "p1", None)
            .await
            .unwrap();
        let result = read_most_recent(&kv, "Patient", "p1").await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn delete_missing_resource_fails() {
        let kv = kv_store();
        let result = delete_resource(&kv, Duration::from_millis(35_000), "Patient", "missing", None).await;
        assert!(result.is_err());
    }
}
