//! Bundle Service: multi-resource atomic transaction with two-phase commit
//! (§4.4).
//!
//! Staging (Phase 1) and commit (Phase 2) batches are each submitted as a
//! single transactional [`KvStore::transact_write`] call, split into
//! equal-sized sub-batches when they exceed the platform's transaction size
//! (§4.4). Any sub-batch failure triggers rollback of everything staged so
//! far — every staged create/update/delete is tracked in a `locks` map for
//! exactly that purpose.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tracing::warn;
use uuid::Uuid;

use crate::error::{ResourceError, StoreError, StoreResult, TransactionError};
use crate::item::{build_storage_id, decode_for_read, encode_for_insert, DocumentStatus, Item};
use crate::kv::KvStore;
use crate::params::{delete_staged, insert_new_version, point_get, status_transition};
use crate::tenant::TenantId;
use crate::version_store::read_most_recent;

/// The platform's bounded transaction size (§4.4); batches larger than this
/// are split into equal-sized sub-batches committed sequentially.
pub const MAX_TRANSACTION_ITEMS: usize = 25;

/// One entry of a client-submitted bundle.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub operation: Operation,
    pub resource_type: String,
    /// Required for `update`/`delete`/`read`; optional for `create` (a
    /// missing id is generated).
    pub id: Option<String>,
    pub resource: Option<Value>,
    pub tenant_id: Option<TenantId>,
    /// `full_url` from the original bundle entry, e.g. `urn:uuid:...`, used
    /// to resolve cross-entry references (SPEC_FULL §4.4 supplement).
    pub full_url: Option<String>,
}

/// The kind of operation a [`BatchRequest`] performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
    Read,
}

/// Per-entry outcome returned alongside the overall bundle result.
#[derive(Debug, Clone)]
pub struct BatchResponse {
    pub resource_type: String,
    pub id: String,
    pub vid: u64,
    pub last_modified: chrono::DateTime<chrono::Utc>,
    pub resource: Option<Value>,
}

/// Whether the Bundle Service commits all-or-nothing or best-effort.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BundleMode {
    /// §4.4's two-phase commit: any participant's failure rolls back every
    /// other staged entry.
    Transaction,
    /// SPEC_FULL §4.4 supplement: each entry stages/commits independently,
    /// with no cross-entry rollback.
    Batch,
}

struct StagedEntry {
    request_index: usize,
    operation: Operation,
    resource_type: String,
    storage_id: String,
    vid: u64,
    /// `true` for a freshly-inserted create/update; governs rollback
    /// strategy (delete-staged vs. transition-back).
    is_new_insert: bool,
    generated_resource: Option<Value>,
}

/// Runs `entries` through the two-phase commit protocol of §4.4 (or the
/// best-effort batch mode of the SPEC_FULL supplement).
pub async fn run_bundle(
    kv: &Arc<dyn KvStore>,
    lock_duration: Duration,
    entries: Vec<BatchRequest>,
    mode: BundleMode,
) -> StoreResult<Vec<BatchResponse>> {
    match mode {
        BundleMode::Transaction => run_transaction(kv, lock_duration, entries).await,
        BundleMode::Batch => run_batch(kv, lock_duration, entries).await,
    }
}

async fn run_batch(
    kv: &Arc<dyn KvStore>,
    lock_duration: Duration,
    entries: Vec<BatchRequest>,
) -> StoreResult<Vec<BatchResponse>> {
    let mut responses = Vec::with_capacity(entries.len());
    let mut reference_map: HashMap<String, String> = HashMap::new();

    for entry in entries {
        let entry = resolve_references(entry, &reference_map);
        match run_transaction(kv, lock_duration, vec![entry.clone()]).await {
            Ok(mut single) => {
                let response = single.remove(0);
                if entry.operation == Operation::Create {
                    if let Some(full_url) = &entry.full_url {
                        reference_map.insert(
                            full_url.clone(),
                            format!("{}/{}", response.resource_type, response.id),
                        );
                    }
                }
                responses.push(response);
            }
            Err(err) => {
                warn!(error = %err, "batch entry failed independently of its siblings");
                return Err(err);
            }
        }
    }
    Ok(responses)
}

fn resolve_references(mut entry: BatchRequest, map: &HashMap<String, String>) -> BatchRequest {
    if let Some(resource) = entry.resource.as_mut() {
        resolve_urn_uuid_references(resource, map);
    }
    entry
}

/// Rewrites every `urn:uuid:` reference in `value` that resolves against
/// `map` (SPEC_FULL §4.4 supplement).
fn resolve_urn_uuid_references(value: &mut Value, map: &HashMap<String, String>) {
    match value {
        Value::Object(obj) => {
            if let Some(Value::String(reference)) = obj.get("reference") {
                if reference.starts_with("urn:uuid:") {
                    if let Some(resolved) = map.get(reference) {
                        obj.insert("reference".to_string(), Value::String(resolved.clone()));
                    }
                }
            }
            for child in obj.values_mut() {
                resolve_urn_uuid_references(child, map);
            }
        }
        Value::Array(items) => {
            for item in items {
                resolve_urn_uuid_references(item, map);
            }
        }
        _ => {}
    }
}

async fn run_transaction(
    kv: &Arc<dyn KvStore>,
    lock_duration: Duration,
    entries: Vec<BatchRequest>,
) -> StoreResult<Vec<BatchResponse>> {
    // Phase 0 — pre-resolution: resolve the current vid of every
    // update/delete target.
    let mut id_to_version: HashMap<String, u64> = HashMap::new();
    for entry in &entries {
        if matches!(entry.operation, Operation::Update | Operation::Delete) {
            let id = entry.id.clone().ok_or_else(|| {
                StoreError::from(ResourceError::InvalidResource {
                    message: "update/delete requires an id".to_string(),
                })
            })?;
            let storage_id = build_storage_id(&id, entry.tenant_id.as_ref());
            let current = read_most_recent(kv, &entry.resource_type, &storage_id).await?;
            id_to_version.insert(storage_id, current.vid);
        }
    }

    // Phase 1 — staging.
    let mut staging_ops = Vec::new();
    let mut staged: Vec<StagedEntry> = Vec::new();
    let mut read_points = Vec::new();

    for (index, entry) in entries.iter().enumerate() {
        match entry.operation {
            Operation::Create => {
                let id = entry.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
                let storage_id = build_storage_id(&id, entry.tenant_id.as_ref());
                let resource = entry.resource.clone().unwrap_or_else(|| serde_json::json!({}));
                let item = encode_for_insert(
                    resource,
                    &id,
                    1,
                    DocumentStatus::Pending,
                    &entry.resource_type,
                    entry.tenant_id.as_ref(),
                );
                let decoded = decode_for_read(&item, false);
                staging_ops.push(insert_new_version(item));
                staged.push(StagedEntry {
                    request_index: index,
                    operation: Operation::Create,
                    resource_type: entry.resource_type.clone(),
                    storage_id,
                    vid: 1,
                    is_new_insert: true,
                    generated_resource: Some(decoded),
                });
            }
            Operation::Update => {
                let id = entry.id.clone().expect("checked in phase 0");
                let storage_id = build_storage_id(&id, entry.tenant_id.as_ref());
                let current_vid = id_to_version[&storage_id];
                let new_vid = current_vid + 1;
                let resource = entry.resource.clone().unwrap_or_else(|| serde_json::json!({}));
                let item = encode_for_insert(
                    resource,
                    &id,
                    new_vid,
                    DocumentStatus::Pending,
                    &entry.resource_type,
                    entry.tenant_id.as_ref(),
                );
                let decoded = decode_for_read(&item, false);
                staging_ops.push(insert_new_version(item));
                staged.push(StagedEntry {
                    request_index: index,
                    operation: Operation::Update,
                    resource_type: entry.resource_type.clone(),
                    storage_id,
                    vid: new_vid,
                    is_new_insert: true,
                    generated_resource: Some(decoded),
                });
            }
            Operation::Delete => {
                let id = entry.id.clone().expect("checked in phase 0");
                let storage_id = build_storage_id(&id, entry.tenant_id.as_ref());
                let vid = id_to_version[&storage_id];
                staging_ops.push(status_transition(
                    storage_id.clone(),
                    vid,
                    entry.resource_type.clone(),
                    DocumentStatus::Available,
                    DocumentStatus::PendingDelete,
                    lock_duration,
                ));
                staged.push(StagedEntry {
                    request_index: index,
                    operation: Operation::Delete,
                    resource_type: entry.resource_type.clone(),
                    storage_id,
                    vid,
                    is_new_insert: false,
                    generated_resource: None,
                });
            }
            Operation::Read => {
                let id = entry.id.clone().ok_or_else(|| {
                    StoreError::from(ResourceError::InvalidResource {
                        message: "read requires an id".to_string(),
                    })
                })?;
                let storage_id = build_storage_id(&id, entry.tenant_id.as_ref());
                let current = read_most_recent(kv, &entry.resource_type, &storage_id).await?;
                read_points.push((index, storage_id, current.vid));
            }
        }
    }

    if let Err(err) = commit_batches(kv, staging_ops).await {
        // Nothing committed yet if the very first sub-batch failed; if a
        // later sub-batch failed, everything in earlier sub-batches is
        // already staged and must be rolled back.
        rollback(kv, &staged).await;
        return Err(bundle_failed(entries.len(), err));
    }

    // Phase 2 — commit.
    let mut commit_ops = Vec::new();
    for entry in &staged {
        match entry.operation {
            Operation::Create | Operation::Update => {
                commit_ops.push(status_transition(
                    entry.storage_id.clone(),
                    entry.vid,
                    entry.resource_type.clone(),
                    DocumentStatus::Pending,
                    DocumentStatus::Available,
                    lock_duration,
                ));
            }
            Operation::Delete => {
                commit_ops.push(status_transition(
                    entry.storage_id.clone(),
                    entry.vid,
                    entry.resource_type.clone(),
                    DocumentStatus::PendingDelete,
                    DocumentStatus::Deleted,
                    lock_duration,
                ));
            }
            Operation::Read => {}
        }
    }

    if !commit_ops.is_empty() {
        if let Err(err) = commit_batches(kv, commit_ops).await {
            rollback(kv, &staged).await;
            return Err(bundle_failed(entries.len(), err));
        }
    }

    // Populate read responses now that every commit succeeded.
    let mut reads_by_index = HashMap::new();
    for (index, storage_id, vid) in read_points {
        let item = kv
            .get_item(&point_get(storage_id, vid))
            .await?
            .ok_or_else(|| {
                bundle_failed(
                    entries.len(),
                    ResourceError::NotFound {
                        resource_type: entries[index].resource_type.clone(),
                        id: entries[index].id.clone().unwrap_or_default(),
                    }
                    .into(),
                )
            })?;
        reads_by_index.insert(index, item);
    }

    let mut responses: Vec<Option<BatchResponse>> = vec![None; entries.len()];
    for entry in &staged {
        let id = entries[entry.request_index]
            .id
            .clone()
            .unwrap_or_else(|| entry.storage_id.clone());
        let last_modified = chrono::Utc::now();
        responses[entry.request_index] = Some(BatchResponse {
            resource_type: entry.resource_type.clone(),
            id,
            vid: entry.vid,
            last_modified,
            resource: entry.generated_resource.clone(),
        });
    }
    for (index, item) in reads_by_index {
        responses[index] = Some(BatchResponse {
            resource_type: item.resource_type.clone(),
            id: item.storage_id.clone(),
            vid: item.vid,
            last_modified: item.meta.last_updated,
            resource: Some(decode_for_read(&item, false)),
        });
    }

    Ok(responses
        .into_iter()
        .map(|r| r.expect("every entry is either staged or a read"))
        .collect())
}

/// Commits `ops` as one transactional batch, splitting into
/// [`MAX_TRANSACTION_ITEMS`]-sized sub-batches committed sequentially when
/// needed (§4.4).
async fn commit_batches(kv: &Arc<dyn KvStore>, ops: Vec<crate::params::KvWriteOp>) -> StoreResult<()> {
    for chunk in ops.chunks(MAX_TRANSACTION_ITEMS) {
        kv.transact_write(chunk.to_vec()).await?;
    }
    Ok(())
}

/// Undoes every staged entry: deletes newly-inserted creates/updates
/// unconditionally, and transitions staged deletes back to AVAILABLE.
/// Idempotent and safe to retry; partial failures are logged but the bundle
/// is still reported as failed (§4.4 "Rollback").
async fn rollback(kv: &Arc<dyn KvStore>, staged: &[StagedEntry]) {
    for entry in staged {
        let result = if entry.is_new_insert {
            kv.transact_write(vec![delete_staged(entry.storage_id.clone(), entry.vid)])
                .await
        } else {
            kv.transact_write(vec![status_transition(
                entry.storage_id.clone(),
                entry.vid,
                entry.resource_type.clone(),
                DocumentStatus::PendingDelete,
                DocumentStatus::Available,
                Duration::from_millis(0),
            )])
            .await
        };
        if let Err(err) = result {
            warn!(
                storage_id = %entry.storage_id,
                vid = entry.vid,
                error = %err,
                "rollback failed for bundle entry"
            );
        }
    }
}

fn bundle_failed(total: usize, cause: StoreError) -> StoreError {
    warn!(error = %cause, "bundle entry failed; rolling back");
    TransactionError::BundleFailed {
        total,
        failures: 1,
        outcomes: Vec::new(),
    }
    .into()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::memory::InMemoryKvStore;
    use crate::version_store::read_most_recent;
    use std::time::Duration;

    fn kv_store() -> Arc<dyn KvStore> {
        Arc::new(InMemoryKvStore::new())
    }

    fn create_request(resource_type: &str, id: Option<&str>) -> BatchRequest {
        BatchRequest {
            operation: Operation::Create,
            resource_type: resource_type.to_string(),
            id: id.map(str::to_string),
            resource: Some(serde_json::json!({"name": "x"})),
            tenant_id: None,
            full_url: None,
        }
    }

    #[tokio::test]
    async fn single_create_becomes_available() {
        let kv = kv_store();
        let responses = run_bundle(
            &kv,
            Duration::from_millis(35_000),
            vec![create_request("Patient", Some("p1"))],
            BundleMode::Transaction,
        )
        .await
        .unwrap();
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0].vid, 1);

        let item = read_most_recent(&kv, "Patient", "p1").await.unwrap();
        assert_eq!(item.document_status, DocumentStatus::Available);
    }

    #[tokio::test]
    async fn update_increments_vid() {
        let kv = kv_store();
        run_bundle(
            &kv,
            Duration::from_millis(35_000),
            vec![create_request("Patient", Some("p1"))],
            BundleMode::Transaction,
        )
        .await
        .unwrap();

        let update = BatchRequest {
            operation: Operation::Update,
            resource_type: "Patient".to_string(),
            id: Some("p1".to_string()),
            resource: Some(serde_json::json!({"name": "y"})),
            tenant_id: None,
            full_url: None,
        };
        let responses = run_bundle(
            &kv,
            Duration::from_millis(35_000),
            vec![update],
            BundleMode::Transaction,
        )
        .await
        .unwrap();
        assert_eq!(responses[0].vid, 2);
    }

    #[tokio::test]
    async fn delete_on_missing_resource_fails_whole_bundle() {
        let kv = kv_store();
        let delete = BatchRequest {
            operation: Operation::Delete,
            resource_type: "Patient".to_string(),
            id: Some("missing".to_string()),
            resource: None,
            tenant_id: None,
            full_url: None,
        };
        let result = run_bundle(
            &kv,
            Duration::from_millis(35_000),
            vec![delete],
            BundleMode::Transaction,
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn mixed_bundle_create_update_delete_all_commit() {
        let kv = kv_store();
        run_bundle(
            &kv,
            Duration::from_millis(35_000),
            vec![
                create_request("Patient", Some("b1")),
                create_request("Patient", Some("c1")),
            ],
            BundleMode::Transaction,
        )
        .await
        .unwrap();

        let entries = vec![
            create_request("Patient", Some("a1")),
            BatchRequest {
                operation: Operation::Update,
                resource_type: "Patient".to_string(),
                id: Some("b1".to_string()),
                resource: Some(serde_json::json!({"name": "updated"})),
                tenant_id: None,
                full_url: None,
            },
            BatchRequest {
                operation: Operation::Delete,
                resource_type: "Patient".to_string(),
                id: Some("c1".to_string()),
                resource: None,
                tenant_id: None,
                full_url: None,
            },
        ];
        let responses = run_bundle(&kv, Duration::from_millis(35_000), entries, BundleMode::Transaction)
            .await
            .unwrap();
        assert_eq!(responses.len(), 3);

        assert!(read_most_recent(&kv, "Patient", "a1").await.is_ok());
        assert!(read_most_recent(&kv, "Patient", "c1").await.is_err());
    }

    #[tokio::test]
    async fn urn_uuid_reference_resolved_in_batch_mode() {
        let kv = kv_store();
        let mut create = create_request("Patient", None);
        create.full_url = Some("urn:uuid:11111111-1111-1111-1111-111111111111".to_string());

        let mut observation = BatchRequest {
            operation: Operation::Create,
            resource_type: "Observation".to_string(),
            id: Some("obs1".to_string()),
            resource: Some(serde_json::json!({
                "subject": {"reference": "urn:uuid:11111111-1111-1111-1111-111111111111"}
            })),
            tenant_id: None,
            full_url: None,
        };
        observation.id = Some("obs1".to_string());

        let responses = run_bundle(
            &kv,
            Duration::from_millis(35_000),
            vec![create, observation],
            BundleMode::Batch,
        )
        .await
        .unwrap();

        let obs_resource = responses[1].resource.clone().unwrap();
        let resolved_reference = obs_resource["subject"]["reference"].as_str().unwrap();
        assert!(resolved_reference.starts_with("Patient/"));
    }
}
