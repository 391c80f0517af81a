//! Change Propagator: mirrors the primary table's ordered change feed into
//! the search index, with alias-based zero-downtime index management
//! (§4.6).
//!
//! Idempotent by construction (P5): replaying the same record converges the
//! index to the same final state, since every operation is a full upsert or
//! delete keyed on the normalized id, never a partial field update.

use std::sync::Arc;

use serde_json::Value;
use tracing::warn;

use crate::error::StoreResult;
use crate::item::{decode_for_read, DocumentStatus};
use crate::kv::KvStore;
use crate::search::{IndexMapping, SearchIndex, SearchOp};
use crate::tenant::TenantId;

/// Resource types whose payloads are never indexed (§4.6 step 1).
const SKIPPED_RESOURCE_TYPES: &[&str] = &["Binary"];

/// Consumes [`KvStore::poll_changes`] and keeps the search index converged.
pub struct ChangePropagator {
    kv: Arc<dyn KvStore>,
    search: Arc<dyn SearchIndex>,
    multi_tenant: bool,
}

impl ChangePropagator {
    pub fn new(kv: Arc<dyn KvStore>, search: Arc<dyn SearchIndex>, multi_tenant: bool) -> Self {
        Self {
            kv,
            search,
            multi_tenant,
        }
    }

    fn alias_for(resource_type: &str) -> String {
        format!("{}-alias", resource_type.to_lowercase())
    }

    /// The default physical index name backing a resource type's alias.
    ///
    /// An alias and a concrete index can never share a name in a real search
    /// engine, so this is always distinct from [`alias_for`] — `ensure_index`
    /// creates this index (not one literally named after the alias) the
    /// first time a resource type is seen.
    fn default_index_for(resource_type: &str) -> String {
        format!("{}-v1", resource_type.to_lowercase())
    }

    /// Drains up to `max` change-feed records and applies every one of them
    /// to the search index as a single batched bulk call per alias.
    ///
    /// On any bulk failure the error is propagated rather than swallowed, so
    /// the caller can redeliver the same batch on the next poll (§4.6 step
    /// 5) — safe because of idempotence.
    pub async fn propagate_once(&self, max: usize) -> StoreResult<usize> {
        let records = self.kv.poll_changes(max).await?;
        if records.is_empty() {
            return Ok(0);
        }

        let mut ops_by_alias: std::collections::HashMap<String, Vec<SearchOp>> =
            std::collections::HashMap::new();

        for record in &records {
            if SKIPPED_RESOURCE_TYPES.contains(&record.item.resource_type.as_str()) {
                continue;
            }

            // Transient statuses never reach the index, so index/alias
            // creation is deferred until a record actually needs one
            // (§4.6 step 3 only ever runs for a steady-state AVAILABLE/
            // DELETED record, never for PENDING/LOCKED/PENDING_DELETE).
            let op = match record.item.document_status {
                DocumentStatus::Available => SearchOp::Upsert {
                    id: normalize_id(&record.item),
                    document: decode_for_read(&record.item, self.multi_tenant),
                },
                DocumentStatus::Deleted => SearchOp::Delete {
                    id: normalize_id(&record.item),
                },
                DocumentStatus::Pending
                | DocumentStatus::Locked
                | DocumentStatus::PendingDelete => continue,
            };

            let alias = Self::alias_for(&record.item.resource_type);
            self.ensure_index(&record.item.resource_type, &alias).await?;
            ops_by_alias.entry(alias).or_default().push(op);
        }

        for (alias, ops) in ops_by_alias {
            if let Err(err) = self.search.bulk(&alias, ops.clone()).await {
                warn!(alias = %alias, count = ops.len(), error = %err, "bulk indexing failed; feed will redeliver");
                return Err(err);
            }
        }

        Ok(records.len())
    }

    /// Ensures `alias` resolves to a physical index (§4.6 step 3): creates
    /// [`default_index_for`] with the standard mapping and attaches the
    /// alias if neither exists; attaches the alias to an already-existing
    /// index if only the alias is missing (supports zero-downtime
    /// reindexing).
    async fn ensure_index(&self, resource_type: &str, alias: &str) -> StoreResult<()> {
        if self.search.alias_exists(alias).await? {
            return Ok(());
        }
        let index = Self::default_index_for(resource_type);
        if !self.search.index_exists(&index).await? {
            let mapping = IndexMapping::standard(self.multi_tenant);
            self.search.create_index(&index, &mapping).await?;
        }
        self.search.create_alias(alias, &index).await?;
        Ok(())
    }

    /// Rebuilds `alias` against a freshly-named physical index and flips the
    /// alias over once the rebuild is populated, without any window where
    /// the alias resolves to nothing (SPEC_FULL §4.6 supplement).
    pub async fn reindex(
        &self,
        alias: &str,
        new_index: &str,
        mapping: &IndexMapping,
        documents: Vec<(String, Value)>,
    ) -> StoreResult<()> {
        if !self.search.index_exists(new_index).await? {
            self.search.create_index(new_index, mapping).await?;
        }

        let ops = documents
            .into_iter()
            .map(|(id, document)| SearchOp::Upsert { id, document })
            .collect();
        self.search.bulk(new_index, ops).await?;

        self.search.create_alias(alias, new_index).await?;
        Ok(())
    }
}

/// Strips any embedded `tenantId` suffix out of the item's storage id (§4.6
/// step 2).
fn normalize_id(item: &crate::item::Item) -> String {
    match &item.tenant_id {
        Some(tenant_id) => item
            .storage_id
            .strip_suffix(tenant_id.as_str())
            .unwrap_or(&item.storage_id)
            .to_string(),
        None => item.storage_id.clone(),
    }
}
