//! `SearchIndex`: the consumed interface over the inverted-index search
//! engine (§6). The Change Propagator (§4.6) is the only component that
//! writes through this trait.

pub mod memory;

#[cfg(feature = "elasticsearch")]
pub mod elasticsearch;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreResult;

/// One upsert or delete destined for a single physical index, batched by the
/// Change Propagator and executed as one bulk call (§4.6 step 5).
#[derive(Debug, Clone)]
pub enum SearchOp {
    /// Index (or reindex) `document` under `id`.
    Upsert { id: String, document: Value },
    /// Remove the document with `id`.
    Delete { id: String },
}

/// The mapping used when a physical index is created for a resource type
/// (§4.6 step 3): keyword fields for `id`, `resourceType`, `documentStatus`,
/// `_references`, plus `tenantId` when multi-tenancy is enabled.
#[derive(Debug, Clone)]
pub struct IndexMapping {
    pub keyword_fields: Vec<&'static str>,
}

impl IndexMapping {
    /// Builds the standard mapping, including `tenantId` iff multi-tenancy
    /// is enabled.
    pub fn standard(multi_tenant: bool) -> Self {
        let mut keyword_fields = vec!["id", "resourceType", "documentStatus", "_references"];
        if multi_tenant {
            keyword_fields.push("tenantId");
        }
        Self { keyword_fields }
    }
}

/// The consumed interface over the search engine (§6).
///
/// Alias management (create-index, create-alias, existence checks) is
/// exposed as distinct primitives so the Change Propagator's alias dance
/// (§4.6 step 3) is explicit rather than hidden behind a single
/// `ensure_index` call: the propagator must be able to tell "index exists,
/// alias doesn't" apart from "neither exists" to support zero-downtime
/// reindexing.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    /// `true` iff the alias (not necessarily a physical index) exists.
    async fn alias_exists(&self, alias: &str) -> StoreResult<bool>;

    /// `true` iff the concrete physical index exists.
    async fn index_exists(&self, index: &str) -> StoreResult<bool>;

    /// Creates a physical index with the given mapping. Errors if the index
    /// already exists.
    async fn create_index(&self, index: &str, mapping: &IndexMapping) -> StoreResult<()>;

    /// Points `alias` at `index`, in addition to whatever it already points
    /// at (so a reindex can attach the new index before detaching the old
    /// one — see [`ChangePropagator::reindex`](crate::propagator::ChangePropagator::reindex)).
    async fn create_alias(&self, alias: &str, index: &str) -> StoreResult<()>;

    /// Detaches `alias` from `index`. A no-op if the alias did not point at
    /// that index.
    async fn remove_alias(&self, alias: &str, index: &str) -> StoreResult<()>;

    /// Executes every op in `ops` as a single bulk call against `alias`.
    ///
    /// Partial failure is reported as [`crate::error::SearchError::BulkFailed`]
    /// carrying the count of failed items; the Change Propagator logs the
    /// offending ids and re-raises so the feed redelivers the whole batch
    /// (§4.6 step 5) — idempotence (P5) makes the redelivery safe.
    async fn bulk(&self, alias: &str, ops: Vec<SearchOp>) -> StoreResult<()>;
}
