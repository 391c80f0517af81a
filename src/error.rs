//! Error types for the persistence core.
//!
//! Errors are organized by the component that raises them: resource-state
//! errors from the Data Service and Version Store, transaction errors from
//! the Bundle Service, tenancy errors from the Item Codec, and backend
//! errors from the KV/blob/search client adapters. [`StoreError`] composes
//! all of these into one public enum via `#[error(transparent)]` + `#[from]`.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// Result alias used throughout the crate's public API.
pub type StoreResult<T> = Result<T, StoreError>;

/// The primary error type for all persistence-core operations.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Resource lookup failures.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// Bundle/transaction failures.
    #[error(transparent)]
    Transaction(#[from] TransactionError),

    /// Tenancy configuration mismatches.
    #[error(transparent)]
    Tenancy(#[from] TenancyError),

    /// Export-job admission and lookup failures.
    #[error(transparent)]
    Export(#[from] ExportError),

    /// Errors surfaced by the KV store client.
    #[error(transparent)]
    Kv(#[from] KvError),

    /// Errors surfaced by the blob store client.
    #[error(transparent)]
    Blob(#[from] BlobError),

    /// Errors surfaced by the search index client.
    #[error(transparent)]
    Search(#[from] SearchError),
}

/// Errors related to resource identity, versioning, and validation.
#[derive(Error, Debug)]
pub enum ResourceError {
    /// No version in `{AVAILABLE, LOCKED, PENDING_DELETE}` could be located.
    #[error("resource not found: {resource_type}/{id}")]
    NotFound { resource_type: String, id: String },

    /// A specific `(id, vid)` is absent, belongs to a different resourceType,
    /// or is not in the AVAILABLE state.
    #[error("version not found: {resource_type}/{id}/_history/{vid}")]
    VersionNotFound {
        resource_type: String,
        id: String,
        vid: String,
    },

    /// Create, or update-as-create, was rejected: malformed id, or an insert
    /// collided with an existing item.
    #[error("invalid resource: {message}")]
    InvalidResource { message: String },
}

/// Errors from the Bundle Service's two-phase commit.
#[derive(Error, Debug)]
pub enum TransactionError {
    /// At least one participant of the bundle failed; rollback was
    /// performed (or attempted) for every other staged entry.
    #[error("bundle failed: {failures} of {total} entries did not commit")]
    BundleFailed {
        total: usize,
        failures: usize,
        outcomes: Vec<EntryOutcome>,
    },
}

/// Per-entry outcome carried by [`TransactionError::BundleFailed`].
#[derive(Debug, Clone)]
pub struct EntryOutcome {
    pub index: usize,
    pub resource_type: String,
    pub id: Option<String>,
    pub succeeded: bool,
    pub detail: Option<String>,
}

/// Errors raised when a request's tenancy shape disagrees with the
/// configured multi-tenancy mode.
#[derive(Error, Debug)]
pub enum TenancyError {
    /// `ENABLE_MULTI_TENANCY=true` but the request carried no tenantId.
    #[error("tenancy mismatch: multi-tenancy is enabled but no tenantId was supplied")]
    TenantIdRequired,

    /// `ENABLE_MULTI_TENANCY=false` but the request carried a tenantId.
    #[error("tenancy mismatch: multi-tenancy is disabled but tenantId '{tenant_id}' was supplied")]
    TenantIdForbidden { tenant_id: String },
}

/// Errors from the Export Registry's admission control and job lookup.
#[derive(Error, Debug)]
pub enum ExportError {
    /// Admission cap hit: either the requester already has a job
    /// in-progress/canceling, or the system-wide cap was reached.
    #[error("too many concurrent export requests: {reason}")]
    TooManyConcurrentExportRequests { reason: String },

    /// The job id does not exist.
    #[error("resource not found: $export/{job_id}")]
    NotFound { job_id: String },

    /// `cancelExport` was called on a job already in a terminal state.
    #[error("export job {job_id} cannot be canceled from status {status}")]
    NotCancellable { job_id: String, status: String },
}

/// Errors surfaced by a [`crate::kv::KvStore`] implementation.
#[derive(Error, Debug)]
pub enum KvError {
    /// A conditional-write precondition failed (item exists / does not
    /// exist / is not in the expected status).
    #[error("conditional check failed on {table}: {key}")]
    ConditionalCheckFailed { table: String, key: String },

    /// A transactional batch exceeded the backend's item-count limit.
    #[error("transaction batch too large: {size} items, limit {limit}")]
    TransactionTooLarge { size: usize, limit: usize },

    /// The underlying client call failed.
    #[error("kv backend error: {message}")]
    Backend { message: String },
}

/// Errors surfaced by a [`crate::blob::BlobStore`] implementation.
#[derive(Error, Debug)]
pub enum BlobError {
    /// The requested object does not exist.
    #[error("blob not found: {key}")]
    NotFound { key: String },

    /// The object's internal `link` field did not equal its own key.
    #[error("blob link mismatch for {key}: body claims link '{claimed_link}'")]
    LinkMismatch { key: String, claimed_link: String },

    /// The underlying client call failed.
    #[error("blob backend error: {message}")]
    Backend { message: String },
}

/// Errors surfaced by a [`crate::search::SearchIndex`] implementation.
#[derive(Error, Debug)]
pub enum SearchError {
    /// A bulk upsert/delete batch reported one or more item failures.
    #[error("search bulk operation failed: {failed} of {total} items")]
    BulkFailed {
        total: usize,
        failed: usize,
        message: String,
    },

    /// The underlying client call failed.
    #[error("search backend error: {message}")]
    Backend { message: String },
}
