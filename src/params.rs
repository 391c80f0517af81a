//! Param Builder: conditional-write, query, and transaction descriptors.
//!
//! Pure function module — no I/O. Every conditional expression used
//! anywhere in the core is assembled here exactly once; [`KvStore`]
//! implementations evaluate the descriptors this module produces but never
//! invent their own conditions (see [`transition_is_legal`]).
//!
//! [`KvStore`]: crate::kv::KvStore

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::item::{DocumentStatus, Item};

/// The number of most-recent versions `readMostRecent` needs to examine
/// (top, and the one behind it in case top is PENDING).
pub const MOST_RECENT_QUERY_LIMIT: u32 = 2;

/// One item of a transactional write batch.
///
/// The Bundle Service assembles these during staging (Phase 1) and commit
/// (Phase 2); the Data Service assembles a single-element vector for its
/// fast paths. [`KvStore::transact_write`](crate::kv::KvStore::transact_write)
/// is the only place these are consumed.
#[derive(Debug, Clone)]
pub enum KvWriteOp {
    /// Insert a brand-new item.
    ///
    /// Conditional on `attribute_not_exists(storageId, vid)` unless
    /// `allow_overwrite` is set (never set by this crate; reserved for a
    /// future migration/backfill path).
    Insert { item: Item, allow_overwrite: bool },

    /// Transition `(storage_id, vid)` from `from` to `to`, guarded by the
    /// compound condition of §4.2: `(resourceType matches) AND (current
    /// status = from OR (lock expired AND current status is transient))`.
    Transition {
        storage_id: String,
        vid: u64,
        resource_type: String,
        from: DocumentStatus,
        to: DocumentStatus,
        lock_duration: Duration,
    },

    /// Unconditionally delete `(storage_id, vid)`. Used only by bundle
    /// rollback of a staged create/update.
    Delete { storage_id: String, vid: u64 },
}

/// Builds an [`KvWriteOp::Insert`] for a freshly encoded item.
pub fn insert_new_version(item: Item) -> KvWriteOp {
    KvWriteOp::Insert {
        item,
        allow_overwrite: false,
    }
}

/// Builds a [`KvWriteOp::Transition`] guarded by the standard compound
/// condition, using the configured lock duration.
pub fn status_transition(
    storage_id: impl Into<String>,
    vid: u64,
    resource_type: impl Into<String>,
    from: DocumentStatus,
    to: DocumentStatus,
    lock_duration: Duration,
) -> KvWriteOp {
    KvWriteOp::Transition {
        storage_id: storage_id.into(),
        vid,
        resource_type: resource_type.into(),
        from,
        to,
        lock_duration,
    }
}

/// Builds the unconditional delete used during rollback of a staged
/// create/update.
pub fn delete_staged(storage_id: impl Into<String>, vid: u64) -> KvWriteOp {
    KvWriteOp::Delete {
        storage_id: storage_id.into(),
        vid,
    }
}

/// Decides whether a [`KvWriteOp::Transition`] may legally apply against
/// the currently-stored item.
///
/// This is the single source of truth for the guarded condition described
/// in §4.2; every [`KvStore`](crate::kv::KvStore) implementation (the
/// in-memory fake and the DynamoDB-backed client alike) must call this
/// rather than re-deriving the guard.
///
/// Returns `false` if `current` is `None` (nothing to transition), if the
/// resourceType disagrees, or if neither the exact-match nor the
/// lock-expired branch holds.
pub fn transition_is_legal(
    current: Option<&Item>,
    resource_type: &str,
    from: DocumentStatus,
    lock_duration: Duration,
    now: DateTime<Utc>,
) -> bool {
    let Some(current) = current else {
        return false;
    };
    if current.resource_type != resource_type {
        return false;
    }
    if current.document_status.as_str() == from.as_str() {
        return true;
    }
    let lock_expired = now >= current.lock_end_ts + lock_duration;
    lock_expired && current.document_status.is_transient()
}

/// A point-get of a specific `(storage_id, vid)`.
#[derive(Debug, Clone)]
pub struct PointGet {
    pub storage_id: String,
    pub vid: u64,
}

/// Builds a point-get descriptor.
pub fn point_get(storage_id: impl Into<String>, vid: u64) -> PointGet {
    PointGet {
        storage_id: storage_id.into(),
        vid,
    }
}

/// A most-recent-N query over a single chain, descending on `vid`.
#[derive(Debug, Clone)]
pub struct MostRecentQuery {
    pub storage_id: String,
    pub limit: u32,
}

/// Builds the `readMostRecent` query descriptor (limit fixed at
/// [`MOST_RECENT_QUERY_LIMIT`]).
pub fn most_recent_query(storage_id: impl Into<String>) -> MostRecentQuery {
    MostRecentQuery {
        storage_id: storage_id.into(),
        limit: MOST_RECENT_QUERY_LIMIT,
    }
}
