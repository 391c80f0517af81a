//! `KvStore`: the consumed interface over the primary key-value table.
//!
//! The core never talks to DynamoDB (or any other backend) directly — every
//! component that needs conditional writes, point-gets, or the most-recent-N
//! query goes through this trait, built from descriptors assembled in
//! [`crate::params`]. [`memory::InMemoryKvStore`] backs the crate's own
//! tests; [`dynamo::DynamoDbKvStore`] is the production adapter.

pub mod dynamo;
pub mod memory;

use async_trait::async_trait;

use crate::item::Item;
use crate::params::{KvWriteOp, MostRecentQuery, PointGet};

/// One record surfaced by the ordered change feed (§4.6).
///
/// Represents the state of an item as of a single write; the Change
/// Propagator consumes these in commit order and converges the search index
/// to match.
#[derive(Debug, Clone)]
pub struct ChangeRecord {
    pub item: Item,
}

/// The consumed interface over the primary key-value table (§6).
///
/// All conditional logic lives in [`crate::params::transition_is_legal`];
/// implementations evaluate it but never derive their own conditions.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Point-get a single `(storage_id, vid)`.
    async fn get_item(&self, point: &PointGet) -> crate::error::StoreResult<Option<Item>>;

    /// Returns up to `query.limit` versions of a chain, ordered by `vid`
    /// descending (most recent first).
    async fn query_most_recent(
        &self,
        query: &MostRecentQuery,
    ) -> crate::error::StoreResult<Vec<Item>>;

    /// Applies every op in `ops` as a single all-or-nothing transaction.
    ///
    /// On success every `Insert`/`Transition`/`Delete` took effect; on
    /// failure none did. Callers (the Bundle Service's staging and commit
    /// phases, and the Data Service's single-op fast paths) treat a
    /// failure as "nothing happened" and decide how to react from there.
    async fn transact_write(&self, ops: Vec<KvWriteOp>) -> crate::error::StoreResult<()>;

    /// Drains up to `max` change-feed records appended since the last call.
    ///
    /// At-least-once delivery, commit order preserved within a single call.
    /// An empty result means the feed is caught up, not that it is closed.
    async fn poll_changes(&self, max: usize) -> crate::error::StoreResult<Vec<ChangeRecord>>;
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryKvStore;
    use super::*;
    use crate::item::{encode_for_insert, DocumentStatus};
    use crate::params::{insert_new_version, point_get, status_transition};
    use std::time::Duration;

    #[tokio::test]
    async fn insert_then_get_round_trips() {
        let store = InMemoryKvStore::new();
        let item = encode_for_insert(
            serde_json::json!({"name": "x"}),
            "p1",
            1,
            DocumentStatus::Available,
            "Patient",
            None,
        );
        store
            .transact_write(vec![insert_new_version(item.clone())])
            .await
            .unwrap();

        let fetched = store
            .get_item(&point_get(item.storage_id.clone(), 1))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fetched.resource_type, "Patient");
    }

    #[tokio::test]
    async fn duplicate_insert_is_rejected() {
        let store = InMemoryKvStore::new();
        let item = encode_for_insert(
            serde_json::json!({}),
            "p1",
            1,
            DocumentStatus::Available,
            "Patient",
            None,
        );
        store
            .transact_write(vec![insert_new_version(item.clone())])
            .await
            .unwrap();
        let result = store
            .transact_write(vec![insert_new_version(item.clone())])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn guarded_transition_rejects_wrong_status() {
        let store = InMemoryKvStore::new();
        let item = encode_for_insert(
            serde_json::json!({}),
            "p1",
            1,
            DocumentStatus::Available,
            "Patient",
            None,
        );
        store
            .transact_write(vec![insert_new_version(item.clone())])
            .await
            .unwrap();

        let result = store
            .transact_write(vec![status_transition(
                item.storage_id.clone(),
                1,
                "Patient",
                DocumentStatus::Pending,
                DocumentStatus::Locked,
                Duration::from_millis(35_000),
            )])
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn transaction_is_all_or_nothing() {
        let store = InMemoryKvStore::new();
        let existing = encode_for_insert(
            serde_json::json!({}),
            "p1",
            1,
            DocumentStatus::Available,
            "Patient",
            None,
        );
        store
            .transact_write(vec![insert_new_version(existing.clone())])
            .await
            .unwrap();

        let new_version = encode_for_insert(
            serde_json::json!({}),
            "p2",
            1,
            DocumentStatus::Pending,
            "Patient",
            None,
        );
        // Second op in the batch re-inserts an existing key and must fail,
        // which must roll back the first op too.
        let result = store
            .transact_write(vec![
                insert_new_version(new_version.clone()),
                insert_new_version(existing.clone()),
            ])
            .await;
        assert!(result.is_err());

        let should_not_exist = store
            .get_item(&point_get(new_version.storage_id.clone(), 1))
            .await
            .unwrap();
        assert!(should_not_exist.is_none());
    }

    #[tokio::test]
    async fn change_feed_surfaces_writes_in_order() {
        let store = InMemoryKvStore::new();
        for n in 1..=3u64 {
            let id = format!("p{n}");
            let item = encode_for_insert(
                serde_json::json!({}),
                &id,
                1,
                DocumentStatus::Available,
                "Patient",
                None,
            );
            store
                .transact_write(vec![insert_new_version(item)])
                .await
                .unwrap();
        }
        let changes = store.poll_changes(10).await.unwrap();
        assert_eq!(changes.len(), 3);
        assert_eq!(changes[0].item.storage_id, "p1");
        assert_eq!(changes[2].item.storage_id, "p3");

        let drained = store.poll_changes(10).await.unwrap();
        assert!(drained.is_empty());
    }
}
