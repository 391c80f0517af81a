//! In-memory [`KvStore`] used by this crate's own tests.
//!
//! Implements the same conditional semantics a real conditional-transaction
//! KV engine would: every op in a `transact_write` batch is validated
//! against the current state before any of them are applied, so the whole
//! batch is genuinely all-or-nothing — the acquire-lock-then-verify pattern
//! generalized to a multi-item transaction.

use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use crate::error::{KvError, StoreResult};
use crate::item::Item;
use crate::params::{transition_is_legal, KvWriteOp, MostRecentQuery, PointGet};

use super::{ChangeRecord, KvStore};

#[derive(Default)]
struct State {
    /// `(storage_id, vid)` -> item.
    items: BTreeMap<(String, u64), Item>,
    /// Append-only change feed, drained by [`KvStore::poll_changes`].
    feed: VecDeque<ChangeRecord>,
}

/// An in-memory KV store backed by a [`Mutex`]-guarded ordered map.
#[derive(Default)]
pub struct InMemoryKvStore {
    state: Mutex<State>,
}

impl InMemoryKvStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every version currently stored for `storage_id`, descending
    /// on `vid` — test convenience beyond what [`KvStore`] exposes.
    pub fn chain(&self, storage_id: &str) -> Vec<Item> {
        let state = self.state.lock();
        let mut items: Vec<Item> = state
            .items
            .iter()
            .filter(|((sid, _), _)| sid == storage_id)
            .map(|(_, item)| item.clone())
            .collect();
        items.sort_by(|a, b| b.vid.cmp(&a.vid));
        items
    }
}

fn apply_op(state: &mut State, op: &KvWriteOp, now: chrono::DateTime<Utc>) -> Result<(), KvError> {
    match op {
        KvWriteOp::Insert {
            item,
            allow_overwrite,
        } => {
            let key = (item.storage_id.clone(), item.vid);
            if !allow_overwrite && state.items.contains_key(&key) {
                return Err(KvError::ConditionalCheckFailed {
                    table: "primary".to_string(),
                    key: format!("{}#{}", key.0, key.1),
                });
            }
            state.items.insert(key, item.clone());
            Ok(())
        }
        KvWriteOp::Transition {
            storage_id,
            vid,
            resource_type,
            from,
            to,
            lock_duration,
        } => {
            let key = (storage_id.clone(), *vid);
            let current = state.items.get(&key);
            if !transition_is_legal(current, resource_type, *from, *lock_duration, now) {
                return Err(KvError::ConditionalCheckFailed {
                    table: "primary".to_string(),
                    key: format!("{}#{}", key.0, key.1),
                });
            }
            let item = state.items.get_mut(&key).expect("checked above");
            item.document_status = *to;
            item.lock_end_ts = now;
            Ok(())
        }
        KvWriteOp::Delete { storage_id, vid } => {
            state.items.remove(&(storage_id.clone(), *vid));
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn get_item(&self, point: &PointGet) -> StoreResult<Option<Item>> {
        let state = self.state.lock();
        Ok(state
            .items
            .get(&(point.storage_id.clone(), point.vid))
            .cloned())
    }

    async fn query_most_recent(&self, query: &MostRecentQuery) -> StoreResult<Vec<Item>> {
        let mut items = self.chain(&query.storage_id);
        items.truncate(query.limit as usize);
        Ok(items)
    }

    async fn transact_write(&self, ops: Vec<KvWriteOp>) -> StoreResult<()> {
        let now = Utc::now();
        let mut state = self.state.lock();

        // Validate the whole batch against a scratch copy before mutating
        // the real state, so a failure partway through never leaves a
        // partial write visible — the all-or-nothing guarantee §4.4 and
        // §6 require from the underlying engine's bounded transactions.
        let mut scratch = State {
            items: state.items.clone(),
            feed: VecDeque::new(),
        };
        for op in &ops {
            apply_op(&mut scratch, op, now)?;
        }

        let mut changes = Vec::with_capacity(ops.len());
        for op in &ops {
            apply_op(&mut state, op, now)?;
            if let KvWriteOp::Insert { item, .. } = op {
                changes.push(ChangeRecord { item: item.clone() });
            } else if let KvWriteOp::Transition {
                storage_id, vid, ..
            } = op
            {
                if let Some(item) = state.items.get(&(storage_id.clone(), *vid)) {
                    changes.push(ChangeRecord { item: item.clone() });
                }
            }
        }
        state.feed.extend(changes);
        Ok(())
    }

    async fn poll_changes(&self, max: usize) -> StoreResult<Vec<ChangeRecord>> {
        let mut state = self.state.lock();
        let take = max.min(state.feed.len());
        Ok(state.feed.drain(..take).collect())
    }
}
