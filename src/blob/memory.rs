//! In-memory [`BlobStore`] used by this crate's own tests.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StoreResult;

use super::{BlobStore, BulkObject};

/// An in-memory blob store backed by a [`RwLock`]-guarded map.
#[derive(Default)]
pub struct InMemoryBlobStore {
    objects: RwLock<HashMap<String, BulkObject>>,
}

impl InMemoryBlobStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of objects currently stored — test convenience for asserting
    /// "the blob store contains exactly one object" (scenario 4).
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    /// `true` iff no objects are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn put(&self, key: &str, object: &BulkObject) -> StoreResult<()> {
        self.objects
            .write()
            .insert(key.to_string(), object.clone());
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<BulkObject>> {
        Ok(self.objects.read().get(key).cloned())
    }

    async fn delete(&self, key: &str) -> StoreResult<()> {
        self.objects.write().remove(key);
        Ok(())
    }
}
