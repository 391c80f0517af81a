//! In-memory [`SearchIndex`] used by this crate's own tests.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::{SearchError, StoreResult};

use super::{IndexMapping, SearchIndex, SearchOp};

#[derive(Default)]
struct State {
    /// Physical index name -> (mapping, documents by id).
    indices: HashMap<String, (IndexMapping, HashMap<String, Value>)>,
    /// Alias name -> set of physical index names it points at.
    aliases: HashMap<String, HashSet<String>>,
}

/// An in-memory search index, modeling exactly the alias-indirection the
/// real engine provides: documents live under a physical index, and bulk
/// operations target an alias which may (briefly, during reindex) resolve
/// to more than one physical index.
#[derive(Default)]
pub struct InMemorySearchIndex {
    state: RwLock<State>,
}

impl InMemorySearchIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolves `name` as an alias first (taking its first target, if any),
    /// falling back to treating it as a physical index name directly — test
    /// convenience so callers can pass either an alias or an index name.
    fn resolve<'a>(state: &'a State, name: &'a str) -> Option<&'a str> {
        if let Some(targets) = state.aliases.get(name) {
            return targets.iter().next().map(String::as_str);
        }
        state.indices.contains_key(name).then_some(name)
    }

    /// Returns the document stored for `id` in the index `name` resolves to
    /// (alias or physical index name), if present — test convenience for
    /// asserting search-index convergence (P5).
    pub fn get(&self, name: &str, id: &str) -> Option<Value> {
        let state = self.state.read();
        let index = Self::resolve(&state, name)?;
        state.indices.get(index).and_then(|(_, docs)| docs.get(id).cloned())
    }

    /// Number of documents currently indexed under `name` (alias or
    /// physical index name).
    pub fn len(&self, name: &str) -> usize {
        let state = self.state.read();
        let Some(index) = Self::resolve(&state, name) else {
            return 0;
        };
        state.indices.get(index).map(|(_, docs)| docs.len()).unwrap_or(0)
    }
}

#[async_trait]
impl SearchIndex for InMemorySearchIndex {
    async fn alias_exists(&self, alias: &str) -> StoreResult<bool> {
        Ok(self.state.read().aliases.contains_key(alias))
    }

    async fn index_exists(&self, index: &str) -> StoreResult<bool> {
        Ok(self.state.read().indices.contains_key(index))
    }

    async fn create_index(&self, index: &str, mapping: &IndexMapping) -> StoreResult<()> {
        let mut state = self.state.write();
        if state.indices.contains_key(index) {
            return Err(SearchError::Backend {
                message: format!("index '{index}' already exists"),
            }
            .into());
        }
        state
            .indices
            .insert(index.to_string(), (mapping.clone(), HashMap::new()));
        Ok(())
    }

    async fn create_alias(&self, alias: &str, index: &str) -> StoreResult<()> {
        self.state
            .write()
            .aliases
            .entry(alias.to_string())
            .or_default()
            .insert(index.to_string());
        Ok(())
    }

    async fn remove_alias(&self, alias: &str, index: &str) -> StoreResult<()> {
        if let Some(targets) = self.state.write().aliases.get_mut(alias) {
            targets.remove(index);
        }
        Ok(())
    }

    async fn bulk(&self, alias: &str, ops: Vec<SearchOp>) -> StoreResult<()> {
        let mut state = self.state.write();
        let targets: Vec<String> = state
            .aliases
            .get(alias)
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .collect();

        if targets.is_empty() {
            return Err(SearchError::Backend {
                message: format!("alias '{alias}' resolves to no index"),
            }
            .into());
        }

        let mut failed = 0usize;
        for target in &targets {
            let Some((_, docs)) = state.indices.get_mut(target) else {
                failed += ops.len();
                continue;
            };
            for op in &ops {
                match op {
                    SearchOp::Upsert { id, document } => {
                        docs.insert(id.clone(), document.clone());
                    }
                    SearchOp::Delete { id } => {
                        docs.remove(id);
                    }
                }
            }
        }

        if failed > 0 {
            return Err(SearchError::BulkFailed {
                total: ops.len() * targets.len(),
                failed,
                message: "one or more target indices were missing".to_string(),
            }
            .into());
        }
        Ok(())
    }
}
