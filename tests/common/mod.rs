//! Shared test infrastructure: builds a [`Store`] wired to the crate's own
//! in-memory KV/blob/search/export fakes, with the underlying handles kept
//! around so tests can inspect state the public `Store` API doesn't expose
//! directly (e.g. "the blob store contains exactly one object").

use std::sync::Arc;
use std::time::Duration;

use carestore::blob::memory::InMemoryBlobStore;
use carestore::blob::BlobStore;
use carestore::config::StoreConfig;
use carestore::export::memory::InMemoryExportStore;
use carestore::export::ExportStore;
use carestore::hybrid::OffloadRegistry;
use carestore::kv::memory::InMemoryKvStore;
use carestore::kv::KvStore;
use carestore::search::memory::InMemorySearchIndex;
use carestore::search::SearchIndex;
use carestore::tenant::TenancyMode;
use carestore::Store;

/// A fully wired [`Store`] plus the concrete in-memory backends it was built
/// from, for tests that need to peek past the public API.
pub struct TestEnv {
    pub store: Store,
    pub kv: Arc<InMemoryKvStore>,
    pub blob: Arc<InMemoryBlobStore>,
    pub search: Arc<InMemorySearchIndex>,
}

/// Builds a [`TestEnv`] with default (single-tenant) configuration and no
/// hybrid-offload registrations.
pub fn test_env() -> TestEnv {
    test_env_with(StoreConfig::default(), OffloadRegistry::new())
}

/// Builds a [`TestEnv`] for multi-tenant mode.
pub fn multi_tenant_env() -> TestEnv {
    let mut config = StoreConfig::default();
    config.tenancy_mode = TenancyMode::MultiTenant;
    test_env_with(config, OffloadRegistry::new())
}

/// Builds a [`TestEnv`] with `update_create_supported` enabled (update
/// against a missing id synthesizes a create).
pub fn update_create_env() -> TestEnv {
    let mut config = StoreConfig::default();
    config.update_create_supported = true;
    test_env_with(config, OffloadRegistry::new())
}

/// Builds a [`TestEnv`] with a near-zero lock duration so tests can exercise
/// the stale-lock reclaim path without sleeping for the real 35s default.
pub fn fast_lock_env() -> TestEnv {
    let mut config = StoreConfig::default();
    config.lock_duration = Duration::from_millis(1);
    test_env_with(config, OffloadRegistry::new())
}

/// Builds a [`TestEnv`] with a given hybrid-offload registry.
pub fn hybrid_env(registry: OffloadRegistry) -> TestEnv {
    test_env_with(StoreConfig::default(), registry)
}

fn test_env_with(config: StoreConfig, registry: OffloadRegistry) -> TestEnv {
    let kv = Arc::new(InMemoryKvStore::new());
    let blob = Arc::new(InMemoryBlobStore::new());
    let search = Arc::new(InMemorySearchIndex::new());
    let export_store: Arc<dyn ExportStore> = Arc::new(InMemoryExportStore::new());

    let store = Store::new(
        kv.clone() as Arc<dyn KvStore>,
        blob.clone() as Arc<dyn BlobStore>,
        search.clone() as Arc<dyn SearchIndex>,
        export_store,
        registry,
        config,
    );

    TestEnv { store, kv, blob, search }
}
