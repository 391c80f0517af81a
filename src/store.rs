//! Top-level [`Store`]: wires the KV/blob/search clients and configuration
//! into the Data Service, Bundle Service, Hybrid Store, Change Propagator,
//! and Export Registry, and exposes their operations as one public API
//! surface (§5: client handles constructed once and shared via `Arc` across
//! every component).

use std::sync::Arc;

use serde_json::Value;

use crate::bundle::{self, BatchRequest, BundleMode};
use crate::config::StoreConfig;
use crate::data_service::{self, WriteOutcome};
use crate::error::StoreResult;
use crate::export::{ExportRegistry, ExportRequest, ExportStatusResponse, ExportStore};
use crate::hybrid::{HybridStore, OffloadRegistry};
use crate::kv::KvStore;
use crate::propagator::ChangePropagator;
use crate::search::SearchIndex;
use crate::tenant::TenantId;
use crate::version_store;

/// The assembled persistence core. Construct once per process and share via
/// `Arc`/clone of the handles it wraps — every method is `&self`.
pub struct Store {
    kv: Arc<dyn KvStore>,
    config: StoreConfig,
    hybrid: HybridStore,
    propagator: ChangePropagator,
    export_registry: ExportRegistry,
}

impl Store {
    pub fn new(
        kv: Arc<dyn KvStore>,
        blob: Arc<dyn crate::blob::BlobStore>,
        search: Arc<dyn SearchIndex>,
        export_store: Arc<dyn ExportStore>,
        offload_registry: OffloadRegistry,
        config: StoreConfig,
    ) -> Self {
        let hybrid = HybridStore::new(
            kv.clone(),
            blob,
            offload_registry,
            config.lock_duration,
            config.tenancy_mode,
            config.blob_key_separator,
        );
        let propagator = ChangePropagator::new(
            kv.clone(),
            search,
            config.tenancy_mode == crate::tenant::TenancyMode::MultiTenant,
        );
        let export_registry = ExportRegistry::new(
            export_store,
            config.max_concurrent_export_per_user,
            config.max_system_concurrent_export,
        );

        Self {
            kv,
            config,
            hybrid,
            propagator,
            export_registry,
        }
    }

    /// Creates a resource, routing through the Hybrid Store when
    /// `resource_type` has registered offload fields.
    pub async fn create_resource(
        &self,
        resource_type: &str,
        id: Option<&str>,
        resource: Value,
        tenant_id: Option<&TenantId>,
    ) -> StoreResult<WriteOutcome> {
        self.config.tenancy_mode.check(tenant_id)?;
        if self.hybrid.is_registered(resource_type) {
            self.hybrid.create(resource_type, id, resource, tenant_id).await
        } else {
            data_service::create_resource(&self.kv, resource_type, id, resource, tenant_id).await
        }
    }

    /// Updates (or update-as-creates) a resource, routing through the
    /// Hybrid Store when `resource_type` has registered offload fields.
    pub async fn update_resource(
        &self,
        resource_type: &str,
        id: &str,
        resource: Value,
        tenant_id: Option<&TenantId>,
    ) -> StoreResult<WriteOutcome> {
        self.config.tenancy_mode.check(tenant_id)?;
        if self.hybrid.is_registered(resource_type) {
            self.hybrid
                .update(
                    resource_type,
                    id,
                    self.config.update_create_supported,
                    self.config.lock_duration,
                    resource,
                    tenant_id,
                )
                .await
        } else {
            data_service::update_resource(
                &self.kv,
                self.config.lock_duration,
                self.config.update_create_supported,
                resource_type,
                id,
                resource,
                tenant_id,
            )
            .await
        }
    }

    /// Deletes a resource, cleaning up its offloaded blob first if
    /// registered for hybrid storage.
    pub async fn delete_resource(
        &self,
        resource_type: &str,
        id: &str,
        tenant_id: Option<&TenantId>,
    ) -> StoreResult<()> {
        self.config.tenancy_mode.check(tenant_id)?;
        if self.hybrid.is_registered(resource_type) {
            let storage_id = crate::item::build_storage_id(id, tenant_id);
            let current = version_store::read_most_recent(&self.kv, resource_type, &storage_id).await?;
            self.hybrid
                .delete(resource_type, id, tenant_id, current.bulk_data_link.as_deref())
                .await
        } else {
            data_service::delete_resource(&self.kv, self.config.lock_duration, resource_type, id, tenant_id).await
        }
    }

    /// Reads the most recent visible version, composing it through the
    /// Hybrid Store when a `bulkDataLink` is present.
    pub async fn read_most_recent(
        &self,
        resource_type: &str,
        id: &str,
        tenant_id: Option<&TenantId>,
    ) -> StoreResult<Value> {
        self.config.tenancy_mode.check(tenant_id)?;
        let storage_id = crate::item::build_storage_id(id, tenant_id);
        let item = version_store::read_most_recent(&self.kv, resource_type, &storage_id).await?;
        let stub = crate::item::decode_for_read(&item, false);
        self.hybrid.compose(resource_type, id, stub).await
    }

    /// Reads a specific version.
    pub async fn read_version(
        &self,
        resource_type: &str,
        id: &str,
        vid: u64,
        tenant_id: Option<&TenantId>,
    ) -> StoreResult<Value> {
        self.config.tenancy_mode.check(tenant_id)?;
        let storage_id = crate::item::build_storage_id(id, tenant_id);
        let item = version_store::read_version(&self.kv, resource_type, id, &storage_id, vid).await?;
        let stub = crate::item::decode_for_read(&item, false);
        self.hybrid.compose(resource_type, id, stub).await
    }

    /// Runs a multi-resource bundle as an atomic transaction or a
    /// best-effort batch.
    pub async fn run_bundle(
        &self,
        entries: Vec<BatchRequest>,
        mode: BundleMode,
    ) -> StoreResult<Vec<bundle::BatchResponse>> {
        bundle::run_bundle(&self.kv, self.config.lock_duration, entries, mode).await
    }

    /// Drains and applies up to `max` pending change-feed records to the
    /// search index.
    pub async fn propagate_changes(&self, max: usize) -> StoreResult<usize> {
        self.propagator.propagate_once(max).await
    }

    /// Starts a new bulk-export job, subject to admission control.
    pub async fn initiate_export(&self, request: ExportRequest) -> StoreResult<String> {
        self.export_registry.initiate_export(request).await
    }

    /// Requests cancellation of an in-flight export job.
    pub async fn cancel_export(&self, job_id: &str) -> StoreResult<()> {
        self.export_registry.cancel_export(job_id).await
    }

    /// Fetches the normalized status of an export job.
    pub async fn export_status(&self, job_id: &str) -> StoreResult<ExportStatusResponse> {
        self.export_registry.get_export_status(job_id).await
    }
}
