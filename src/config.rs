//! Environment-derived configuration for the persistence core.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `ENABLE_MULTI_TENANCY` | `false` | Whether `tenantId` is required (`true`) or forbidden (`false`) on every request. |
//! | `UPDATE_CREATE_SUPPORTED` | `false` | Whether `updateResource` against a missing id synthesizes a create. |
//! | `LOCK_DURATION_MS` | `35000` | Stale-lock reclaim threshold used by the guarded status-transition condition. |
//! | `MAX_CONCURRENT_EXPORT_PER_USER` | `1` | Per-requester cap on jobs in `{in-progress, canceling}`. |
//! | `MAX_SYSTEM_CONCURRENT_EXPORT` | `2` | System-wide cap on jobs in `{in-progress, canceling}`. |
//! | `BLOB_KEY_SEPARATOR` | `_` | The `<SEP>` character in blob keys `[tenantId/]resourceType/id<SEP>uuid.json`. |
//!
//! Unset or unparseable values fall back to the documented default, mirroring
//! the `std::env::var(...).ok().and_then(|s| s.parse().ok()).unwrap_or(default)`
//! pattern used throughout this codebase's configuration layer.

use std::time::Duration;

/// Runtime configuration for a [`crate::store::Store`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Single-tenant or multi-tenant mode.
    pub tenancy_mode: crate::tenant::TenancyMode,

    /// Whether an update against a missing id synthesizes a create.
    pub update_create_supported: bool,

    /// Stale-lock reclaim threshold.
    pub lock_duration: Duration,

    /// Per-requester export admission cap.
    pub max_concurrent_export_per_user: u32,

    /// System-wide export admission cap.
    pub max_system_concurrent_export: u32,

    /// Separator character used when composing blob keys.
    pub blob_key_separator: char,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            tenancy_mode: crate::tenant::TenancyMode::SingleTenant,
            update_create_supported: false,
            lock_duration: Duration::from_millis(35_000),
            max_concurrent_export_per_user: 1,
            max_system_concurrent_export: 2,
            blob_key_separator: '_',
        }
    }
}

impl StoreConfig {
    /// Builds configuration from environment variables, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let multi_tenancy = std::env::var("ENABLE_MULTI_TENANCY")
            .ok()
            .and_then(|s| s.parse::<bool>().ok())
            .unwrap_or(false);

        Self {
            tenancy_mode: if multi_tenancy {
                crate::tenant::TenancyMode::MultiTenant
            } else {
                crate::tenant::TenancyMode::SingleTenant
            },
            update_create_supported: std::env::var("UPDATE_CREATE_SUPPORTED")
                .ok()
                .and_then(|s| s.parse::<bool>().ok())
                .unwrap_or(defaults.update_create_supported),
            lock_duration: std::env::var("LOCK_DURATION_MS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.lock_duration),
            max_concurrent_export_per_user: std::env::var("MAX_CONCURRENT_EXPORT_PER_USER")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(defaults.max_concurrent_export_per_user),
            max_system_concurrent_export: std::env::var("MAX_SYSTEM_CONCURRENT_EXPORT")
                .ok()
                .and_then(|s| s.parse::<u32>().ok())
                .unwrap_or(defaults.max_system_concurrent_export),
            blob_key_separator: std::env::var("BLOB_KEY_SEPARATOR")
                .ok()
                .and_then(|s| s.chars().next())
                .unwrap_or(defaults.blob_key_separator),
        }
    }
}
