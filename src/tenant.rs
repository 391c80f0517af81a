//! Tenant identifiers and the multi-tenancy mode.
//!
//! The persistence core never decides *whether* multi-tenancy is enabled —
//! that is [`crate::config::StoreConfig::tenancy_mode`] — but it does
//! enforce, at every boundary, that a request's tenancy shape agrees with
//! the configured mode. See [`TenancyMode::check`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TenancyError;

/// An opaque tenant identifier.
///
/// Carried alongside every request; combined with a resource's `id` by the
/// Item Codec to build a `storageId` (see [`crate::item::build_storage_id`]).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a new tenant ID from the given string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl FromStr for TenantId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(TenantId::new(s))
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        TenantId::new(s)
    }
}

impl From<String> for TenantId {
    fn from(s: String) -> Self {
        TenantId::new(s)
    }
}

impl AsRef<str> for TenantId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Whether the store is running single-tenant or multi-tenant.
///
/// Determines how `storageId` is built (plain `id` vs. `id || tenantId`)
/// and is the sole source of truth checked by [`TenancyMode::check`] at
/// every external boundary (Data Service, Bundle Service, Hybrid Store).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TenancyMode {
    /// `storageId = id`; callers must never supply a tenantId.
    SingleTenant,
    /// `storageId = id || tenantId`; callers must always supply a tenantId.
    MultiTenant,
}

impl TenancyMode {
    /// Checks that a request's tenantId presence agrees with this mode.
    ///
    /// # Errors
    ///
    /// Returns [`TenancyError::TenantIdRequired`] if multi-tenant mode is
    /// active but no tenantId was supplied, or
    /// [`TenancyError::TenantIdForbidden`] if single-tenant mode is active
    /// but one was.
    pub fn check(&self, tenant_id: Option<&TenantId>) -> Result<(), TenancyError> {
        match (self, tenant_id) {
            (TenancyMode::MultiTenant, None) => Err(TenancyError::TenantIdRequired),
            (TenancyMode::SingleTenant, Some(tenant_id)) => {
                Err(TenancyError::TenantIdForbidden {
                    tenant_id: tenant_id.as_str().to_string(),
                })
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenant_id_roundtrips_through_serde() {
        let tenant = TenantId::new("acme");
        let json = serde_json::to_string(&tenant).unwrap();
        assert_eq!(json, "\"acme\"");
        let parsed: TenantId = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tenant);
    }

    #[test]
    fn multi_tenant_requires_tenant_id() {
        assert!(TenancyMode::MultiTenant.check(None).is_err());
        assert!(TenancyMode::MultiTenant
            .check(Some(&TenantId::new("acme")))
            .is_ok());
    }

    #[test]
    fn single_tenant_forbids_tenant_id() {
        assert!(TenancyMode::SingleTenant.check(None).is_ok());
        assert!(TenancyMode::SingleTenant
            .check(Some(&TenantId::new("acme")))
            .is_err());
    }
}
