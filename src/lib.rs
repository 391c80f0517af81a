//! carestore: a versioned, multi-tenant persistence and change-propagation
//! core for structured medical resources.
//!
//! Combines optimistic-concurrency CRUD over a primary key-value table, a
//! two-phase-commit Bundle Service for atomic multi-resource writes, a
//! Hybrid Store that transparently offloads oversized fields to a blob
//! store, and a Change Propagator that mirrors every committed write into a
//! search index under alias-based, zero-downtime-reindexable index
//! management.
//!
//! # Architecture
//!
//! - [`item`] — translation between logical resources and stored items
//!   (the Item Codec).
//! - [`params`] — conditional-write, query, and transaction descriptors,
//!   and the single guarded-transition decision function every KV
//!   implementation must defer to (the Param Builder).
//! - [`tenant`] — tenant identifiers and the single- vs. multi-tenant mode.
//! - [`config`] — environment-derived runtime configuration.
//! - [`error`] — the crate's error hierarchy.
//! - [`kv`] — the consumed key-value store interface, an in-memory fake,
//!   and a DynamoDB-backed production adapter (feature `dynamodb`).
//! - [`blob`] — the consumed blob store interface, an in-memory fake, and
//!   an S3-backed production adapter (feature `s3`).
//! - [`search`] — the consumed search index interface, an in-memory fake,
//!   and an Elasticsearch-backed production adapter (feature
//!   `elasticsearch`).
//! - [`version_store`] — versioned read paths (point-get, most-recent,
//!   visibility policy).
//! - [`data_service`] — single-resource write paths (create/update/delete).
//! - [`bundle`] — the Bundle Service's two-phase commit and rollback.
//! - [`hybrid`] — the Hybrid Store's transparent field offload.
//! - [`propagator`] — the Change Propagator.
//! - [`export`] — the Export Registry's admission-controlled job
//!   bookkeeping.
//! - [`store`] — the top-level [`store::Store`] wiring every component
//!   together.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod blob;
pub mod bundle;
pub mod config;
pub mod data_service;
pub mod error;
pub mod export;
pub mod hybrid;
pub mod item;
pub mod kv;
pub mod params;
pub mod propagator;
pub mod search;
pub mod store;
pub mod tenant;
pub mod version_store;

pub use error::{StoreError, StoreResult};
pub use store::Store;
pub use tenant::{TenancyMode, TenantId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
