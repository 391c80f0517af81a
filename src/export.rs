//! Export Registry: admission-controlled bulk-export job bookkeeping (§4.7).
//!
//! The export table is modeled separately from the primary table's
//! [`crate::kv::KvStore`] — it keys on `jobId` alone and needs a global
//! secondary index on `jobStatus` rather than a versioned chain, so it gets
//! its own narrower [`ExportStore`] trait instead of overloading `KvStore`
//! with a query shape the rest of the core never needs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{ExportError, StoreResult};

/// Lifecycle of a bulk-export job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    InProgress,
    Canceling,
    Completed,
    Failed,
    Canceled,
}

impl JobStatus {
    /// `true` for the two statuses counted against admission caps.
    pub fn is_active(self) -> bool {
        matches!(self, JobStatus::InProgress | JobStatus::Canceling)
    }

    /// `true` for the three statuses `cancelExport` refuses to act on.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Canceled)
    }

    fn as_str(self) -> &'static str {
        match self {
            JobStatus::InProgress => "in-progress",
            JobStatus::Canceling => "canceling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single bulk-export job row.
#[derive(Debug, Clone)]
pub struct ExportJob {
    pub job_id: String,
    pub requester_id: String,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub exported_file_urls: Vec<String>,
    pub error_array: Vec<String>,
    pub error_message: String,
}

/// The public response shape for `getExportStatus`: the stored row with
/// absent collections normalized to empty (§4.7 "getExportStatus").
#[derive(Debug, Clone)]
pub struct ExportStatusResponse {
    pub job_id: String,
    pub status: JobStatus,
    pub exported_file_urls: Vec<String>,
    pub error_array: Vec<String>,
    pub error_message: String,
}

impl From<ExportJob> for ExportStatusResponse {
    fn from(job: ExportJob) -> Self {
        Self {
            job_id: job.job_id,
            status: job.status,
            exported_file_urls: job.exported_file_urls,
            error_array: job.error_array,
            error_message: job.error_message,
        }
    }
}

/// A thin projection used by listing operations — just enough to decide
/// admission and to render a summary.
#[derive(Debug, Clone)]
pub struct ExportJobSummary {
    pub job_id: String,
    pub requester_id: String,
    pub status: JobStatus,
}

/// The consumed interface over the export table (§6): keyed by `jobId`,
/// with a secondary index on `jobStatus` (modeled here as a direct
/// list-by-status query rather than the generic range query `KvStore`
/// exposes, since the Export Registry never needs a versioned chain).
#[async_trait]
pub trait ExportStore: Send + Sync {
    async fn get_job(&self, job_id: &str) -> StoreResult<Option<ExportJob>>;
    async fn put_job(&self, job: ExportJob) -> StoreResult<()>;
    async fn update_status(&self, job_id: &str, status: JobStatus) -> StoreResult<()>;
    async fn list_by_statuses(&self, statuses: &[JobStatus]) -> StoreResult<Vec<ExportJobSummary>>;
}

/// A request to start a new bulk-export job.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub requester_id: String,
}

/// Admission-controlled lifecycle operations over an [`ExportStore`] (§4.7).
pub struct ExportRegistry {
    store: Arc<dyn ExportStore>,
    max_concurrent_per_user: u32,
    max_system_concurrent: u32,
}

impl ExportRegistry {
    pub fn new(store: Arc<dyn ExportStore>, max_concurrent_per_user: u32, max_system_concurrent: u32) -> Self {
        Self {
            store,
            max_concurrent_per_user,
            max_system_concurrent,
        }
    }

    /// Admits and starts a new export job, or fails with
    /// `TooManyConcurrentExportRequests` if any admission cap is hit (§4.7
    /// steps 1-3).
    pub async fn initiate_export(&self, request: ExportRequest) -> StoreResult<String> {
        let in_progress = self.store.list_by_statuses(&[JobStatus::InProgress]).await?;
        if in_progress.iter().any(|job| job.requester_id == request.requester_id) {
            return Err(ExportError::TooManyConcurrentExportRequests {
                reason: format!("requester '{}' already has an in-progress export", request.requester_id),
            }
            .into());
        }

        let canceling = self.store.list_by_statuses(&[JobStatus::Canceling]).await?;
        if canceling.iter().any(|job| job.requester_id == request.requester_id) {
            return Err(ExportError::TooManyConcurrentExportRequests {
                reason: format!("requester '{}' already has a canceling export", request.requester_id),
            }
            .into());
        }

        let per_user_cap = self.max_concurrent_per_user as usize;
        if in_progress
            .iter()
            .chain(canceling.iter())
            .filter(|job| job.requester_id == request.requester_id)
            .count()
            >= per_user_cap
        {
            return Err(ExportError::TooManyConcurrentExportRequests {
                reason: format!("requester '{}' is at its concurrent export cap", request.requester_id),
            }
            .into());
        }

        let system_active = in_progress.len() + canceling.len();
        if system_active >= self.max_system_concurrent as usize {
            return Err(ExportError::TooManyConcurrentExportRequests {
                reason: "system-wide concurrent export cap reached".to_string(),
            }
            .into());
        }

        let job_id = Uuid::new_v4().to_string();
        self.store
            .put_job(ExportJob {
                job_id: job_id.clone(),
                requester_id: request.requester_id,
                status: JobStatus::InProgress,
                created_at: Utc::now(),
                exported_file_urls: Vec::new(),
                error_array: Vec::new(),
                error_message: String::new(),
            })
            .await?;

        Ok(job_id)
    }

    /// Transitions an active job to `canceling`; fails if the job is absent
    /// or already in a terminal state (§4.7 "cancelExport").
    pub async fn cancel_export(&self, job_id: &str) -> StoreResult<()> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| ExportError::NotFound {
                job_id: job_id.to_string(),
            })?;

        if job.status.is_terminal() {
            return Err(ExportError::NotCancellable {
                job_id: job_id.to_string(),
                status: job.status.to_string(),
            }
            .into());
        }

        self.store.update_status(job_id, JobStatus::Canceling).await
    }

    /// Returns the normalized status response for `job_id` (§4.7
    /// "getExportStatus").
    pub async fn get_export_status(&self, job_id: &str) -> StoreResult<ExportStatusResponse> {
        let job = self
            .store
            .get_job(job_id)
            .await?
            .ok_or_else(|| ExportError::NotFound {
                job_id: job_id.to_string(),
            })?;
        Ok(job.into())
    }

    /// Lists every job belonging to `requester_id` — SPEC_FULL §4.7
    /// supplement, a thin wrapper over the same secondary-index query
    /// admission already performs.
    pub async fn list_jobs_for_requester(&self, requester_id: &str) -> StoreResult<Vec<ExportJobSummary>> {
        let all = self
            .store
            .list_by_statuses(&[
                JobStatus::InProgress,
                JobStatus::Canceling,
                JobStatus::Completed,
                JobStatus::Failed,
                JobStatus::Canceled,
            ])
            .await?;
        Ok(all
            .into_iter()
            .filter(|job| job.requester_id == requester_id)
            .collect())
    }

    /// Lists every job currently in `{in-progress, canceling}` — SPEC_FULL
    /// §4.7 supplement.
    pub async fn list_active_jobs(&self) -> StoreResult<Vec<ExportJobSummary>> {
        self.store
            .list_by_statuses(&[JobStatus::InProgress, JobStatus::Canceling])
            .await
    }
}

/// In-memory [`ExportStore`] used by this crate's own tests.
pub mod memory {
    use super::*;
    use parking_lot::RwLock;
    use std::collections::HashMap;

    #[derive(Default)]
    pub struct InMemoryExportStore {
        jobs: RwLock<HashMap<String, ExportJob>>,
    }

    impl InMemoryExportStore {
        pub fn new() -> Self {
            Self::default()
        }
    }

    #[async_trait]
    impl ExportStore for InMemoryExportStore {
        async fn get_job(&self, job_id: &str) -> StoreResult<Option<ExportJob>> {
            Ok(self.jobs.read().get(job_id).cloned())
        }

        async fn put_job(&self, job: ExportJob) -> StoreResult<()> {
            self.jobs.write().insert(job.job_id.clone(), job);
            Ok(())
        }

        async fn update_status(&self, job_id: &str, status: JobStatus) -> StoreResult<()> {
            if let Some(job) = self.jobs.write().get_mut(job_id) {
                job.status = status;
            }
            Ok(())
        }

        async fn list_by_statuses(&self, statuses: &[JobStatus]) -> StoreResult<Vec<ExportJobSummary>> {
            Ok(self
                .jobs
                .read()
                .values()
                .filter(|job| statuses.contains(&job.status))
                .map(|job| ExportJobSummary {
                    job_id: job.job_id.clone(),
                    requester_id: job.requester_id.clone(),
                    status: job.status,
                })
                .collect())
        }
    }
}
