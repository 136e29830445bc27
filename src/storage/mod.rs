//! Durable persistence boundary for job records.
//!
//! The eligibility index treats storage as a write-through collaborator: it
//! loads everything once at startup and mirrors every durable mutation
//! synchronously, so a crash leaves storage consistent with "not yet run" or
//! "not yet updated", never "updated but not persisted". Memory-only records
//! never cross this boundary.

use crate::{
    Result,
    job::{ConstraintRecord, DependencyRecord, JobId, JobRecord, JobSubmission},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

pub mod memory;

pub use memory::MemoryStorage;

/// Operations a durable backend must provide.
///
/// Implementations only ever see durable records: the index filters
/// memory-only jobs out of every call, and calls with nothing durable to
/// write are skipped entirely.
#[async_trait]
pub trait JobStorage: Send + Sync {
    /// All persisted job records, for the startup load.
    async fn get_all_jobs(&self) -> Result<Vec<JobRecord>>;

    /// All persisted constraint records, for the startup load.
    async fn get_all_constraints(&self) -> Result<Vec<ConstraintRecord>>;

    /// All persisted dependency records, for the startup load.
    async fn get_all_dependencies(&self) -> Result<Vec<DependencyRecord>>;

    /// Persist jobs with their constraint and dependency records as one
    /// atomic unit.
    async fn insert_jobs(&self, submissions: &[JobSubmission]) -> Result<()>;

    /// Replace the stored record for each job.
    async fn update_jobs(&self, records: &[JobRecord]) -> Result<()>;

    /// Delete jobs along with their constraint records and any dependency
    /// record referencing them as source or target.
    async fn delete_jobs(&self, job_ids: &[JobId]) -> Result<()>;

    /// Flag a job as running with the given dispatch time.
    async fn mark_job_as_running(&self, job_id: JobId, now: DateTime<Utc>) -> Result<()>;

    /// Apply a transient-failure update: clear the running flag, bump the
    /// attempt count, and store the new backoff and payload.
    async fn update_job_after_retry(
        &self,
        job_id: JobId,
        now: DateTime<Utc>,
        run_attempt: u32,
        next_backoff_interval: Duration,
        payload: serde_json::Value,
    ) -> Result<()>;

    /// Clear every running flag. Called once at startup: "running" has no
    /// meaning across a process restart.
    async fn update_all_jobs_to_be_pending(&self) -> Result<()>;
}
