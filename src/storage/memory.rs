//! In-memory implementation of the storage boundary.
//!
//! `MemoryStorage` implements [`JobStorage`] entirely in memory, making it the
//! backend of choice for tests and for deployments that can afford to lose
//! queued work on restart. Mutation counters let tests assert exactly which
//! operations crossed the boundary (e.g. that memory-only jobs never did).
//!
//! # Examples
//!
//! ```rust
//! use jobsmith::storage::{JobStorage, MemoryStorage};
//! use jobsmith::{JobRecord, JobSubmission};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> jobsmith::Result<()> {
//! let storage = MemoryStorage::new();
//!
//! let submission = JobSubmission::new(JobRecord::new("TestJob", json!({"n": 1})));
//! storage.insert_jobs(std::slice::from_ref(&submission)).await?;
//!
//! assert_eq!(storage.get_all_jobs().await?.len(), 1);
//! assert_eq!(storage.insert_count(), 1);
//! # Ok(())
//! # }
//! ```

use crate::{
    JobsmithError, Result,
    job::{ConstraintRecord, DependencyRecord, JobId, JobRecord, JobSubmission},
    storage::JobStorage,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::{
    collections::HashMap,
    sync::atomic::{AtomicUsize, Ordering},
    time::Duration,
};
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct MemoryTables {
    jobs: HashMap<JobId, JobRecord>,
    constraints: Vec<ConstraintRecord>,
    dependencies: Vec<DependencyRecord>,
}

/// In-memory storage backend with operation counters.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<MemoryTables>,
    insert_count: AtomicUsize,
    update_count: AtomicUsize,
    delete_count: AtomicUsize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `insert_jobs` calls that reached this backend.
    pub fn insert_count(&self) -> usize {
        self.insert_count.load(Ordering::SeqCst)
    }

    /// Number of mutating update calls (`update_jobs`, `mark_job_as_running`,
    /// `update_job_after_retry`) that reached this backend.
    pub fn update_count(&self) -> usize {
        self.update_count.load(Ordering::SeqCst)
    }

    /// Number of `delete_jobs` calls that reached this backend.
    pub fn delete_count(&self) -> usize {
        self.delete_count.load(Ordering::SeqCst)
    }

    /// Total mutating calls that reached this backend.
    pub fn mutation_count(&self) -> usize {
        self.insert_count() + self.update_count() + self.delete_count()
    }
}

#[async_trait]
impl JobStorage for MemoryStorage {
    async fn get_all_jobs(&self) -> Result<Vec<JobRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.jobs.values().cloned().collect())
    }

    async fn get_all_constraints(&self) -> Result<Vec<ConstraintRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.constraints.clone())
    }

    async fn get_all_dependencies(&self) -> Result<Vec<DependencyRecord>> {
        let tables = self.tables.read().await;
        Ok(tables.dependencies.clone())
    }

    async fn insert_jobs(&self, submissions: &[JobSubmission]) -> Result<()> {
        self.insert_count.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.tables.write().await;
        for submission in submissions {
            tables
                .jobs
                .insert(submission.job.id, submission.job.clone());
            tables.constraints.extend(submission.constraints.clone());
            tables.dependencies.extend(submission.dependencies.clone());
        }
        Ok(())
    }

    async fn update_jobs(&self, records: &[JobRecord]) -> Result<()> {
        self.update_count.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.tables.write().await;
        for record in records {
            tables.jobs.insert(record.id, record.clone());
        }
        Ok(())
    }

    async fn delete_jobs(&self, job_ids: &[JobId]) -> Result<()> {
        self.delete_count.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.tables.write().await;
        for job_id in job_ids {
            tables.jobs.remove(job_id);
        }
        tables
            .constraints
            .retain(|constraint| !job_ids.contains(&constraint.job_id));
        tables.dependencies.retain(|dependency| {
            !job_ids.contains(&dependency.job_id)
                && !job_ids.contains(&dependency.depends_on_job_id)
        });
        Ok(())
    }

    async fn mark_job_as_running(&self, job_id: JobId, now: DateTime<Utc>) -> Result<()> {
        self.update_count.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.tables.write().await;
        let job = tables
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| JobsmithError::JobNotFound {
                id: job_id.to_string(),
            })?;
        job.is_running = true;
        job.last_run_attempt_time = now;
        Ok(())
    }

    async fn update_job_after_retry(
        &self,
        job_id: JobId,
        now: DateTime<Utc>,
        run_attempt: u32,
        next_backoff_interval: Duration,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.update_count.fetch_add(1, Ordering::SeqCst);

        let mut tables = self.tables.write().await;
        let job = tables
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| JobsmithError::JobNotFound {
                id: job_id.to_string(),
            })?;
        job.is_running = false;
        job.run_attempt = run_attempt;
        job.next_backoff_interval = next_backoff_interval;
        job.last_run_attempt_time = now;
        job.payload = payload;
        Ok(())
    }

    async fn update_all_jobs_to_be_pending(&self) -> Result<()> {
        let mut tables = self.tables.write().await;
        for job in tables.jobs.values_mut() {
            job.is_running = false;
        }
        Ok(())
    }
}
