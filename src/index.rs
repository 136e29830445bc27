//! The in-memory eligibility index.
//!
//! The index mirrors the durable store and answers "what can run right now?"
//! under priority, per-queue single-flight, dependency, and backoff
//! constraints. It owns three structures: an ordered eligible set (priority
//! descending, creation time ascending, id as a final tiebreak), a queue
//! representative map enforcing single-flight per queue key, and an exclusive
//! migration lane that blocks all other scheduling while occupied.
//!
//! Every public operation takes the single index lock for its whole duration,
//! including the durable write-through. One lock around the whole index is a
//! deliberate simplicity-over-throughput tradeoff: job churn is modest, and
//! partial-update races between the ordered set, the representative map, and
//! the dependency graph are not worth the bookkeeping.

use crate::{
    JobsmithError, Result,
    graph::DependencyGraph,
    job::{ConstraintRecord, DependencyRecord, JobId, JobRecord, JobSubmission},
    priority::JobPriority,
    storage::JobStorage,
};
use chrono::{DateTime, Utc};
use std::{
    cmp::Ordering,
    collections::{BTreeSet, HashMap},
    sync::Arc,
    time::Duration,
};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Composite ordering key for the eligible set.
#[derive(Debug, Clone, PartialEq, Eq)]
struct EligibleKey {
    priority: JobPriority,
    create_time: DateTime<Utc>,
    id: JobId,
}

impl EligibleKey {
    fn of(job: &JobRecord) -> Self {
        Self {
            priority: job.priority,
            create_time: job.create_time,
            id: job.id,
        }
    }
}

impl Ord for EligibleKey {
    // Priority descending, then creation time ascending. The id tiebreak is
    // mandatory: the set treats comparator-equal keys as the same element,
    // and distinct jobs may share both priority and creation time.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| self.create_time.cmp(&other.create_time))
            .then_with(|| self.id.cmp(&other.id))
    }
}

impl PartialOrd for EligibleKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn is_more_eligible(candidate: &JobRecord, incumbent: &JobRecord) -> bool {
    candidate.priority > incumbent.priority
        || (candidate.priority == incumbent.priority
            && candidate.create_time < incumbent.create_time)
}

#[derive(Debug, Default)]
struct IndexState {
    /// Every job the index knows about, keyed by id.
    jobs: HashMap<JobId, JobRecord>,
    /// Jobs currently exposed to the scheduler, in eligibility order.
    eligible: BTreeSet<EligibleKey>,
    /// Migration jobs, FIFO by creation time.
    migration_lane: BTreeSet<(DateTime<Utc>, JobId)>,
    /// The most eligible job recorded per queue key. Entries are not cleaned
    /// up on deletion; placement resolves them through `jobs` and treats a
    /// dangling entry as an empty slot.
    queue_representatives: HashMap<String, JobId>,
    constraints_by_job: HashMap<JobId, Vec<ConstraintRecord>>,
    graph: DependencyGraph,
}

impl IndexState {
    fn add_job(&mut self, job: JobRecord) {
        if job.in_migration_queue() {
            self.migration_lane.insert((job.create_time, job.id));
        } else {
            self.place_in_eligible(&job);
        }
        self.jobs.insert(job.id, job);
    }

    /// Queue single-flight placement. A job without a queue key goes straight
    /// into the eligible set. A queued job is compared against the queue's
    /// recorded representative: the winner is exposed, the loser is withheld
    /// (recorded in `jobs` but absent from the eligible set).
    fn place_in_eligible(&mut self, job: &JobRecord) {
        let Some(queue_key) = job.queue_key.clone() else {
            self.eligible.insert(EligibleKey::of(job));
            return;
        };

        let incumbent = self
            .queue_representatives
            .get(&queue_key)
            .and_then(|id| self.jobs.get(id))
            .cloned();

        match incumbent {
            Some(current) if !is_more_eligible(job, &current) => {
                debug!(job_id = %job.id, queue_key = %queue_key, "Job withheld behind queue representative");
            }
            Some(current) => {
                self.eligible.remove(&EligibleKey::of(&current));
                self.eligible.insert(EligibleKey::of(job));
                self.queue_representatives.insert(queue_key, job.id);
            }
            None => {
                self.eligible.insert(EligibleKey::of(job));
                self.queue_representatives.insert(queue_key, job.id);
            }
        }
    }

    fn remove_job(&mut self, job_id: JobId) {
        let Some(job) = self.jobs.remove(&job_id) else {
            return;
        };
        self.eligible.remove(&EligibleKey::of(&job));
        self.migration_lane.remove(&(job.create_time, job.id));
        self.constraints_by_job.remove(&job_id);
        self.graph.remove_job(job_id);
    }

    fn replace_job(&mut self, updated: JobRecord) {
        let Some(old) = self.jobs.get(&updated.id).cloned() else {
            debug!(job_id = %updated.id, "Ignoring update for unknown job");
            return;
        };

        if self.eligible.remove(&EligibleKey::of(&old)) {
            self.eligible.insert(EligibleKey::of(&updated));
        }
        if self.migration_lane.remove(&(old.create_time, old.id)) {
            self.migration_lane.insert((updated.create_time, updated.id));
        }
        self.jobs.insert(updated.id, updated);
    }

    fn pending_jobs(&self, now: DateTime<Utc>) -> Vec<JobRecord> {
        // The migration lane is strict and exclusive: while it holds any job,
        // either its head is dispatchable or nothing is.
        if let Some((_, migration_id)) = self.migration_lane.iter().next().copied() {
            let Some(migration_job) = self.jobs.get(&migration_id) else {
                return Vec::new();
            };
            return if !migration_job.is_running && migration_job.has_eligible_run_time(now) {
                vec![migration_job.clone()]
            } else {
                Vec::new()
            };
        }

        self.eligible
            .iter()
            .filter_map(|key| self.jobs.get(&key.id))
            .filter(|job| !self.graph.has_unresolved_dependencies(job.id))
            .filter(|job| !job.is_running)
            .filter(|job| job.has_eligible_run_time(now))
            .cloned()
            .collect()
    }
}

/// The shared in-memory index mirroring the durable store.
///
/// All mutating operations write through to storage (for durable records)
/// inside the same critical section as the in-memory change.
pub struct EligibilityIndex {
    storage: Arc<dyn JobStorage>,
    state: Mutex<IndexState>,
}

impl EligibilityIndex {
    pub fn new(storage: Arc<dyn JobStorage>) -> Self {
        Self {
            storage,
            state: Mutex::new(IndexState::default()),
        }
    }

    /// Load everything from storage and build the in-memory structures.
    ///
    /// All running flags are cleared first, durably and in memory: "currently
    /// running" is meaningless once the process that was running it has died.
    /// Dependency records matching the unresolvable-cycle rule are discarded
    /// from the in-memory graph only; storage keeps them.
    pub async fn init(&self) -> Result<()> {
        let mut guard = self.state.lock().await;

        self.storage.update_all_jobs_to_be_pending().await?;
        let jobs = self.storage.get_all_jobs().await?;
        let constraints = self.storage.get_all_constraints().await?;
        let dependencies = self.storage.get_all_dependencies().await?;

        let state = &mut *guard;
        *state = IndexState::default();

        for mut job in jobs {
            job.is_running = false;
            state.add_job(job);
        }
        for constraint in constraints {
            state
                .constraints_by_job
                .entry(constraint.job_id)
                .or_default()
                .push(constraint);
        }
        state.graph = DependencyGraph::load(dependencies, &state.jobs);

        info!(
            job_count = state.jobs.len(),
            migration_count = state.migration_lane.len(),
            "Eligibility index initialized"
        );
        Ok(())
    }

    /// Insert one or more jobs with their constraint and dependency records
    /// as a single atomic unit. Durable submissions are written through
    /// first; memory-only submissions never reach storage.
    pub async fn insert_jobs(&self, submissions: Vec<JobSubmission>) -> Result<()> {
        let mut guard = self.state.lock().await;

        let durable: Vec<JobSubmission> = submissions
            .iter()
            .filter(|submission| !submission.job.is_memory_only)
            .cloned()
            .collect();
        if !durable.is_empty() {
            self.storage.insert_jobs(&durable).await?;
        }

        let state = &mut *guard;
        for submission in submissions {
            debug!(job_id = %submission.job.id, factory_key = %submission.job.factory_key, "Inserting job");
            for constraint in submission.constraints {
                state
                    .constraints_by_job
                    .entry(constraint.job_id)
                    .or_default()
                    .push(constraint);
            }
            for dependency in submission.dependencies {
                state.graph.insert(dependency);
            }
            state.add_job(submission.job);
        }
        Ok(())
    }

    /// The ordered list of jobs that can be dispatched at `now`.
    ///
    /// If the migration lane holds any job, the result is either exactly its
    /// head (when dispatchable) or nothing at all. Otherwise the result is
    /// the eligible set filtered down to jobs with no unresolved dependency,
    /// not currently running, and past their backoff.
    pub async fn get_pending_jobs_with_no_dependencies_in_created_order(
        &self,
        now: DateTime<Utc>,
    ) -> Vec<JobRecord> {
        let guard = self.state.lock().await;
        guard.pending_jobs(now)
    }

    /// Flag a job as dispatched. One atomic call: mark-running is never a
    /// read-then-write at the call site.
    pub async fn mark_job_as_running(&self, job_id: JobId, now: DateTime<Utc>) -> Result<()> {
        let mut guard = self.state.lock().await;

        let is_memory_only = guard
            .jobs
            .get(&job_id)
            .map(|job| job.is_memory_only)
            .ok_or_else(|| JobsmithError::JobNotFound {
                id: job_id.to_string(),
            })?;
        if !is_memory_only {
            self.storage.mark_job_as_running(job_id, now).await?;
        }

        if let Some(job) = guard.jobs.get_mut(&job_id) {
            job.is_running = true;
            job.last_run_attempt_time = now;
        }
        Ok(())
    }

    /// Apply a transient failure: clear the running flag, record the new
    /// attempt count, backoff, and payload.
    pub async fn update_job_after_retry(
        &self,
        job_id: JobId,
        now: DateTime<Utc>,
        run_attempt: u32,
        next_backoff_interval: Duration,
        payload: serde_json::Value,
    ) -> Result<()> {
        let mut guard = self.state.lock().await;

        let is_memory_only = guard
            .jobs
            .get(&job_id)
            .map(|job| job.is_memory_only)
            .ok_or_else(|| JobsmithError::JobNotFound {
                id: job_id.to_string(),
            })?;
        if !is_memory_only {
            self.storage
                .update_job_after_retry(
                    job_id,
                    now,
                    run_attempt,
                    next_backoff_interval,
                    payload.clone(),
                )
                .await?;
        }

        if let Some(job) = guard.jobs.get_mut(&job_id) {
            job.is_running = false;
            job.run_attempt = run_attempt;
            job.next_backoff_interval = next_backoff_interval;
            job.last_run_attempt_time = now;
            job.payload = payload;
        }
        Ok(())
    }

    /// Bulk field update. Unknown ids are ignored.
    pub async fn update_jobs(&self, records: Vec<JobRecord>) -> Result<()> {
        let mut guard = self.state.lock().await;

        let durable: Vec<JobRecord> = records
            .iter()
            .filter(|record| !record.is_memory_only)
            .cloned()
            .collect();
        if !durable.is_empty() {
            self.storage.update_jobs(&durable).await?;
        }

        for record in records {
            guard.replace_job(record);
        }
        Ok(())
    }

    /// Delete jobs, stripping their constraint records and any dependency
    /// record referencing them as source or target.
    pub async fn delete_jobs(&self, job_ids: &[JobId]) -> Result<()> {
        let mut guard = self.state.lock().await;

        let durable_ids: Vec<JobId> = job_ids
            .iter()
            .filter(|id| {
                guard
                    .jobs
                    .get(id)
                    .is_some_and(|job| !job.is_memory_only)
            })
            .copied()
            .collect();
        if !durable_ids.is_empty() {
            self.storage.delete_jobs(&durable_ids).await?;
        }

        for job_id in job_ids {
            debug!(job_id = %job_id, "Deleting job");
            guard.remove_job(*job_id);
        }
        Ok(())
    }

    pub async fn get_job(&self, job_id: JobId) -> Option<JobRecord> {
        let guard = self.state.lock().await;
        guard.jobs.get(&job_id).cloned()
    }

    /// All jobs recorded for a queue (exposed or withheld), FIFO by creation
    /// time.
    pub async fn get_jobs_in_queue(&self, queue_key: &str) -> Vec<JobRecord> {
        let guard = self.state.lock().await;
        let mut jobs: Vec<JobRecord> = guard
            .jobs
            .values()
            .filter(|job| job.queue_key.as_deref() == Some(queue_key))
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.create_time.cmp(&b.create_time).then(a.id.cmp(&b.id)));
        jobs
    }

    /// Count of jobs (pending or running) for a factory key. Supports
    /// max-instance enforcement by calling code.
    pub async fn get_job_count_for_factory(&self, factory_key: &str) -> usize {
        let guard = self.state.lock().await;
        guard
            .jobs
            .values()
            .filter(|job| job.factory_key == factory_key)
            .count()
    }

    /// Count of jobs for a (factory key, queue key) pair.
    pub async fn get_job_count_for_factory_and_queue(
        &self,
        factory_key: &str,
        queue_key: &str,
    ) -> usize {
        let guard = self.state.lock().await;
        guard
            .jobs
            .values()
            .filter(|job| {
                job.factory_key == factory_key && job.queue_key.as_deref() == Some(queue_key)
            })
            .count()
    }

    /// Whether no job remains in any of the given queues.
    pub async fn are_queues_empty(&self, queue_keys: &[&str]) -> bool {
        let guard = self.state.lock().await;
        !guard.jobs.values().any(|job| {
            job.queue_key
                .as_deref()
                .is_some_and(|queue| queue_keys.contains(&queue))
        })
    }

    /// Constraint records attached to a job.
    pub async fn get_constraints_for_job(&self, job_id: JobId) -> Vec<ConstraintRecord> {
        let guard = self.state.lock().await;
        guard
            .constraints_by_job
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The full transitive set of dependency records downstream of a job.
    pub async fn get_dependency_records_that_depend_on_job(
        &self,
        job_id: JobId,
    ) -> Vec<DependencyRecord> {
        let guard = self.state.lock().await;
        guard.graph.records_that_depend_on(job_id)
    }

    /// Direct dependency records blocking a job. Mostly useful in tests.
    pub async fn get_dependencies_of_job(&self, job_id: JobId) -> Vec<DependencyRecord> {
        let guard = self.state.lock().await;
        guard.graph.dependencies_of(job_id)
    }
}
