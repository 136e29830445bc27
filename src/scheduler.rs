//! Job submission and dispatch.
//!
//! The scheduler sits between callers and the eligibility index: it enforces
//! max-instance limits at submission, evaluates constraints at dispatch,
//! executes runnable jobs outside any lock, and normalizes every result to a
//! [`JobOutcome`] before applying it back to the index. Workers drive it by
//! calling [`JobScheduler::run_next`] in a loop.

use crate::{
    JobsmithError, Result,
    constraint::ConstraintEvaluator,
    index::EligibilityIndex,
    job::{JobId, JobRecord, JobSubmission},
    priority::JobPriority,
    runnable::{JobContext, JobFactory, JobOutcome, RunnableJob},
};
use chrono::{DateTime, Utc};
use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, RwLock,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use tracing::{debug, error, warn};

/// Declarative scheduling metadata for a job type, consumed at submission.
///
/// Instance limits apply only at submission time and are not persisted.
#[derive(Debug, Clone, Default)]
pub struct JobParameters {
    pub queue_key: Option<String>,
    pub constraint_keys: Vec<String>,
    /// `None` means unlimited attempts. Defaults to a small finite budget.
    pub max_attempts: Option<u32>,
    /// `None` means immortal.
    pub lifespan: Option<Duration>,
    pub priority: JobPriority,
    pub max_instances_for_factory: Option<usize>,
    pub max_instances_for_queue: Option<usize>,
    pub memory_only: bool,
}

impl JobParameters {
    pub fn new() -> Self {
        Self {
            max_attempts: Some(3),
            ..Default::default()
        }
    }

    pub fn with_queue(mut self, queue_key: impl Into<String>) -> Self {
        self.queue_key = Some(queue_key.into());
        self
    }

    pub fn with_constraint(mut self, constraint_key: impl Into<String>) -> Self {
        self.constraint_keys.push(constraint_key.into());
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts);
        self
    }

    pub fn with_unlimited_attempts(mut self) -> Self {
        self.max_attempts = None;
        self
    }

    pub fn with_lifespan(mut self, lifespan: Duration) -> Self {
        self.lifespan = Some(lifespan);
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_max_instances_for_factory(mut self, limit: usize) -> Self {
        self.max_instances_for_factory = Some(limit);
        self
    }

    pub fn with_max_instances_for_queue(mut self, limit: usize) -> Self {
        self.max_instances_for_queue = Some(limit);
        self
    }

    pub fn as_memory_only(mut self) -> Self {
        self.memory_only = true;
        self
    }
}

/// A job ready for submission: factory key, parameters, opaque payload.
///
/// The id is generated at construction so callers can declare dependency
/// edges between jobs submitted together in one batch.
#[derive(Debug, Clone)]
pub struct PendingJob {
    id: JobId,
    factory_key: String,
    parameters: JobParameters,
    payload: serde_json::Value,
    depends_on: Vec<JobId>,
}

impl PendingJob {
    pub fn new(
        factory_key: impl Into<String>,
        parameters: JobParameters,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: JobId::new_v4(),
            factory_key: factory_key.into(),
            parameters,
            payload,
            depends_on: Vec::new(),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn factory_key(&self) -> &str {
        &self.factory_key
    }

    pub fn parameters(&self) -> &JobParameters {
        &self.parameters
    }

    pub fn parameters_mut(&mut self) -> &mut JobParameters {
        &mut self.parameters
    }

    pub fn depends_on(mut self, job_id: JobId) -> Self {
        self.depends_on.push(job_id);
        self
    }

    fn into_submission(self, create_time: DateTime<Utc>) -> JobSubmission {
        let mut record = JobRecord::new(self.factory_key, self.payload)
            .with_priority(self.parameters.priority)
            .with_create_time(create_time);
        record.id = self.id;
        record.queue_key = self.parameters.queue_key;
        record.max_attempts = self.parameters.max_attempts;
        record.lifespan = self.parameters.lifespan;
        record.is_memory_only = self.parameters.memory_only;

        let mut submission = JobSubmission::new(record);
        for constraint_key in self.parameters.constraint_keys {
            submission = submission.with_constraint(constraint_key);
        }
        for depends_on_job_id in self.depends_on {
            submission = submission.with_dependency(depends_on_job_id);
        }
        submission
    }
}

/// Orchestrates submission, dispatch, and outcome application.
pub struct JobScheduler {
    index: Arc<EligibilityIndex>,
    evaluator: Arc<dyn ConstraintEvaluator>,
    factories: RwLock<HashMap<String, Arc<dyn JobFactory>>>,
    cancellations: Mutex<HashMap<JobId, Arc<AtomicBool>>>,
    chain_tails: Mutex<HashMap<JobId, VecDeque<PendingJob>>>,
}

impl JobScheduler {
    pub fn new(index: Arc<EligibilityIndex>, evaluator: Arc<dyn ConstraintEvaluator>) -> Self {
        Self {
            index,
            evaluator,
            factories: RwLock::new(HashMap::new()),
            cancellations: Mutex::new(HashMap::new()),
            chain_tails: Mutex::new(HashMap::new()),
        }
    }

    /// Load the index from storage. Call once before starting workers.
    pub async fn init(&self) -> Result<()> {
        self.index.init().await
    }

    pub fn index(&self) -> &Arc<EligibilityIndex> {
        &self.index
    }

    /// Register the factory that rebuilds runnables for a factory key.
    pub fn register_factory(
        &self,
        factory_key: impl Into<String>,
        factory: Arc<dyn JobFactory>,
    ) {
        let mut factories = self.factories.write().unwrap_or_else(|e| e.into_inner());
        factories.insert(factory_key.into(), factory);
    }

    fn create_runnable(&self, record: &JobRecord) -> Result<Box<dyn RunnableJob>> {
        let factory = {
            let factories = self.factories.read().unwrap_or_else(|e| e.into_inner());
            factories.get(&record.factory_key).cloned()
        };
        match factory {
            Some(factory) => factory.create(record),
            None => Err(JobsmithError::UnknownFactory {
                factory_key: record.factory_key.clone(),
            }),
        }
    }

    /// Submit one job. Returns `Ok(None)` when the job was discarded because
    /// a max-instance limit is already met; otherwise the job is inserted
    /// atomically and its `on_added` hook fires before this returns.
    pub async fn submit(&self, job: PendingJob) -> Result<Option<JobId>> {
        if let Some(limit) = job.parameters.max_instances_for_factory {
            let count = self.index.get_job_count_for_factory(&job.factory_key).await;
            if count >= limit {
                debug!(factory_key = %job.factory_key, limit, "Discarding job: factory instance limit met");
                return Ok(None);
            }
        }
        if let (Some(limit), Some(queue_key)) = (
            job.parameters.max_instances_for_queue,
            job.parameters.queue_key.as_deref(),
        ) {
            let count = self
                .index
                .get_job_count_for_factory_and_queue(&job.factory_key, queue_key)
                .await;
            if count >= limit {
                debug!(factory_key = %job.factory_key, queue_key, limit, "Discarding job: queue instance limit met");
                return Ok(None);
            }
        }

        let submission = job.into_submission(Utc::now());
        let record = submission.job.clone();
        let mut runnable = self.create_runnable(&record)?;

        self.index.insert_jobs(vec![submission]).await?;
        runnable.on_added();

        Ok(Some(record.id))
    }

    /// Submit many jobs, with any dependency edges declared among them, as a
    /// single atomic insert. Instance limits are not applied here: a partial
    /// discard would orphan intra-batch dependency edges.
    pub async fn submit_batch(&self, jobs: Vec<PendingJob>) -> Result<Vec<JobId>> {
        let create_time = Utc::now();
        let submissions: Vec<JobSubmission> = jobs
            .into_iter()
            .map(|job| job.into_submission(create_time))
            .collect();

        let mut runnables = Vec::with_capacity(submissions.len());
        for submission in &submissions {
            runnables.push(self.create_runnable(&submission.job)?);
        }
        let job_ids: Vec<JobId> = submissions.iter().map(|s| s.job.id).collect();

        self.index.insert_jobs(submissions).await?;
        for runnable in &mut runnables {
            runnable.on_added();
        }

        Ok(job_ids)
    }

    pub(crate) fn store_chain_tail(&self, job_id: JobId, tail: VecDeque<PendingJob>) {
        if tail.is_empty() {
            return;
        }
        let mut chain_tails = self.chain_tails.lock().unwrap_or_else(|e| e.into_inner());
        chain_tails.insert(job_id, tail);
    }

    fn take_chain_tail(&self, job_id: JobId) -> Option<VecDeque<PendingJob>> {
        let mut chain_tails = self.chain_tails.lock().unwrap_or_else(|e| e.into_inner());
        chain_tails.remove(&job_id)
    }

    /// Request cancellation. A pending job is failed immediately (its
    /// `on_failure` hook runs with `cancelled = true` and the record is
    /// deleted). A running job only has its cooperative flag set; the body is
    /// expected to observe it and return a failure outcome.
    pub async fn cancel(&self, job_id: JobId) -> Result<()> {
        {
            let cancellations = self.cancellations.lock().unwrap_or_else(|e| e.into_inner());
            if let Some(flag) = cancellations.get(&job_id) {
                flag.store(true, Ordering::SeqCst);
                debug!(job_id = %job_id, "Cancellation flag set for running job");
                return Ok(());
            }
        }

        if let Some(record) = self.index.get_job(job_id).await {
            self.fail_terminally(&record, None, true).await?;
        }
        Ok(())
    }

    /// Whether no job remains in any of the given queues.
    pub async fn are_queues_empty(&self, queue_keys: &[&str]) -> bool {
        self.index.are_queues_empty(queue_keys).await
    }

    pub async fn get_job_count_for_factory(&self, factory_key: &str) -> usize {
        self.index.get_job_count_for_factory(factory_key).await
    }

    pub async fn get_job_count_for_factory_and_queue(
        &self,
        factory_key: &str,
        queue_key: &str,
    ) -> usize {
        self.index
            .get_job_count_for_factory_and_queue(factory_key, queue_key)
            .await
    }

    /// Dispatch and execute at most one eligible job. Returns whether any
    /// work was done; callers sleep on `false`.
    ///
    /// `now` stamps both the dispatch and the applied outcome, which keeps
    /// backoff bookkeeping deterministic under test clocks.
    pub async fn run_next(&self, now: DateTime<Utc>) -> Result<bool> {
        let pending = self
            .index
            .get_pending_jobs_with_no_dependencies_in_created_order(now)
            .await;

        let mut candidate = None;
        for job in pending {
            let constraints = self.index.get_constraints_for_job(job.id).await;
            let satisfied = constraints
                .iter()
                .all(|constraint| self.evaluator.is_satisfied(&constraint.constraint_key));
            if satisfied {
                candidate = Some(job);
                break;
            }
        }
        let Some(record) = candidate else {
            return Ok(false);
        };

        if record.is_expired(now) {
            warn!(job_id = %record.id, factory_key = %record.factory_key, "Job exceeded its lifespan; failing");
            self.fail_terminally(&record, None, false).await?;
            return Ok(true);
        }

        let mut runnable = match self.create_runnable(&record) {
            Ok(runnable) => runnable,
            Err(create_error) => {
                error!(job_id = %record.id, error = %create_error, "Could not rebuild job; failing");
                self.fail_terminally(&record, None, false).await?;
                return Ok(true);
            }
        };

        // The flag must be registered before the job is observably running, so
        // a concurrent cancel always finds it instead of deleting the record
        // out from under the body.
        let flag = Arc::new(AtomicBool::new(false));
        {
            let mut cancellations = self.cancellations.lock().unwrap_or_else(|e| e.into_inner());
            cancellations.insert(record.id, Arc::clone(&flag));
        }

        if let Err(mark_error) = self.index.mark_job_as_running(record.id, now).await {
            let mut cancellations = self.cancellations.lock().unwrap_or_else(|e| e.into_inner());
            cancellations.remove(&record.id);
            return Err(mark_error);
        }

        let ctx = JobContext::new(record.id, Arc::clone(&flag));

        debug!(job_id = %record.id, factory_key = %record.factory_key, attempt = record.run_attempt, "Running job");
        let run_result = runnable.run(&ctx).await;

        {
            let mut cancellations = self.cancellations.lock().unwrap_or_else(|e| e.into_inner());
            cancellations.remove(&record.id);
        }
        let cancelled = flag.load(Ordering::SeqCst);

        let outcome = match run_result {
            Ok(outcome) => outcome,
            Err(run_error) => {
                if runnable.is_retryable_error(&run_error) {
                    JobOutcome::Retry {
                        error: run_error.to_string(),
                    }
                } else {
                    JobOutcome::Failure {
                        error: run_error.to_string(),
                    }
                }
            }
        };

        self.apply_outcome(record, runnable, outcome, cancelled, now)
            .await?;
        Ok(true)
    }

    async fn apply_outcome(
        &self,
        record: JobRecord,
        mut runnable: Box<dyn RunnableJob>,
        outcome: JobOutcome,
        cancelled: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        match outcome {
            JobOutcome::Success => {
                debug!(job_id = %record.id, factory_key = %record.factory_key, "Job succeeded");
                self.index.delete_jobs(&[record.id]).await?;
                self.continue_chain(record.id).await?;
            }
            JobOutcome::Retry { error: run_error } => {
                let next_attempt = record.run_attempt + 1;
                let exhausted = record
                    .max_attempts
                    .is_some_and(|max| next_attempt >= max);

                if exhausted || record.is_expired(now) {
                    warn!(
                        job_id = %record.id,
                        factory_key = %record.factory_key,
                        attempt = next_attempt,
                        error = %run_error,
                        "Job out of retry budget; failing"
                    );
                    self.fail_terminally(&record, Some(&mut runnable), cancelled)
                        .await?;
                } else {
                    let backoff = runnable.backoff_strategy().delay_for_attempt(next_attempt);
                    warn!(
                        job_id = %record.id,
                        factory_key = %record.factory_key,
                        attempt = next_attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %run_error,
                        "Job will retry"
                    );
                    self.index
                        .update_job_after_retry(
                            record.id,
                            now,
                            next_attempt,
                            backoff,
                            record.payload.clone(),
                        )
                        .await?;
                }
            }
            JobOutcome::Failure { error: run_error } => {
                error!(job_id = %record.id, factory_key = %record.factory_key, error = %run_error, "Job failed");
                self.fail_terminally(&record, Some(&mut runnable), cancelled)
                    .await?;
            }
            JobOutcome::FatalFailure { error: run_error } => {
                error!(
                    job_id = %record.id,
                    factory_key = %record.factory_key,
                    error = %run_error,
                    "Job failed fatally; skipping remaining retry budget"
                );
                self.fail_terminally(&record, Some(&mut runnable), cancelled)
                    .await?;
            }
        }
        Ok(())
    }

    /// The terminal failure path: run the compensating hook, cascade through
    /// transitive dependents (their hooks run as plain failures), drop any
    /// chain tail, delete everything.
    async fn fail_terminally(
        &self,
        record: &JobRecord,
        runnable: Option<&mut Box<dyn RunnableJob>>,
        cancelled: bool,
    ) -> Result<()> {
        match runnable {
            Some(runnable) => runnable.on_failure(cancelled),
            None => {
                if let Ok(mut rebuilt) = self.create_runnable(record) {
                    rebuilt.on_failure(cancelled);
                }
            }
        }

        let mut doomed: Vec<JobId> = vec![record.id];
        let dependents = self
            .index
            .get_dependency_records_that_depend_on_job(record.id)
            .await;
        for dependent in dependents {
            let Some(dependent_job) = self.index.get_job(dependent.job_id).await else {
                continue;
            };
            debug!(job_id = %dependent_job.id, failed_dependency = %record.id, "Failing dependent job");
            if let Ok(mut dependent_runnable) = self.create_runnable(&dependent_job) {
                dependent_runnable.on_failure(false);
            }
            doomed.push(dependent_job.id);
        }

        self.take_chain_tail(record.id);
        self.index.delete_jobs(&doomed).await?;
        Ok(())
    }

    async fn continue_chain(&self, completed_job_id: JobId) -> Result<()> {
        let Some(mut tail) = self.take_chain_tail(completed_job_id) else {
            return Ok(());
        };
        let Some(next_job) = tail.pop_front() else {
            return Ok(());
        };

        debug!(completed_job_id = %completed_job_id, next_job_id = %next_job.id, "Enqueuing next chain stage");
        if let Some(submitted_id) = self.submit(next_job).await? {
            self.store_chain_tail(submitted_id, tail);
        }
        Ok(())
    }
}
