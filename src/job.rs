use crate::priority::JobPriority;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

pub type JobId = Uuid;

/// Reserved queue key for migration jobs. While any job with this queue key
/// exists, it forms an exclusive single lane that blocks all other scheduling.
pub const MIGRATION_QUEUE_KEY: &str = "__migration__";

/// A persisted unit of schedulable work plus its scheduling metadata.
///
/// The payload is opaque to the scheduler; the `factory_key` identifies which
/// registered [`JobFactory`](crate::runnable::JobFactory) can rebuild the
/// runnable job from it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub factory_key: String,
    /// Jobs sharing a queue key execute with mutual exclusion, FIFO by
    /// creation time.
    pub queue_key: Option<String>,
    pub create_time: DateTime<Utc>,
    pub priority: JobPriority,
    pub run_attempt: u32,
    /// `None` means unlimited attempts.
    pub max_attempts: Option<u32>,
    /// Time allowed since `create_time` before the job is expired. `None`
    /// means immortal.
    pub lifespan: Option<Duration>,
    pub next_backoff_interval: Duration,
    /// UNIX_EPOCH when the job has never been dispatched.
    pub last_run_attempt_time: DateTime<Utc>,
    pub is_running: bool,
    /// Memory-only records never cross the storage boundary and do not
    /// survive a restart.
    pub is_memory_only: bool,
    pub payload: serde_json::Value,
}

impl JobRecord {
    pub fn new(factory_key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            factory_key: factory_key.into(),
            queue_key: None,
            create_time: Utc::now(),
            priority: JobPriority::default(),
            run_attempt: 0,
            max_attempts: Some(3),
            lifespan: None,
            next_backoff_interval: Duration::ZERO,
            last_run_attempt_time: DateTime::<Utc>::UNIX_EPOCH,
            is_running: false,
            is_memory_only: false,
            payload,
        }
    }

    pub fn with_queue(mut self, queue_key: impl Into<String>) -> Self {
        self.queue_key = Some(queue_key.into());
        self
    }

    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
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

    pub fn with_create_time(mut self, create_time: DateTime<Utc>) -> Self {
        self.create_time = create_time;
        self
    }

    pub fn as_memory_only(mut self) -> Self {
        self.is_memory_only = true;
        self
    }

    /// Whether the job's backoff has elapsed at `now`.
    ///
    /// A last run attempt in the future counts as immediately eligible. This
    /// is deliberate leniency toward clock changes: a job stamped under a fast
    /// clock must not be frozen until the wall clock catches up.
    pub fn has_eligible_run_time(&self, now: DateTime<Utc>) -> bool {
        if self.last_run_attempt_time > now {
            return true;
        }

        let backoff = chrono::Duration::from_std(self.next_backoff_interval)
            .unwrap_or(chrono::Duration::MAX);
        match self.last_run_attempt_time.checked_add_signed(backoff) {
            Some(due) => due <= now,
            None => false,
        }
    }

    /// Whether the job has outlived its lifespan at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.lifespan {
            Some(lifespan) => {
                let lifespan =
                    chrono::Duration::from_std(lifespan).unwrap_or(chrono::Duration::MAX);
                match self.create_time.checked_add_signed(lifespan) {
                    Some(deadline) => deadline <= now,
                    None => false,
                }
            }
            None => false,
        }
    }

    /// Whether the attempt budget is spent. Always false for unlimited jobs.
    pub fn has_exhausted_attempts(&self) -> bool {
        match self.max_attempts {
            Some(max) => self.run_attempt >= max,
            None => false,
        }
    }

    pub fn in_migration_queue(&self) -> bool {
        self.queue_key.as_deref() == Some(MIGRATION_QUEUE_KEY)
    }
}

/// A named precondition attached to a job, evaluated externally by a
/// [`ConstraintEvaluator`](crate::constraint::ConstraintEvaluator).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ConstraintRecord {
    pub job_id: JobId,
    pub constraint_key: String,
}

impl ConstraintRecord {
    pub fn new(job_id: JobId, constraint_key: impl Into<String>) -> Self {
        Self {
            job_id,
            constraint_key: constraint_key.into(),
        }
    }
}

/// A blocking relation: `job_id` cannot run until `depends_on_job_id` is gone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DependencyRecord {
    pub job_id: JobId,
    pub depends_on_job_id: JobId,
}

impl DependencyRecord {
    pub fn new(job_id: JobId, depends_on_job_id: JobId) -> Self {
        Self {
            job_id,
            depends_on_job_id,
        }
    }
}

/// One job plus its constraint and dependency records: the atomic insert unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSubmission {
    pub job: JobRecord,
    pub constraints: Vec<ConstraintRecord>,
    pub dependencies: Vec<DependencyRecord>,
}

impl JobSubmission {
    pub fn new(job: JobRecord) -> Self {
        Self {
            job,
            constraints: Vec::new(),
            dependencies: Vec::new(),
        }
    }

    pub fn with_constraint(mut self, constraint_key: impl Into<String>) -> Self {
        let record = ConstraintRecord::new(self.job.id, constraint_key);
        self.constraints.push(record);
        self
    }

    pub fn with_dependency(mut self, depends_on_job_id: JobId) -> Self {
        let record = DependencyRecord::new(self.job.id, depends_on_job_id);
        self.dependencies.push(record);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_defaults() {
        let record = JobRecord::new("TestJob", json!({"key": "value"}));

        assert_eq!(record.factory_key, "TestJob");
        assert_eq!(record.queue_key, None);
        assert_eq!(record.run_attempt, 0);
        assert_eq!(record.max_attempts, Some(3));
        assert_eq!(record.lifespan, None);
        assert!(!record.is_running);
        assert!(!record.is_memory_only);
        assert_eq!(record.last_run_attempt_time, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_eligible_run_time_never_dispatched() {
        let record = JobRecord::new("TestJob", json!({}));
        assert!(record.has_eligible_run_time(Utc::now()));
    }

    #[test]
    fn test_eligible_run_time_respects_backoff() {
        let now = Utc::now();
        let mut record = JobRecord::new("TestJob", json!({}));
        record.last_run_attempt_time = now;
        record.next_backoff_interval = Duration::from_secs(30);

        assert!(!record.has_eligible_run_time(now + chrono::Duration::seconds(29)));
        assert!(record.has_eligible_run_time(now + chrono::Duration::seconds(30)));
    }

    #[test]
    fn test_eligible_run_time_future_attempt_is_lenient() {
        let now = Utc::now();
        let mut record = JobRecord::new("TestJob", json!({}));
        record.last_run_attempt_time = now + chrono::Duration::hours(1);
        record.next_backoff_interval = Duration::from_secs(600);

        assert!(record.has_eligible_run_time(now));
    }

    #[test]
    fn test_lifespan_expiry() {
        let now = Utc::now();
        let record = JobRecord::new("TestJob", json!({}))
            .with_create_time(now)
            .with_lifespan(Duration::from_secs(60));

        assert!(!record.is_expired(now + chrono::Duration::seconds(59)));
        assert!(record.is_expired(now + chrono::Duration::seconds(60)));

        let immortal = JobRecord::new("TestJob", json!({})).with_create_time(now);
        assert!(!immortal.is_expired(now + chrono::Duration::days(3650)));
    }

    #[test]
    fn test_attempt_exhaustion() {
        let mut record = JobRecord::new("TestJob", json!({})).with_max_attempts(2);
        assert!(!record.has_exhausted_attempts());

        record.run_attempt = 2;
        assert!(record.has_exhausted_attempts());

        let mut unlimited = JobRecord::new("TestJob", json!({})).with_unlimited_attempts();
        unlimited.run_attempt = 10_000;
        assert!(!unlimited.has_exhausted_attempts());
    }

    #[test]
    fn test_migration_queue_detection() {
        let migration = JobRecord::new("MigrationJob", json!({})).with_queue(MIGRATION_QUEUE_KEY);
        assert!(migration.in_migration_queue());

        let regular = JobRecord::new("TestJob", json!({})).with_queue("attachments");
        assert!(!regular.in_migration_queue());
    }

    #[test]
    fn test_submission_builder() {
        let record = JobRecord::new("TestJob", json!({}));
        let job_id = record.id;
        let other_id = Uuid::new_v4();

        let submission = JobSubmission::new(record)
            .with_constraint("network")
            .with_dependency(other_id);

        assert_eq!(submission.constraints.len(), 1);
        assert_eq!(submission.constraints[0].job_id, job_id);
        assert_eq!(submission.constraints[0].constraint_key, "network");
        assert_eq!(submission.dependencies.len(), 1);
        assert_eq!(submission.dependencies[0].depends_on_job_id, other_id);
    }

    #[test]
    fn test_record_serialization_round_trip() {
        let record = JobRecord::new("TestJob", json!({"path": "/tmp/upload"}))
            .with_queue("attachments")
            .with_priority(JobPriority::High)
            .with_lifespan(Duration::from_secs(86400));

        let serialized = serde_json::to_string(&record).unwrap();
        let deserialized: JobRecord = serde_json::from_str(&serialized).unwrap();

        assert_eq!(record, deserialized);
    }
}
