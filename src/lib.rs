//! # Jobsmith
//!
//! A durable job scheduling engine for Rust: an in-memory eligibility index
//! mirroring a persisted job store, with priority ordering, per-queue
//! single-flight execution, job dependencies, and retry backoff.
//!
//! ## Features
//!
//! - **Eligibility index**: an ordered in-memory view answering "what can run
//!   right now?" under priority, queue, dependency, and backoff constraints
//! - **Per-queue single-flight**: at most one job per queue key is ever
//!   visible to workers, giving FIFO, non-overlapping execution per logical
//!   resource
//! - **Job dependencies**: jobs stay ineligible until everything they depend
//!   on is gone; terminal failures cascade through transitive dependents
//! - **Migration lane**: a reserved queue that blocks all other scheduling
//!   while occupied, for work that must run alone
//! - **Retry backoff**: exponential (with jitter), linear, or fixed
//!   strategies, overridable per job type
//! - **Lifecycle hooks**: `on_added` at submission, `on_failure` compensation
//!   on every terminal failure path, including cancellation
//! - **Pluggable persistence**: durable records write through to a storage
//!   backend; memory-only jobs never touch it
//! - **Async/await**: built on Tokio; job bodies run outside any index lock
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use jobsmith::{
//!     AlwaysSatisfied, EligibilityIndex, JobContext, JobOutcome, JobParameters, JobRecord,
//!     JobScheduler, PendingJob, Result, RunnableJob, Worker, WorkerPool,
//!     storage::MemoryStorage,
//! };
//! use async_trait::async_trait;
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! struct EmailJob;
//!
//! #[async_trait]
//! impl RunnableJob for EmailJob {
//!     async fn run(&mut self, _ctx: &JobContext) -> Result<JobOutcome> {
//!         // Your job processing logic here
//!         Ok(JobOutcome::Success)
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let storage = Arc::new(MemoryStorage::new());
//!     let index = Arc::new(EligibilityIndex::new(storage));
//!     let scheduler = Arc::new(JobScheduler::new(index, Arc::new(AlwaysSatisfied)));
//!
//!     scheduler.register_factory(
//!         "EmailJob",
//!         Arc::new(|_record: &JobRecord| -> Result<Box<dyn RunnableJob>> {
//!             Ok(Box::new(EmailJob))
//!         }),
//!     );
//!
//!     // Load persisted jobs and clear stale running flags
//!     scheduler.init().await?;
//!
//!     // Enqueue a job
//!     let job = PendingJob::new(
//!         "EmailJob",
//!         JobParameters::new().with_queue("email"),
//!         json!({"to": "user@example.com"}),
//!     );
//!     scheduler.submit(job).await?;
//!
//!     // Start processing jobs
//!     let mut pool = WorkerPool::new();
//!     pool.add_worker(Worker::new(Arc::clone(&scheduler), "worker-0"));
//!     Ok(pool.start().await?)
//! }
//! ```
//!
//! ## Core Concepts
//!
//! ### Job records
//!
//! A [`JobRecord`] is a unit of schedulable work plus its metadata: factory
//! key, optional queue key, priority, attempt budget, lifespan, backoff
//! state, and an opaque payload. Records are persisted unless marked
//! memory-only.
//!
//! ### The eligibility index
//!
//! [`EligibilityIndex`] mirrors the durable store in memory and surfaces
//! runnable jobs in priority order (creation time breaking ties). Every
//! mutation is one coarse critical section with the durable write-through
//! inside it, so storage never lags behind a half-applied update.
//!
//! ### The scheduler and workers
//!
//! [`JobScheduler`] enforces instance limits at submission, checks
//! constraints at dispatch, executes jobs, and folds every outcome back into
//! the index. [`Worker`]s poll it; job bodies run on worker tasks, outside
//! any lock, and observe cancellation cooperatively.

pub mod backoff;
pub mod chain;
pub mod config;
pub mod constraint;
pub mod error;
pub mod graph;
pub mod index;
pub mod job;
pub mod priority;
pub mod runnable;
pub mod scheduler;
pub mod storage;
pub mod worker;

pub use backoff::{BackoffStrategy, JitterType};
pub use chain::JobChain;
pub use config::SchedulerConfig;
pub use constraint::{AlwaysSatisfied, ConstraintEvaluator, InMemoryConstraintEvaluator};
pub use error::JobsmithError;
pub use graph::DependencyGraph;
pub use index::EligibilityIndex;
pub use job::{
    ConstraintRecord, DependencyRecord, JobId, JobRecord, JobSubmission, MIGRATION_QUEUE_KEY,
};
pub use priority::{JobPriority, PriorityError};
pub use runnable::{JobContext, JobFactory, JobOutcome, RunnableJob};
pub use scheduler::{JobParameters, JobScheduler, PendingJob};
pub use storage::{JobStorage, MemoryStorage};
pub use worker::{Worker, WorkerPool};

/// Convenient type alias for Results with [`JobsmithError`] as the error type.
///
/// This is used throughout the crate for consistent error handling.
pub type Result<T> = std::result::Result<T, JobsmithError>;
