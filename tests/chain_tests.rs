//! Integration tests for job chains: staged enqueueing, halt on failure, and
//! chains serialized through a shared queue.

use async_trait::async_trait;
use chrono::Utc;
use jobsmith::{
    BackoffStrategy, EligibilityIndex, InMemoryConstraintEvaluator, JobChain, JobContext,
    JobFactory, JobOutcome, JobParameters, JobRecord, JobScheduler, PendingJob, Result,
    RunnableJob, storage::MemoryStorage,
};
use serde_json::json;
use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
    time::Duration,
};

#[derive(Clone, Default)]
struct EventLog(Arc<Mutex<Vec<String>>>);

impl EventLog {
    fn push(&self, event: impl Into<String>) {
        self.0.lock().unwrap().push(event.into());
    }

    fn events(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    fn run_events(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter(|e| e.ends_with(":run"))
            .collect()
    }

    fn position(&self, event: &str) -> Option<usize> {
        self.events().iter().position(|e| e == event)
    }
}

struct StageJob {
    label: String,
    log: EventLog,
    outcomes: Arc<Mutex<VecDeque<JobOutcome>>>,
}

#[async_trait]
impl RunnableJob for StageJob {
    fn on_added(&mut self) {
        self.log.push(format!("{}:added", self.label));
    }

    async fn run(&mut self, _ctx: &JobContext) -> Result<JobOutcome> {
        self.log.push(format!("{}:run", self.label));
        let next = self.outcomes.lock().unwrap().pop_front();
        Ok(next.unwrap_or(JobOutcome::Success))
    }

    fn on_failure(&mut self, cancelled: bool) {
        self.log
            .push(format!("{}:failure(cancelled={})", self.label, cancelled));
    }

    fn backoff_strategy(&self) -> BackoffStrategy {
        BackoffStrategy::Fixed(Duration::from_secs(10))
    }
}

fn stage_factory(label: &str, log: EventLog, outcomes: Vec<JobOutcome>) -> Arc<dyn JobFactory> {
    let label = label.to_string();
    let outcomes = Arc::new(Mutex::new(VecDeque::from(outcomes)));
    Arc::new(move |_record: &JobRecord| -> Result<Box<dyn RunnableJob>> {
        Ok(Box::new(StageJob {
            label: label.clone(),
            log: log.clone(),
            outcomes: Arc::clone(&outcomes),
        }))
    })
}

struct Harness {
    scheduler: Arc<JobScheduler>,
    log: EventLog,
}

async fn harness() -> Harness {
    let storage = Arc::new(MemoryStorage::new());
    let index = Arc::new(EligibilityIndex::new(storage));
    let scheduler = Arc::new(JobScheduler::new(
        index,
        Arc::new(InMemoryConstraintEvaluator::new()),
    ));
    scheduler.init().await.unwrap();

    Harness {
        scheduler,
        log: EventLog::default(),
    }
}

fn stage(factory_key: &str) -> PendingJob {
    PendingJob::new(factory_key, JobParameters::new(), json!({}))
}

#[tokio::test]
async fn test_chain_runs_stages_in_order_through_a_shared_queue() {
    let h = harness().await;
    h.scheduler
        .register_factory("A", stage_factory("A", h.log.clone(), vec![]));
    h.scheduler
        .register_factory("B", stage_factory("B", h.log.clone(), vec![]));
    h.scheduler
        .register_factory("C", stage_factory("C", h.log.clone(), vec![]));

    // The shared queue serializes the chain against anything else on it, and
    // each stage's insert must take over the queue slot its predecessor left.
    let chain = JobChain::new(stage("A"))
        .then(stage("B"))
        .then(stage("C"))
        .with_queue("attachment-7");
    let first_id = h.scheduler.enqueue_chain(chain).await.unwrap().unwrap();
    assert!(h.scheduler.index().get_job(first_id).await.is_some());

    assert!(h.scheduler.run_next(Utc::now()).await.unwrap());
    assert!(h.scheduler.run_next(Utc::now()).await.unwrap());
    assert!(h.scheduler.run_next(Utc::now()).await.unwrap());
    assert!(!h.scheduler.run_next(Utc::now()).await.unwrap());

    assert_eq!(h.log.run_events(), vec!["A:run", "B:run", "C:run"]);
    // Stage N+1 is only enqueued once stage N has succeeded.
    assert!(h.log.position("B:added").unwrap() > h.log.position("A:run").unwrap());
    assert!(h.log.position("C:added").unwrap() > h.log.position("B:run").unwrap());
    assert!(h.scheduler.are_queues_empty(&["attachment-7"]).await);
}

#[tokio::test]
async fn test_chain_halts_on_terminal_failure() {
    let h = harness().await;
    h.scheduler
        .register_factory("A", stage_factory("A", h.log.clone(), vec![]));
    h.scheduler.register_factory(
        "B",
        stage_factory(
            "B",
            h.log.clone(),
            vec![JobOutcome::Failure {
                error: "unsupported state".to_string(),
            }],
        ),
    );
    h.scheduler
        .register_factory("C", stage_factory("C", h.log.clone(), vec![]));

    let chain = JobChain::new(stage("A")).then(stage("B")).then(stage("C"));
    h.scheduler.enqueue_chain(chain).await.unwrap().unwrap();

    assert!(h.scheduler.run_next(Utc::now()).await.unwrap());
    assert!(h.scheduler.run_next(Utc::now()).await.unwrap());
    assert!(!h.scheduler.run_next(Utc::now()).await.unwrap());

    assert_eq!(h.log.run_events(), vec!["A:run", "B:run"]);
    // The third stage was never enqueued.
    assert!(h.log.position("C:added").is_none());
    assert_eq!(h.scheduler.get_job_count_for_factory("C").await, 0);
}

#[tokio::test]
async fn test_chain_halts_on_fatal_failure() {
    let h = harness().await;
    h.scheduler.register_factory(
        "A",
        stage_factory(
            "A",
            h.log.clone(),
            vec![JobOutcome::FatalFailure {
                error: "violated contract".to_string(),
            }],
        ),
    );
    h.scheduler
        .register_factory("B", stage_factory("B", h.log.clone(), vec![]));

    let chain = JobChain::new(stage("A")).then(stage("B"));
    h.scheduler.enqueue_chain(chain).await.unwrap().unwrap();

    assert!(h.scheduler.run_next(Utc::now()).await.unwrap());
    assert!(!h.scheduler.run_next(Utc::now()).await.unwrap());

    assert!(h.log.position("B:added").is_none());
}

#[tokio::test]
async fn test_chain_stage_retry_does_not_halt_the_chain() {
    let h = harness().await;
    h.scheduler.register_factory(
        "A",
        stage_factory(
            "A",
            h.log.clone(),
            vec![JobOutcome::Retry {
                error: "not ready yet".to_string(),
            }],
        ),
    );
    h.scheduler
        .register_factory("B", stage_factory("B", h.log.clone(), vec![]));

    let chain = JobChain::new(stage("A")).then(stage("B")).with_queue("q");
    h.scheduler.enqueue_chain(chain).await.unwrap().unwrap();

    let t0 = Utc::now();
    assert!(h.scheduler.run_next(t0).await.unwrap());
    // Backing off; the chain is paused, not halted.
    assert!(!h.scheduler.run_next(t0).await.unwrap());
    assert!(h.log.position("B:added").is_none());

    // Past the fixed 10s backoff the stage succeeds and the chain continues.
    let t1 = t0 + chrono::Duration::seconds(11);
    assert!(h.scheduler.run_next(t1).await.unwrap());
    assert!(h.scheduler.run_next(t1).await.unwrap());

    assert_eq!(h.log.run_events(), vec!["A:run", "A:run", "B:run"]);
}

#[tokio::test]
async fn test_chain_dropped_when_first_stage_hits_instance_limit() {
    let h = harness().await;
    h.scheduler
        .register_factory("A", stage_factory("A", h.log.clone(), vec![]));
    h.scheduler
        .register_factory("B", stage_factory("B", h.log.clone(), vec![]));

    // An instance of the same factory already exists.
    h.scheduler
        .submit(PendingJob::new("A", JobParameters::new(), json!({})))
        .await
        .unwrap();

    let chain = JobChain::new(PendingJob::new(
        "A",
        JobParameters::new().with_max_instances_for_factory(1),
        json!({}),
    ))
    .then(stage("B"));

    let enqueued = h.scheduler.enqueue_chain(chain).await.unwrap();
    assert!(enqueued.is_none());
    assert_eq!(h.scheduler.get_job_count_for_factory("B").await, 0);

    // Only the pre-existing job remains; draining it enqueues nothing new.
    assert!(h.scheduler.run_next(Utc::now()).await.unwrap());
    assert!(!h.scheduler.run_next(Utc::now()).await.unwrap());
    assert!(h.log.position("B:added").is_none());
}
