//! Ordered job chains.
//!
//! A chain is a sequence of jobs where stage N+1 is enqueued only once stage
//! N succeeds; a terminal failure anywhere drops the remaining stages. Chains
//! are built on the scheduler's submit primitive: each stage is an ordinary
//! submission when its turn comes, so instance limits and `on_added` apply
//! per stage. Continuations live in the scheduler, not the index.

use crate::{
    Result,
    job::JobId,
    scheduler::{JobScheduler, PendingJob},
};
use std::collections::VecDeque;
use tracing::debug;

/// Builder for an ordered sequence of jobs.
///
/// # Examples
///
/// ```rust,no_run
/// use jobsmith::{JobChain, JobParameters, PendingJob};
/// use serde_json::json;
///
/// # fn build() -> JobChain {
/// let compress = PendingJob::new("CompressJob", JobParameters::new(), json!({"id": 7}));
/// let upload = PendingJob::new("UploadJob", JobParameters::new(), json!({"id": 7}));
/// let notify = PendingJob::new("NotifyJob", JobParameters::new(), json!({"id": 7}));
///
/// JobChain::new(compress)
///     .then(upload)
///     .then(notify)
///     .with_queue("attachment-7")
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct JobChain {
    stages: VecDeque<PendingJob>,
}

impl JobChain {
    pub fn new(first: PendingJob) -> Self {
        Self {
            stages: VecDeque::from([first]),
        }
    }

    pub fn then(mut self, job: PendingJob) -> Self {
        self.stages.push_back(job);
        self
    }

    /// Put every stage on the same queue, serializing the chain against any
    /// other work on that queue.
    pub fn with_queue(mut self, queue_key: impl Into<String>) -> Self {
        let queue_key = queue_key.into();
        for stage in &mut self.stages {
            stage.parameters_mut().queue_key = Some(queue_key.clone());
        }
        self
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    fn into_stages(self) -> VecDeque<PendingJob> {
        self.stages
    }
}

impl JobScheduler {
    /// Enqueue the first stage of a chain and hold the remainder until it
    /// succeeds. Returns `Ok(None)` (dropping the whole chain) when the first
    /// stage is discarded by an instance limit.
    pub async fn enqueue_chain(&self, chain: JobChain) -> Result<Option<JobId>> {
        let mut stages = chain.into_stages();
        let Some(first) = stages.pop_front() else {
            return Ok(None);
        };

        match self.submit(first).await? {
            Some(job_id) => {
                debug!(job_id = %job_id, remaining_stages = stages.len(), "Chain enqueued");
                self.store_chain_tail(job_id, stages);
                Ok(Some(job_id))
            }
            None => {
                debug!("Chain discarded: first stage hit an instance limit");
                Ok(None)
            }
        }
    }
}
