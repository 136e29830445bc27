//! The execution lifecycle contract every concrete job obeys.
//!
//! A job moves Queued -> Running -> one of four outcomes. Hooks fire in a
//! fixed order: [`RunnableJob::on_added`] once, synchronously, at submission
//! (commonly used to optimistically flip associated domain state);
//! [`RunnableJob::run`] as the unit of work; [`RunnableJob::on_failure`] on
//! every terminal failure path, including cancellation, to perform
//! compensating writes. The scheduler normalizes every result, including
//! errors the body returns, to a [`JobOutcome`] before it touches the index.

use crate::{JobsmithError, Result, backoff::BackoffStrategy, job::JobRecord};
use async_trait::async_trait;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// The normalized result of one run attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Terminal. The record is deleted.
    Success,
    /// Transient failure. The attempt count is bumped, a new backoff stored,
    /// and the record persists.
    Retry { error: String },
    /// Terminal failure. The record is deleted and `on_failure` runs.
    Failure { error: String },
    /// Terminal failure that bypasses any remaining retry budget. Expected to
    /// be loudly surfaced.
    FatalFailure { error: String },
}

impl JobOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobOutcome::Retry { .. })
    }
}

/// Handle a running job polls for cooperative cancellation.
///
/// The scheduler never interrupts a running body; a cancelled job is expected
/// to notice the flag at its own checkpoints and return a failure outcome.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: crate::job::JobId,
    cancelled: Arc<AtomicBool>,
}

impl JobContext {
    pub(crate) fn new(job_id: crate::job::JobId, cancelled: Arc<AtomicBool>) -> Self {
        Self { job_id, cancelled }
    }

    pub fn job_id(&self) -> crate::job::JobId {
        self.job_id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// A concrete unit of work, rebuilt from a [`JobRecord`] by its factory.
#[async_trait]
pub trait RunnableJob: Send {
    /// Fires once, synchronously, when the job is submitted.
    fn on_added(&mut self) {}

    /// The unit of work. Returns an outcome, or an error the scheduler will
    /// classify via [`RunnableJob::is_retryable_error`].
    async fn run(&mut self, ctx: &JobContext) -> Result<JobOutcome>;

    /// Compensating hook, invoked on every terminal failure path and on
    /// cancellation. Implementations commonly branch on `cancelled` to choose
    /// a different compensating state.
    fn on_failure(&mut self, cancelled: bool) {
        let _ = cancelled;
    }

    /// Whether an error returned by [`RunnableJob::run`] counts as a
    /// transient failure. Defaults to non-retryable.
    fn is_retryable_error(&self, error: &JobsmithError) -> bool {
        let _ = error;
        false
    }

    /// Backoff for the next attempt. Job types wrapping slow external
    /// processes typically override this with a long fixed interval.
    fn backoff_strategy(&self) -> BackoffStrategy {
        BackoffStrategy::default_exponential()
    }
}

/// Rebuilds runnable jobs from persisted records, keyed by
/// [`JobRecord::factory_key`].
pub trait JobFactory: Send + Sync {
    fn create(&self, record: &JobRecord) -> Result<Box<dyn RunnableJob>>;
}

/// Blanket impl so a registry can be populated from plain closures.
impl<F> JobFactory for F
where
    F: Fn(&JobRecord) -> Result<Box<dyn RunnableJob>> + Send + Sync,
{
    fn create(&self, record: &JobRecord) -> Result<Box<dyn RunnableJob>> {
        self(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_terminality() {
        assert!(JobOutcome::Success.is_terminal());
        assert!(
            JobOutcome::Failure {
                error: "bad input".to_string()
            }
            .is_terminal()
        );
        assert!(
            JobOutcome::FatalFailure {
                error: "contract violated".to_string()
            }
            .is_terminal()
        );
        assert!(
            !JobOutcome::Retry {
                error: "rate limited".to_string()
            }
            .is_terminal()
        );
    }

    #[test]
    fn test_context_cancellation_flag() {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = JobContext::new(crate::job::JobId::new_v4(), Arc::clone(&flag));

        assert!(!ctx.is_cancelled());
        flag.store(true, Ordering::SeqCst);
        assert!(ctx.is_cancelled());
    }
}
