//! Workers that drive the scheduler.
//!
//! A worker repeatedly asks the scheduler for one unit of eligible work and
//! sleeps when there is none. Job bodies run on the worker's task, outside
//! any index lock, so long-running or blocking work never stalls other
//! workers' access to the index.

use crate::{JobsmithError, Result, config::SchedulerConfig, scheduler::JobScheduler};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::{sync::mpsc, time::sleep};
use tracing::{debug, error, info, warn};

pub struct Worker {
    scheduler: Arc<JobScheduler>,
    name: String,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(scheduler: Arc<JobScheduler>, name: impl Into<String>) -> Self {
        Self {
            scheduler,
            name: name.into(),
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn run(&self, mut shutdown_rx: mpsc::Receiver<()>) -> Result<()> {
        info!("Worker started: {}", self.name);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!("Worker shutting down: {}", self.name);
                    break;
                }
                _ = self.process_next() => {
                    // Continue processing
                }
            }
        }

        Ok(())
    }

    async fn process_next(&self) {
        match self.scheduler.run_next(Utc::now()).await {
            Ok(true) => {
                debug!("Worker {} completed a dispatch", self.name);
            }
            Ok(false) => {
                sleep(self.poll_interval).await;
            }
            Err(e) => {
                error!("Worker {} dispatch error: {}", self.name, e);
                sleep(self.poll_interval).await;
            }
        }
    }
}

pub struct WorkerPool {
    workers: Vec<Worker>,
    shutdown_tx: Vec<mpsc::Sender<()>>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self {
            workers: Vec::new(),
            shutdown_tx: Vec::new(),
        }
    }

    /// Build a pool of identically configured workers.
    pub fn with_workers(scheduler: Arc<JobScheduler>, count: usize, poll_interval: Duration) -> Self {
        let mut pool = Self::new();
        for n in 0..count {
            pool.add_worker(
                Worker::new(Arc::clone(&scheduler), format!("worker-{}", n))
                    .with_poll_interval(poll_interval),
            );
        }
        pool
    }

    pub fn from_config(scheduler: Arc<JobScheduler>, config: &SchedulerConfig) -> Self {
        Self::with_workers(scheduler, config.worker_count, config.poll_interval)
    }

    pub fn add_worker(&mut self, worker: Worker) {
        self.workers.push(worker);
    }

    pub async fn start(&mut self) -> Result<()> {
        info!("Starting worker pool with {} workers", self.workers.len());

        let mut handles = Vec::new();
        self.shutdown_tx.clear();

        for worker in self.workers.drain(..) {
            let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
            self.shutdown_tx.push(shutdown_tx);

            let handle = tokio::spawn(async move {
                if let Err(e) = worker.run(shutdown_rx).await {
                    error!("Worker error: {}", e);
                }
            });
            handles.push(handle);
        }

        // Wait for all workers to complete
        for handle in handles {
            handle.await.map_err(|e| JobsmithError::Worker {
                message: format!("Worker task failed: {}", e),
            })?;
        }

        Ok(())
    }

    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down worker pool");

        for tx in &self.shutdown_tx {
            if tx.send(()).await.is_err() {
                warn!("Failed to send shutdown signal to worker");
            }
        }

        Ok(())
    }
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        constraint::AlwaysSatisfied,
        index::EligibilityIndex,
        storage::MemoryStorage,
    };

    fn scheduler() -> Arc<JobScheduler> {
        let storage = Arc::new(MemoryStorage::new());
        let index = Arc::new(EligibilityIndex::new(storage));
        Arc::new(JobScheduler::new(index, Arc::new(AlwaysSatisfied)))
    }

    #[test]
    fn test_worker_configuration() {
        let worker = Worker::new(scheduler(), "test-worker")
            .with_poll_interval(Duration::from_millis(50));

        assert_eq!(worker.name, "test-worker");
        assert_eq!(worker.poll_interval, Duration::from_millis(50));
    }

    #[test]
    fn test_pool_with_workers() {
        let pool = WorkerPool::with_workers(scheduler(), 4, Duration::from_millis(100));
        assert_eq!(pool.workers.len(), 4);
    }

    #[test]
    fn test_pool_from_config() {
        let config = SchedulerConfig::new()
            .with_worker_count(3)
            .with_poll_interval(Duration::from_millis(250));

        let pool = WorkerPool::from_config(scheduler(), &config);
        assert_eq!(pool.workers.len(), 3);
        assert_eq!(pool.workers[0].poll_interval, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_worker_stops_on_shutdown_signal() {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        let worker = Worker::new(scheduler(), "w").with_poll_interval(Duration::from_millis(5));

        let handle = tokio::spawn(async move { worker.run(shutdown_rx).await });

        shutdown_tx.send(()).await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker did not stop after shutdown signal")
            .unwrap();
        assert!(result.is_ok());
    }
}
