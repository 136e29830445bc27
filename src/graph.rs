//! Dependency tracking between jobs.
//!
//! A [`DependencyRecord`] blocks its `job_id` from becoming eligible until the
//! `depends_on_job_id` no longer exists. The graph also answers the reverse
//! question, "which jobs are downstream of this one?", used to cascade
//! terminal failures through dependents.

use crate::job::{DependencyRecord, JobId, JobRecord};
use std::collections::{HashMap, HashSet};
use tracing::warn;

/// In-memory view of the blocking relations between jobs.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// job_id -> records blocking that job
    dependencies_by_job: HashMap<JobId, Vec<DependencyRecord>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph from persisted records, discarding edges that can
    /// never resolve.
    ///
    /// An edge "A depends on B" is vestigial when A and B share a queue key
    /// and B was created strictly after A: queue execution is ordered by
    /// creation time, so B cannot complete before A runs. Such edges (usually
    /// the product of a clock change) are excluded from the in-memory graph
    /// but left untouched in storage.
    pub fn load(
        records: impl IntoIterator<Item = DependencyRecord>,
        jobs: &HashMap<JobId, JobRecord>,
    ) -> Self {
        let mut graph = Self::new();

        for record in records {
            if Self::is_unresolvable(&record, jobs) {
                warn!(
                    job_id = %record.job_id,
                    depends_on = %record.depends_on_job_id,
                    "Discarding dependency that can never resolve"
                );
                continue;
            }
            graph.insert(record);
        }

        graph
    }

    fn is_unresolvable(record: &DependencyRecord, jobs: &HashMap<JobId, JobRecord>) -> bool {
        let (Some(job), Some(target)) = (
            jobs.get(&record.job_id),
            jobs.get(&record.depends_on_job_id),
        ) else {
            return false;
        };

        match (&job.queue_key, &target.queue_key) {
            (Some(a), Some(b)) => a == b && target.create_time > job.create_time,
            _ => false,
        }
    }

    pub fn insert(&mut self, record: DependencyRecord) {
        self.dependencies_by_job
            .entry(record.job_id)
            .or_default()
            .push(record);
    }

    /// Whether the job still has at least one outstanding dependency.
    pub fn has_unresolved_dependencies(&self, job_id: JobId) -> bool {
        self.dependencies_by_job
            .get(&job_id)
            .is_some_and(|records| !records.is_empty())
    }

    /// Direct dependency records blocking `job_id`.
    pub fn dependencies_of(&self, job_id: JobId) -> Vec<DependencyRecord> {
        self.dependencies_by_job
            .get(&job_id)
            .cloned()
            .unwrap_or_default()
    }

    /// The full transitive set of records whose jobs depend, directly or
    /// indirectly, on `job_id`.
    ///
    /// Breadth-first: repeatedly collect the direct dependents of the current
    /// frontier until no new dependents are found.
    pub fn records_that_depend_on(&self, job_id: JobId) -> Vec<DependencyRecord> {
        let mut collected: Vec<DependencyRecord> = Vec::new();
        let mut seen: HashSet<JobId> = HashSet::new();
        let mut frontier: HashSet<JobId> = HashSet::from([job_id]);

        while !frontier.is_empty() {
            let mut next_frontier: HashSet<JobId> = HashSet::new();

            for records in self.dependencies_by_job.values() {
                for record in records {
                    if frontier.contains(&record.depends_on_job_id) && seen.insert(record.job_id) {
                        next_frontier.insert(record.job_id);
                        collected.push(record.clone());
                    }
                }
            }

            frontier = next_frontier;
        }

        collected
    }

    /// Remove every record that references `job_id` as source or target.
    pub fn remove_job(&mut self, job_id: JobId) {
        self.dependencies_by_job.remove(&job_id);

        for records in self.dependencies_by_job.values_mut() {
            records.retain(|record| record.depends_on_job_id != job_id);
        }
        self.dependencies_by_job
            .retain(|_, records| !records.is_empty());
    }

    /// All records currently in the graph, for inspection in tests.
    pub fn all_records(&self) -> Vec<DependencyRecord> {
        self.dependencies_by_job.values().flatten().cloned().collect()
    }
}
