//! Producer-side facade over a [`JobStore`]

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{error, info};

use crate::backend::{
    JobStore, QueueDepths, DEFAULT_CLAIM_RETRIES, DEFAULT_DELETE_JOBS_AFTER_HOURS,
};
use crate::clock::{Clock, SystemClock};
use crate::error::QueueResult;
use crate::job::{Job, JobId, NewJob};
use crate::machine::JobRunner;
use crate::registry::{HookRole, TaskRegistry};
use crate::task::Handlers;

/// Everything producers and operators do with jobs: create, claim, sweep, inspect.
#[derive(Clone)]
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    runner: JobRunner,
    clock: Arc<dyn Clock>,
}

impl JobQueue {
    pub fn new(store: Arc<dyn JobStore>, registry: Arc<TaskRegistry>, handlers: Handlers) -> Self {
        Self {
            store,
            runner: JobRunner::new(registry, handlers),
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &Arc<dyn JobStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        self.runner.registry()
    }

    /// Runner sharing this queue's registry and handlers
    pub fn runner(&self) -> &JobRunner {
        &self.runner
    }

    /// Create and persist a job.
    ///
    /// Unknown job types are rejected with a configuration error. When the
    /// job type's creation hook fails, or cannot be resolved, nothing is
    /// stored and `Ok(None)` is returned.
    pub async fn create(&self, new_job: NewJob) -> QueueResult<Option<Job>> {
        let first_task = self.registry().first_task(&new_job.name)?.to_string();
        let mut job = new_job.into_job(first_task, self.clock.now());

        if let Err(err) = self.runner.run_hook(&mut job, HookRole::Creation).await {
            error!(
                name = %job.name,
                error = %err,
                "Creation hook failed, job not created"
            );
            return Ok(None);
        }

        self.store.insert(&job).await?;
        info!(
            job_id = %job.id,
            name = %job.name,
            queue = %job.queue_name,
            priority = job.priority,
            "Created job"
        );
        Ok(Some(job))
    }

    /// Claim the next eligible job of `queue_name`, retrying contention.
    pub async fn claim_next(&self, queue_name: &str) -> QueueResult<Option<Job>> {
        self.store.claim_next(queue_name, DEFAULT_CLAIM_RETRIES).await
    }

    /// Delete terminal jobs created more than `hours` ago (24 by default).
    ///
    /// `Some(0)` sweeps every terminal job created before now. A window
    /// reaching past the earliest representable time deletes nothing.
    pub async fn delete_old_jobs(&self, hours: Option<u32>) -> QueueResult<u64> {
        let hours = hours.unwrap_or(DEFAULT_DELETE_JOBS_AFTER_HOURS);
        let cutoff = Duration::try_hours(i64::from(hours))
            .and_then(|window| self.clock.now().checked_sub_signed(window))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let deleted = self.store.delete_terminal_created_before(cutoff).await?;
        info!(deleted, %cutoff, hours, "Deleted old jobs");
        Ok(deleted)
    }

    pub async fn queue_depths(&self, exclude_future_jobs: bool) -> QueueResult<QueueDepths> {
        self.store.queue_depths(exclude_future_jobs).await
    }

    pub async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        self.store.get(id).await
    }
}

impl std::fmt::Debug for JobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobQueue")
            .field("runner", &self.runner)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}
