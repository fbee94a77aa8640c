//! Single-queue polling worker

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::QueueResult;
use crate::job::{JobId, JobState, DEFAULT_QUEUE_NAME};
use crate::machine::{JobRunner, RunReport};
use crate::queue::JobQueue;

/// Fixed polling cadence between claim attempts
pub const TICK: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub queue_name: String,
    /// Minimum spacing between the end of one job and the next claim
    pub rate_limit: Duration,
    /// Stop claiming once this long has passed since start
    pub shift_limit: Option<Duration>,
    /// Exit as soon as a claim finds the queue empty
    pub drain: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            rate_limit: Duration::from_secs(1),
            shift_limit: None,
            drain: false,
        }
    }
}

/// Why [`Worker::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    Cancelled,
    Drained,
    ShiftEnded,
}

impl WorkerExit {
    pub fn as_str(self) -> &'static str {
        match self {
            WorkerExit::Cancelled => "cancelled",
            WorkerExit::Drained => "drained",
            WorkerExit::ShiftEnded => "shift ended",
        }
    }
}

/// What one tick did
#[derive(Debug)]
pub enum Tick {
    /// The previous job finished too recently
    RateLimited,
    /// Nothing eligible to claim
    Idle,
    Processed { job_id: JobId, report: RunReport },
}

pub struct Worker {
    queue: JobQueue,
    runner: JobRunner,
    config: WorkerConfig,
    last_job_finished: Option<Instant>,
}

impl Worker {
    /// The worker executes jobs with the queue's own runner, so claims and
    /// execution always share one registry.
    pub fn new(queue: JobQueue, config: WorkerConfig) -> Self {
        Self {
            runner: queue.runner().clone(),
            queue,
            config,
            last_job_finished: None,
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    /// Poll until cancelled, drained or out of shift time.
    ///
    /// A claim that kept hitting contention, or a job whose result could not
    /// be saved, ends the loop with `Err` and the caller is expected to exit.
    /// Other errors are logged and polling carries on at the next tick.
    pub async fn run(&mut self, cancel: CancellationToken) -> QueueResult<WorkerExit> {
        let started = Instant::now();
        info!(
            queue = %self.config.queue_name,
            rate_limit_secs = self.config.rate_limit.as_secs_f64(),
            shift_limit_secs = self.config.shift_limit.map(|d| d.as_secs()),
            drain = self.config.drain,
            "Starting job worker"
        );

        let exit = loop {
            tokio::select! {
                _ = cancel.cancelled() => break WorkerExit::Cancelled,
                _ = tokio::time::sleep(TICK) => {}
            }

            if let Some(limit) = self.config.shift_limit {
                if started.elapsed() >= limit {
                    break WorkerExit::ShiftEnded;
                }
            }

            match self.process_one(&cancel).await {
                Ok(Tick::Idle) if self.config.drain => break WorkerExit::Drained,
                Ok(_) => {}
                Err(err) if !err.is_fatal_to_worker() => {
                    warn!(queue = %self.config.queue_name, error = %err, "Tick failed, continuing");
                }
                Err(err) => {
                    error!(queue = %self.config.queue_name, error = %err, "Worker stopped on fatal error");
                    return Err(err);
                }
            }
        };

        info!(queue = %self.config.queue_name, reason = exit.as_str(), "Worker stopped");
        Ok(exit)
    }

    /// One tick's worth of work: rate-limit check, claim, execute, save.
    ///
    /// If `cancel` fires while the job runs, the job is marked `STOPPING` in
    /// the store and execution carries on; the final save overwrites the mark.
    pub async fn process_one(&mut self, cancel: &CancellationToken) -> QueueResult<Tick> {
        if let Some(last) = self.last_job_finished {
            if last.elapsed() < self.config.rate_limit {
                return Ok(Tick::RateLimited);
            }
        }

        let Some(mut job) = self.queue.claim_next(&self.config.queue_name).await? else {
            return Ok(Tick::Idle);
        };
        let job_id = job.id;
        info!(
            job_id = %job_id,
            name = %job.name,
            queue = %job.queue_name,
            state = %job.state,
            next_task = %job.next_task,
            "Processing job"
        );

        let report = {
            let drive = self.runner.drive(&mut job);
            tokio::pin!(drive);
            tokio::select! {
                report = &mut drive => report,
                _ = cancel.cancelled() => {
                    self.mark_stopping(job_id).await;
                    drive.await
                }
            }
        }?;

        info!(
            job_id = %job_id,
            name = %job.name,
            state = %job.state,
            next_task = if job.has_next_task() { job.next_task.as_str() } else { "none" },
            "Updating job"
        );
        if let Err(err) = self.queue.store().save(&job).await {
            error!(job_id = %job_id, error = %err, "Failed to save job");
            return Err(err);
        }

        self.last_job_finished = Some(Instant::now());
        Ok(Tick::Processed { job_id, report })
    }

    /// Best-effort narrow write; a failure here is only logged.
    async fn mark_stopping(&self, job_id: JobId) {
        info!(job_id = %job_id, "Shutdown requested, marking job STOPPING");
        if let Err(err) = self
            .queue
            .store()
            .set_state(job_id, JobState::Stopping)
            .await
        {
            warn!(job_id = %job_id, error = %err, "Could not mark job STOPPING");
        }
    }
}

impl std::fmt::Debug for Worker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("config", &self.config)
            .field("last_job_finished", &self.last_job_finished)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::NewJob;
    use crate::memory::MemoryJobStore;
    use crate::registry::{JobSpec, TaskRegistry};
    use crate::task::Handlers;
    use std::sync::Arc;

    fn worker(config: WorkerConfig) -> (Worker, JobQueue) {
        let registry = TaskRegistry::from_specs([("one", JobSpec::new(["a"]))]).unwrap();
        let handlers = Handlers::builder().task_fn("a", |_| Ok(())).build().unwrap();
        let queue = JobQueue::new(
            Arc::new(MemoryJobStore::new()),
            Arc::new(registry),
            handlers,
        );
        (Worker::new(queue.clone(), config), queue)
    }

    #[tokio::test]
    async fn test_process_one_idle_then_processed() {
        let (mut worker, queue) = worker(WorkerConfig::default());
        let cancel = CancellationToken::new();
        assert!(matches!(worker.process_one(&cancel).await.unwrap(), Tick::Idle));

        let job = queue.create(NewJob::new("one")).await.unwrap().unwrap();
        match worker.process_one(&cancel).await.unwrap() {
            Tick::Processed { job_id, report } => {
                assert_eq!(job_id, job.id);
                assert_eq!(report.state, JobState::Complete);
            }
            other => panic!("unexpected tick {other:?}"),
        }
        let stored = queue.get(job.id).await.unwrap().unwrap();
        assert_eq!(stored.state, JobState::Complete);
        assert!(!stored.has_next_task());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_right_after_job() {
        let (mut worker, queue) = worker(WorkerConfig {
            rate_limit: Duration::from_secs(10),
            ..WorkerConfig::default()
        });
        let cancel = CancellationToken::new();
        queue.create(NewJob::new("one")).await.unwrap();
        queue.create(NewJob::new("one")).await.unwrap();

        assert!(matches!(worker.process_one(&cancel).await.unwrap(), Tick::Processed { .. }));
        assert!(matches!(worker.process_one(&cancel).await.unwrap(), Tick::RateLimited));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(matches!(worker.process_one(&cancel).await.unwrap(), Tick::Processed { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_before_start() {
        let (mut worker, queue) = worker(WorkerConfig::default());
        let job = queue.create(NewJob::new("one")).await.unwrap().unwrap();

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(worker.run(cancel).await.unwrap(), WorkerExit::Cancelled);
        assert_eq!(queue.get(job.id).await.unwrap().unwrap().state, JobState::New);
    }
}
