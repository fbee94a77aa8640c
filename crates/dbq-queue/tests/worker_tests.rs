//! Worker loop tests against the in-memory store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use dbq_queue::{
    CancellationToken, Clock, Handlers, HookRole, Job, JobId, JobQueue, JobSpec, JobState,
    JobStore, ManualClock, MemoryJobStore, NewJob, QueueDepths, QueueError, QueueResult, Task,
    TaskRegistry, Worker, WorkerConfig, WorkerExit,
};

/// Records the priority and time of every task execution.
#[derive(Clone, Default)]
struct Recorder {
    runs: Arc<Mutex<Vec<(JobId, i32, Instant)>>>,
}

impl Recorder {
    fn runs(&self) -> Vec<(JobId, i32, Instant)> {
        self.runs.lock().unwrap().clone()
    }

    fn priorities(&self) -> Vec<i32> {
        self.runs().into_iter().map(|(_, p, _)| p).collect()
    }
}

#[async_trait]
impl Task for Recorder {
    async fn run(&self, job: &mut Job) -> anyhow::Result<()> {
        self.runs
            .lock()
            .unwrap()
            .push((job.id, job.priority, Instant::now()));
        Ok(())
    }
}

/// Signals when it starts, then blocks until released.
#[derive(Clone, Default)]
struct Gate {
    started: Arc<Notify>,
    release: Arc<Notify>,
}

#[async_trait]
impl Task for Gate {
    async fn run(&self, _job: &mut Job) -> anyhow::Result<()> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(())
    }
}

fn registry() -> Arc<TaskRegistry> {
    Arc::new(
        TaskRegistry::from_specs([
            ("record", JobSpec::new(["record"])),
            ("two_step", JobSpec::new(["record", "record_again"])),
            (
                "explode",
                JobSpec::new(["explode"]).with_hook(HookRole::Failure, "on_fail"),
            ),
            ("gated", JobSpec::new(["gate"])),
        ])
        .unwrap(),
    )
}

struct Harness {
    queue: JobQueue,
    store: Arc<MemoryJobStore>,
    recorder: Recorder,
    gate: Gate,
    failures: Arc<Mutex<Vec<(JobId, String)>>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_store(Arc::new(MemoryJobStore::new()))
    }

    fn with_store(store: Arc<MemoryJobStore>) -> Self {
        let recorder = Recorder::default();
        let gate = Gate::default();
        let failures: Arc<Mutex<Vec<(JobId, String)>>> = Arc::default();
        let seen = failures.clone();
        let handlers = Handlers::builder()
            .task("record", recorder.clone())
            .task("record_again", recorder.clone())
            .task("gate", gate.clone())
            .task_fn("explode", |_| anyhow::bail!("task exploded"))
            .failure_hook_fn("on_fail", move |job, err| {
                seen.lock().unwrap().push((job.id, err.to_string()));
                Ok(())
            })
            .build()
            .unwrap();
        let queue = JobQueue::new(store.clone(), registry(), handlers);
        Self {
            queue,
            store,
            recorder,
            gate,
            failures,
        }
    }

    fn worker(&self, config: WorkerConfig) -> Worker {
        Worker::new(self.queue.clone(), config)
    }

    async fn create(&self, job: NewJob) -> Job {
        self.queue.create(job).await.unwrap().unwrap()
    }

    async fn state(&self, id: JobId) -> JobState {
        self.store.get(id).await.unwrap().unwrap().state
    }
}

fn draining() -> WorkerConfig {
    WorkerConfig {
        rate_limit: Duration::ZERO,
        drain: true,
        ..WorkerConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_drain_processes_in_priority_order() {
    let h = Harness::new();
    for priority in [3, 2, -2, 1] {
        h.create(NewJob::new("record").priority(priority)).await;
    }

    let exit = h.worker(draining()).run(CancellationToken::new()).await.unwrap();
    assert_eq!(exit, WorkerExit::Drained);
    assert_eq!(h.recorder.priorities(), vec![3, 2, 1, -2]);
    assert!(h.queue.queue_depths(false).await.unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_multi_task_job_runs_each_task_then_completes() {
    let h = Harness::new();
    let job = h.create(NewJob::new("two_step")).await;

    h.worker(draining()).run(CancellationToken::new()).await.unwrap();

    assert_eq!(h.recorder.runs().len(), 2);
    let stored = h.store.get(job.id).await.unwrap().unwrap();
    assert_eq!(stored.state, JobState::Complete);
    assert_eq!(stored.next_task, "");
}

#[tokio::test(start_paused = true)]
async fn test_worker_only_claims_its_queue() {
    let h = Harness::new();
    let other = h.create(NewJob::new("record").queue("emails")).await;
    let mine = h.create(NewJob::new("record")).await;

    h.worker(draining()).run(CancellationToken::new()).await.unwrap();

    assert_eq!(h.state(mine.id).await, JobState::Complete);
    assert_eq!(h.state(other.id).await, JobState::New);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_workers_process_each_job_once() {
    let h = Harness::new();
    let mut ids = Vec::new();
    for _ in 0..20 {
        ids.push(h.create(NewJob::new("record")).await.id);
    }

    let workers: Vec<_> = (0..4)
        .map(|_| {
            let mut worker = h.worker(draining());
            tokio::spawn(async move { worker.run(CancellationToken::new()).await })
        })
        .collect();
    for handle in workers {
        assert_eq!(handle.await.unwrap().unwrap(), WorkerExit::Drained);
    }

    let mut counts: HashMap<JobId, usize> = HashMap::new();
    for (id, _, _) in h.recorder.runs() {
        *counts.entry(id).or_default() += 1;
    }
    assert_eq!(counts.len(), 20);
    assert!(counts.values().all(|&n| n == 1));
    for id in ids {
        assert_eq!(h.state(id).await, JobState::Complete);
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_job_runs_failure_hook_once_and_stays_failed() {
    let h = Harness::new();
    let job = h.create(NewJob::new("explode")).await;

    let mut worker = h.worker(WorkerConfig {
        rate_limit: Duration::ZERO,
        shift_limit: Some(Duration::from_secs(5)),
        ..WorkerConfig::default()
    });
    assert_eq!(
        worker.run(CancellationToken::new()).await.unwrap(),
        WorkerExit::ShiftEnded
    );

    assert_eq!(h.state(job.id).await, JobState::Failed);
    let failures = h.failures.lock().unwrap().clone();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, job.id);
    assert!(failures[0].1.contains("task exploded"));
}

#[tokio::test(start_paused = true)]
async fn test_rate_limit_spaces_jobs() {
    let h = Harness::new();
    for _ in 0..3 {
        h.create(NewJob::new("record")).await;
    }

    let mut worker = h.worker(WorkerConfig {
        rate_limit: Duration::from_secs(5),
        drain: true,
        ..WorkerConfig::default()
    });
    worker.run(CancellationToken::new()).await.unwrap();

    let times: Vec<Instant> = h.recorder.runs().into_iter().map(|(_, _, t)| t).collect();
    assert_eq!(times.len(), 3);
    for pair in times.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(5));
    }
}

#[tokio::test(start_paused = true)]
async fn test_shift_limit_stops_claiming() {
    let h = Harness::new();
    let started = Instant::now();

    let mut worker = h.worker(WorkerConfig {
        shift_limit: Some(Duration::from_secs(3)),
        ..WorkerConfig::default()
    });
    let exit = worker.run(CancellationToken::new()).await.unwrap();

    assert_eq!(exit, WorkerExit::ShiftEnded);
    assert!(started.elapsed() >= Duration::from_secs(3));
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_marks_in_flight_job_stopping() {
    let h = Harness::new();
    let gated = h.create(NewJob::new("gated").priority(10)).await;
    let waiting = h.create(NewJob::new("record")).await;

    let cancel = CancellationToken::new();
    let mut worker = h.worker(WorkerConfig::default());
    let token = cancel.clone();
    let handle = tokio::spawn(async move { worker.run(token).await });

    h.gate.started.notified().await;
    cancel.cancel();

    while h.state(gated.id).await != JobState::Stopping {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    // The task is still running and nothing new was claimed
    assert!(!handle.is_finished());
    assert_eq!(h.state(waiting.id).await, JobState::New);

    h.gate.release.notify_one();
    assert_eq!(handle.await.unwrap().unwrap(), WorkerExit::Cancelled);

    // The final save wins over the advisory mark
    assert_eq!(h.state(gated.id).await, JobState::Complete);
    assert_eq!(h.state(waiting.id).await, JobState::New);
}

#[tokio::test(start_paused = true)]
async fn test_run_after_job_waits_for_clock() {
    let clock = Arc::new(ManualClock::default());
    let h = Harness::with_store(Arc::new(MemoryJobStore::with_clock(clock.clone())));
    let later = clock.now() + chrono::Duration::minutes(30);
    let job = h.create(NewJob::new("record").run_after(later)).await;

    h.worker(draining()).run(CancellationToken::new()).await.unwrap();
    assert_eq!(h.state(job.id).await, JobState::New);
    assert_eq!(h.queue.queue_depths(true).await.unwrap().get("default"), None);

    clock.set(later);
    h.worker(draining()).run(CancellationToken::new()).await.unwrap();
    assert_eq!(h.state(job.id).await, JobState::Complete);
}

/// Delegates to a memory store but refuses to save results.
struct ReadOnlyStore {
    inner: MemoryJobStore,
}

#[async_trait]
impl JobStore for ReadOnlyStore {
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        self.inner.insert(job).await
    }

    async fn try_claim(&self, queue_name: &str) -> QueueResult<Option<Job>> {
        self.inner.try_claim(queue_name).await
    }

    async fn save(&self, _job: &Job) -> QueueResult<()> {
        Err(QueueError::Persistence("disk full".into()))
    }

    async fn set_state(&self, id: JobId, state: JobState) -> QueueResult<()> {
        self.inner.set_state(id, state).await
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        self.inner.get(id).await
    }

    async fn delete_terminal_created_before(&self, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        self.inner.delete_terminal_created_before(cutoff).await
    }

    async fn queue_depths(&self, exclude_future_jobs: bool) -> QueueResult<QueueDepths> {
        self.inner.queue_depths(exclude_future_jobs).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_save_failure_is_fatal() {
    let store = Arc::new(ReadOnlyStore {
        inner: MemoryJobStore::new(),
    });
    let handlers = Handlers::builder().task_fn("record", |_| Ok(())).build().unwrap();
    let queue = JobQueue::new(store.clone(), registry(), handlers);
    let job = queue.create(NewJob::new("record")).await.unwrap().unwrap();
    queue.create(NewJob::new("record")).await.unwrap();

    let mut worker = Worker::new(queue.clone(), draining());
    let err = worker.run(CancellationToken::new()).await.unwrap_err();
    assert!(matches!(err, QueueError::Persistence(_)));
    assert!(err.is_fatal_to_worker());

    // The claim stuck; the second job was never touched
    let depths = queue.queue_depths(false).await.unwrap();
    assert_eq!(depths.get("default"), Some(&1));
    assert_eq!(
        queue.get(job.id).await.unwrap().unwrap().state,
        JobState::Processing
    );
}

/// Fails the first claim with an error that leaves the store usable.
struct UnreadableOnceStore {
    inner: MemoryJobStore,
    failed: Mutex<bool>,
}

#[async_trait]
impl JobStore for UnreadableOnceStore {
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        self.inner.insert(job).await
    }

    async fn try_claim(&self, queue_name: &str) -> QueueResult<Option<Job>> {
        let first = !std::mem::replace(&mut *self.failed.lock().unwrap(), true);
        if first {
            return Err(QueueError::Configuration("unreadable row".into()));
        }
        self.inner.try_claim(queue_name).await
    }

    async fn save(&self, job: &Job) -> QueueResult<()> {
        self.inner.save(job).await
    }

    async fn set_state(&self, id: JobId, state: JobState) -> QueueResult<()> {
        self.inner.set_state(id, state).await
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        self.inner.get(id).await
    }

    async fn delete_terminal_created_before(&self, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        self.inner.delete_terminal_created_before(cutoff).await
    }

    async fn queue_depths(&self, exclude_future_jobs: bool) -> QueueResult<QueueDepths> {
        self.inner.queue_depths(exclude_future_jobs).await
    }
}

#[tokio::test(start_paused = true)]
async fn test_non_fatal_error_keeps_worker_polling() {
    let store = Arc::new(UnreadableOnceStore {
        inner: MemoryJobStore::new(),
        failed: Mutex::new(false),
    });
    let handlers = Handlers::builder().task_fn("record", |_| Ok(())).build().unwrap();
    let queue = JobQueue::new(store.clone(), registry(), handlers);
    let job = queue.create(NewJob::new("record")).await.unwrap().unwrap();

    let mut worker = Worker::new(queue.clone(), draining());
    assert_eq!(
        worker.run(CancellationToken::new()).await.unwrap(),
        WorkerExit::Drained
    );
    assert!(*store.failed.lock().unwrap());
    assert_eq!(
        queue.get(job.id).await.unwrap().unwrap().state,
        JobState::Complete
    );
}
