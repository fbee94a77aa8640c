//! In-memory job store with priority/age claim ordering

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::backend::{JobStore, QueueDepths};
use crate::clock::{Clock, SystemClock};
use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobId, JobState};

#[derive(Debug)]
struct StoredJob {
    job: Job,
    /// Insertion order, breaks ties between jobs created in the same instant
    seq: u64,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, StoredJob>,
    next_seq: u64,
}

/// Claim order: priority descending, then oldest first
fn claim_order(a: &StoredJob, b: &StoredJob) -> Ordering {
    b.job
        .priority
        .cmp(&a.job.priority)
        .then(a.job.created.cmp(&b.job.created))
        .then(a.seq.cmp(&b.seq))
}

/// Process-local store. Claims are exclusive because every operation runs
/// under one lock.
#[derive(Debug)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            clock,
        }
    }

    /// Snapshot of every stored job, in claim order.
    pub async fn jobs(&self) -> Vec<Job> {
        let inner = self.inner.lock().await;
        let mut stored: Vec<&StoredJob> = inner.jobs.values().collect();
        stored.sort_by(|a, b| claim_order(a, b));
        stored.into_iter().map(|s| s.job.clone()).collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.lock().await.jobs.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.jobs.is_empty()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        let mut inner = self.inner.lock().await;
        if inner.jobs.contains_key(&job.id) {
            return Err(QueueError::Persistence(format!("job {} already exists", job.id)));
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.jobs.insert(
            job.id,
            StoredJob {
                job: job.clone(),
                seq,
            },
        );
        Ok(())
    }

    async fn try_claim(&self, queue_name: &str) -> QueueResult<Option<Job>> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;

        let Some(id) = inner
            .jobs
            .values()
            .filter(|s| s.job.is_eligible(queue_name, now))
            .min_by(|a, b| claim_order(a, b))
            .map(|s| s.job.id)
        else {
            return Ok(None);
        };

        let Some(stored) = inner.jobs.get_mut(&id) else {
            return Ok(None);
        };
        stored.job.transition(JobState::Processing)?;
        stored.job.modified = now;
        Ok(Some(stored.job.clone()))
    }

    async fn save(&self, job: &Job) -> QueueResult<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let stored = inner
            .jobs
            .get_mut(&job.id)
            .ok_or_else(|| QueueError::Persistence(format!("job {} not found", job.id)))?;
        stored.job = Job {
            modified: now,
            ..job.clone()
        };
        Ok(())
    }

    async fn set_state(&self, id: JobId, state: JobState) -> QueueResult<()> {
        let now = self.clock.now();
        let mut inner = self.inner.lock().await;
        let stored = inner
            .jobs
            .get_mut(&id)
            .ok_or_else(|| QueueError::Persistence(format!("job {id} not found")))?;
        stored.job.state = state;
        stored.job.modified = now;
        Ok(())
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        let inner = self.inner.lock().await;
        Ok(inner.jobs.get(&id).map(|s| s.job.clone()))
    }

    async fn delete_terminal_created_before(&self, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        let mut inner = self.inner.lock().await;
        let before = inner.jobs.len();
        inner
            .jobs
            .retain(|_, s| !(s.job.state.is_terminal() && s.job.created <= cutoff));
        Ok((before - inner.jobs.len()) as u64)
    }

    async fn queue_depths(&self, exclude_future_jobs: bool) -> QueueResult<QueueDepths> {
        let now = self.clock.now();
        let inner = self.inner.lock().await;
        let mut depths = QueueDepths::new();
        for stored in inner.jobs.values() {
            let job = &stored.job;
            if !job.state.is_claimable() || (exclude_future_jobs && !job.is_due(now)) {
                continue;
            }
            *depths.entry(job.queue_name.clone()).or_insert(0) += 1;
        }
        Ok(depths)
    }
}
