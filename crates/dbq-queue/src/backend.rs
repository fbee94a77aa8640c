//! Job Store Trait

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobId, JobState};

/// Claim attempts retried after lock contention before giving up
pub const DEFAULT_CLAIM_RETRIES: u32 = 3;

/// Age after which terminal jobs are swept
pub const DEFAULT_DELETE_JOBS_AFTER_HOURS: u32 = 24;

/// Jobs waiting per queue name
pub type QueueDepths = BTreeMap<String, u64>;

/// Persistence port for jobs.
///
/// Implementations must make `try_claim` exclusive: two concurrent callers
/// never receive the same row.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Durably write a freshly created job.
    async fn insert(&self, job: &Job) -> QueueResult<()>;

    /// One claim attempt: pick the highest priority, oldest eligible job of
    /// `queue_name`, mark it `PROCESSING` and return it.
    ///
    /// Transient lock conflicts surface as [`QueueError::ClaimContention`].
    async fn try_claim(&self, queue_name: &str) -> QueueResult<Option<Job>>;

    /// Write every mutable column of `job` and refresh `modified`.
    async fn save(&self, job: &Job) -> QueueResult<()>;

    /// Narrow write of the state column only.
    async fn set_state(&self, id: JobId, state: JobState) -> QueueResult<()>;

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>>;

    /// Delete terminal jobs created at or before `cutoff`. Returns the number removed.
    async fn delete_terminal_created_before(&self, cutoff: DateTime<Utc>) -> QueueResult<u64>;

    /// Count of `NEW`/`READY` jobs per queue, optionally ignoring jobs whose
    /// `run_after` is still in the future.
    async fn queue_depths(&self, exclude_future_jobs: bool) -> QueueResult<QueueDepths>;

    /// Claim with deadlock retry: contention is retried immediately up to
    /// `max_retries` times, then returned to the caller.
    async fn claim_next(&self, queue_name: &str, max_retries: u32) -> QueueResult<Option<Job>> {
        let mut retries_left = max_retries;
        loop {
            match self.try_claim(queue_name).await {
                Err(QueueError::ClaimContention(reason)) if retries_left > 0 => {
                    retries_left -= 1;
                    tracing::warn!(
                        queue = %queue_name,
                        error = %reason,
                        retries_left,
                        "Contention while claiming a job, retrying"
                    );
                }
                other => return other,
            }
        }
    }
}
