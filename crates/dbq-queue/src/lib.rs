//! # DBQ Queue
//!
//! Core of a database-backed job queue.
//!
//! Features:
//! - Job types configured as ordered task sequences plus lifecycle hooks
//! - Pluggable `JobStore` with exclusive, priority-ordered claims
//! - Single-queue worker with rate limit, shift limit, drain mode and
//!   cooperative shutdown

pub mod backend;
pub mod clock;
pub mod error;
pub mod job;
pub mod machine;
pub mod memory;
pub mod queue;
pub mod registry;
pub mod task;
pub mod worker;

pub use backend::{JobStore, QueueDepths, DEFAULT_CLAIM_RETRIES, DEFAULT_DELETE_JOBS_AFTER_HOURS};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{QueueError, QueueResult};
pub use job::{Job, JobId, JobState, NewJob, Workspace, DEFAULT_QUEUE_NAME};
pub use machine::{JobRunner, RunReport};
pub use memory::MemoryJobStore;
pub use queue::JobQueue;
pub use registry::{HookRole, JobSpec, TaskRegistry};
pub use task::{failure_hook_fn, task_fn, FailureHook, Handlers, HandlersBuilder, Task};
pub use worker::{Tick, Worker, WorkerConfig, WorkerExit, TICK};

pub use tokio_util::sync::CancellationToken;
