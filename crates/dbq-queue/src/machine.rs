//! Drives one claimed job through hooks, its current task and the resulting
//! state transition.

use std::sync::Arc;
use tracing::{error, info};

use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobState};
use crate::registry::{HookRole, TaskRegistry};
use crate::task::Handlers;

/// Outcome of one [`JobRunner::drive`] call.
#[derive(Debug)]
pub struct RunReport {
    /// Task that was attempted
    pub task: String,
    /// State decided for the job
    pub state: JobState,
    /// Error that moved the job to `FAILED`
    pub error: Option<QueueError>,
    pub failure_hook_error: Option<QueueError>,
    pub post_task_error: Option<QueueError>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone)]
pub struct JobRunner {
    registry: Arc<TaskRegistry>,
    handlers: Handlers,
}

impl JobRunner {
    pub fn new(registry: Arc<TaskRegistry>, handlers: Handlers) -> Self {
        Self { registry, handlers }
    }

    pub fn registry(&self) -> &Arc<TaskRegistry> {
        &self.registry
    }

    pub fn handlers(&self) -> &Handlers {
        &self.handlers
    }

    /// Execute `job.next_task` and decide the job's next state.
    ///
    /// The job must be `PROCESSING` (or `STOPPING`). Task, hook, resolution
    /// and registry errors never escape: they move the job to `FAILED` and are
    /// returned in the report. Nothing is persisted here.
    pub async fn drive(&self, job: &mut Job) -> QueueResult<RunReport> {
        if !matches!(job.state, JobState::Processing | JobState::Stopping) {
            return Err(QueueError::InvalidTransition {
                from: job.state,
                to: JobState::Complete,
            });
        }

        let task = job.next_task.clone();
        let mut report = RunReport {
            task: task.clone(),
            state: job.state,
            error: None,
            failure_hook_error: None,
            post_task_error: None,
        };

        match self.run_task(job, &task).await {
            Ok(()) => {
                let next = if job.has_next_task() {
                    JobState::Ready
                } else {
                    JobState::Complete
                };
                job.transition(next)?;
            }
            Err(err) => {
                error!(job_id = %job.id, task = %task, error = %err, "Task failed");
                job.transition(JobState::Failed)?;
                report.failure_hook_error = self.run_failure_hook(job, &err).await.err();
                report.error = Some(err);
            }
        }

        report.post_task_error = self.run_hook(job, HookRole::PostTask).await.err();
        if let Some(err) = &report.post_task_error {
            error!(job_id = %job.id, error = %err, "Post-task hook failed");
        }

        report.state = job.state;
        Ok(report)
    }

    /// Pre-task hook, the task itself, then advance `next_task`.
    async fn run_task(&self, job: &mut Job, task: &str) -> QueueResult<()> {
        self.run_hook(job, HookRole::PreTask).await?;

        let handler = self.handlers.resolve_task(task)?;
        handler
            .run(job)
            .await
            .map_err(|e| QueueError::task(task, e))?;

        let next = self.registry.next_task_after(&job.name, Some(task))?;
        job.next_task = next.unwrap_or_default().to_string();
        Ok(())
    }

    /// Run the creation, pre-task or post-task hook for `job`'s type, if one is configured.
    pub(crate) async fn run_hook(&self, job: &mut Job, role: HookRole) -> QueueResult<()> {
        let Some(id) = self.registry.hook(&job.name, role)? else {
            return Ok(());
        };
        info!(job_id = %job.id, hook = %id, role = %role, "Running hook");
        let hook = self.handlers.resolve_task(id)?;
        hook.run(job)
            .await
            .map_err(|e| QueueError::hook(role.as_str(), id, e))
    }

    async fn run_failure_hook(&self, job: &mut Job, cause: &QueueError) -> QueueResult<()> {
        let hook_id = self
            .registry
            .hook(&job.name, HookRole::Failure)
            .ok()
            .flatten();
        let Some(id) = hook_id else {
            info!(job_id = %job.id, "No failure hook for job");
            return Ok(());
        };

        info!(job_id = %job.id, hook = %id, "Running failure hook");
        let result = match self.handlers.resolve_failure_hook(id) {
            Ok(hook) => hook
                .on_failure(job, cause)
                .await
                .map_err(|e| QueueError::hook(HookRole::Failure.as_str(), id, e)),
            Err(e) => Err(e),
        };
        if let Err(err) = &result {
            error!(job_id = %job.id, error = %err, "Failure hook failed");
        }
        result
    }
}
