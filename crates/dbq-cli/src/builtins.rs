//! Built-in task and hook handlers
//!
//! Small handlers for smoke-testing a deployment and for demo registries:
//!
//! ```toml
//! [jobs.smoke]
//! tasks = ["dbq.log_workspace", "dbq.sleep", "dbq.noop"]
//! failure_hook = "dbq.record_failure"
//! ```

use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

use dbq_queue::{Handlers, Job, QueueError, QueueResult, Task};

pub const NOOP: &str = "dbq.noop";
pub const LOG_WORKSPACE: &str = "dbq.log_workspace";
pub const SLEEP: &str = "dbq.sleep";
pub const FAIL: &str = "dbq.fail";
pub const RECORD_FAILURE: &str = "dbq.record_failure";

/// Sleeps for `workspace.sleep_seconds` (0 when absent).
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepTask;

#[async_trait]
impl Task for SleepTask {
    async fn run(&self, job: &mut Job) -> anyhow::Result<()> {
        let duration = match job.workspace.get("sleep_seconds") {
            None => Duration::ZERO,
            Some(value) => value
                .as_f64()
                .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
                .ok_or_else(|| {
                    anyhow::anyhow!("sleep_seconds must be a non-negative number, got {value}")
                })?,
        };
        tokio::time::sleep(duration).await;
        Ok(())
    }
}

pub fn handlers() -> QueueResult<Handlers> {
    Handlers::builder()
        .task_fn(NOOP, |_| Ok(()))
        .task_fn(LOG_WORKSPACE, |job| {
            info!(
                job_id = %job.id,
                name = %job.name,
                workspace = %serde_json::Value::Object(job.workspace.clone()),
                "Job workspace"
            );
            Ok(())
        })
        .task(SLEEP, SleepTask)
        .task_fn(FAIL, |job| {
            let reason = job
                .workspace
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("failed on purpose");
            anyhow::bail!("{reason}")
        })
        .failure_hook_fn(RECORD_FAILURE, |job: &mut Job, err: &QueueError| {
            job.workspace
                .insert("failure".into(), err.to_string().into());
            Ok(())
        })
        .build()
}
