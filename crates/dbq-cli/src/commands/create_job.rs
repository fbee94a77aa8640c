//! Create-job command - Enqueue a job
//!
//! Usage:
//! ```bash
//! dbq create-job send_report --workspace '{"report_id": 7}' --queue-name reports
//! dbq create-job cleanup --priority -5 --run-after 2026-10-20T03:00:00Z
//! ```

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;

use dbq_queue::{NewJob, TaskRegistry, Workspace, DEFAULT_QUEUE_NAME};

use crate::context::GlobalArgs;
use crate::output::{print_success, print_warning};

/// Arguments for the create-job command
#[derive(Args, Debug)]
pub struct CreateJobArgs {
    /// Job type, as named in the registry
    pub name: String,

    /// JSON object used as the initial workspace
    #[arg(long)]
    pub workspace: Option<String>,

    /// Queue to add this job to
    #[arg(long)]
    pub queue_name: Option<String>,

    /// Higher priorities are claimed first
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub priority: i32,

    /// Do not claim before this time (RFC 3339)
    #[arg(long)]
    pub run_after: Option<DateTime<Utc>>,
}

impl CreateJobArgs {
    /// Validate against the registry and build the job description.
    pub fn new_job(&self, registry: &TaskRegistry) -> Result<NewJob> {
        if !registry.contains(&self.name) {
            let known: Vec<_> = registry.job_names().collect();
            bail!(
                "\"{}\" is not a valid job name (known: {})",
                self.name,
                known.join(", ")
            );
        }

        let mut job = NewJob::new(&self.name).priority(self.priority);
        if let Some(raw) = &self.workspace {
            job = job.workspace(parse_workspace(raw)?);
        }
        if let Some(queue) = &self.queue_name {
            job = job.queue(queue);
        }
        if let Some(at) = self.run_after {
            job = job.run_after(at);
        }
        Ok(job)
    }
}

fn parse_workspace(raw: &str) -> Result<Workspace> {
    let value: serde_json::Value =
        serde_json::from_str(raw).with_context(|| format!("Workspace must be valid JSON: {raw}"))?;
    match value {
        serde_json::Value::Object(map) => Ok(map),
        other => bail!("Workspace must be a JSON object, got {other}"),
    }
}

/// Run the create-job command
pub async fn run(global: &GlobalArgs, args: CreateJobArgs) -> Result<()> {
    let queue = global.queue().await?;
    let new_job = args.new_job(queue.registry())?;

    match queue.create(new_job).await? {
        Some(job) => print_success(&format!(
            "Created job: \"{}\", id={} for queue \"{}\"",
            job.name, job.id, job.queue_name
        )),
        None => print_warning(&format!(
            "Creation hook for \"{}\" failed, job not created (queue \"{}\")",
            args.name,
            args.queue_name.as_deref().unwrap_or(DEFAULT_QUEUE_NAME)
        )),
    }
    Ok(())
}
