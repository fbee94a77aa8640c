//! Queue-depth command - Print waiting job counts in a log-friendly line
//!
//! Usage:
//! ```bash
//! dbq queue-depth default emails --exclude-future-jobs
//! # event=queue_depths default=3 emails=0
//! ```

use anyhow::Result;
use clap::Args;

use dbq_queue::{QueueDepths, DEFAULT_QUEUE_NAME};

use crate::context::GlobalArgs;

/// Arguments for the queue-depth command
#[derive(Args, Debug)]
pub struct QueueDepthArgs {
    /// Queues to report on
    #[arg(default_values_t = [DEFAULT_QUEUE_NAME.to_string()])]
    pub queue_names: Vec<String>,

    /// Ignore jobs whose run_after is still in the future
    #[arg(long)]
    pub exclude_future_jobs: bool,
}

/// `event=queue_depths q1=N q2=M`, in argument order; unknown queues count 0.
pub fn format_depths(depths: &QueueDepths, queue_names: &[String]) -> String {
    let parts: Vec<String> = queue_names
        .iter()
        .map(|name| format!("{name}={}", depths.get(name).copied().unwrap_or(0)))
        .collect();
    format!("event=queue_depths {}", parts.join(" "))
}

/// Run the queue-depth command
pub async fn run(global: &GlobalArgs, args: QueueDepthArgs) -> Result<()> {
    let queue = global.store_queue().await?;
    let depths = queue.queue_depths(args.exclude_future_jobs).await?;
    println!("{}", format_depths(&depths, &args.queue_names));
    Ok(())
}
