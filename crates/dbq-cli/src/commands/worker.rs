//! Worker command - Run a queue worker process
//!
//! Usage:
//! ```bash
//! dbq worker emails --rate-limit 2 --shift-limit 3600
//! dbq worker --drain
//! ```

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use dbq_queue::{Worker, WorkerConfig, WorkerExit, DEFAULT_QUEUE_NAME};

use crate::context::GlobalArgs;
use crate::output::{print_info, print_success};
use crate::signals::cancel_on_shutdown;

/// Arguments for the worker command
#[derive(Args, Debug)]
pub struct WorkerArgs {
    /// Queue to claim jobs from
    #[arg(default_value = DEFAULT_QUEUE_NAME)]
    pub queue_name: String,

    /// Minimum seconds between the end of one job and the next claim
    #[arg(long, default_value_t = 1)]
    pub rate_limit: u64,

    /// Stop claiming after this many seconds (0 disables)
    #[arg(long, default_value_t = 0)]
    pub shift_limit: u64,

    /// Process all jobs in the queue and then exit
    #[arg(long)]
    pub drain: bool,

    /// Check configuration and handlers, then exit without starting
    #[arg(long)]
    pub dry_run: bool,
}

impl WorkerArgs {
    pub fn config(&self) -> WorkerConfig {
        WorkerConfig {
            queue_name: self.queue_name.clone(),
            rate_limit: Duration::from_secs(self.rate_limit),
            shift_limit: (self.shift_limit > 0).then(|| Duration::from_secs(self.shift_limit)),
            drain: self.drain,
        }
    }
}

/// Run the worker command
pub async fn run(global: &GlobalArgs, args: WorkerArgs) -> Result<()> {
    let queue = global.queue().await?;

    queue
        .runner()
        .handlers()
        .verify(queue.registry())
        .context("Job registry references unregistered handlers")?;

    println!(
        "Starting job worker for queue {} with rate limit of one job per {} second(s)",
        format!("\"{}\"", args.queue_name).green(),
        args.rate_limit
    );

    if args.dry_run {
        print_info("Dry run, not starting");
        return Ok(());
    }

    let cancel = CancellationToken::new();
    let bridge = cancel_on_shutdown(cancel.clone());

    let mut worker = Worker::new(queue.clone(), args.config());
    let result = worker.run(cancel.clone()).await;
    cancel.cancel();
    // The bridge exits once the token is cancelled
    let _ = bridge.await;

    match result? {
        WorkerExit::Cancelled => print_success("Worker stopped after shutdown signal"),
        WorkerExit::Drained => print_success("Queue drained"),
        WorkerExit::ShiftEnded => print_success("Shift limit reached"),
    }
    Ok(())
}
