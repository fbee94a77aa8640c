//! Delete-old-jobs command - Retention sweep for finished jobs
//!
//! Usage:
//! ```bash
//! dbq delete-old-jobs --hours 48
//! ```

use anyhow::Result;
use clap::Args;

use crate::context::GlobalArgs;
use crate::output::print_success;

/// Arguments for the delete-old-jobs command
#[derive(Args, Debug)]
pub struct DeleteOldJobsArgs {
    /// Age in hours after which FAILED, COMPLETE and STOPPING jobs are removed
    /// (default 24; 0 removes every finished job)
    #[arg(long)]
    pub hours: Option<u32>,
}

/// Run the delete-old-jobs command
pub async fn run(global: &GlobalArgs, args: DeleteOldJobsArgs) -> Result<()> {
    let queue = global.store_queue().await?;
    let deleted = queue.delete_old_jobs(args.hours).await?;
    print_success(&format!("Deleted {deleted} old job(s)"));
    Ok(())
}
