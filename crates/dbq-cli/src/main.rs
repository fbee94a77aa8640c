//! DBQ CLI - workers and operator commands for the job queue
//!
//! # Usage
//!
//! ```bash
//! # Run a worker on the "emails" queue, one job every 2 seconds at most
//! dbq worker emails --rate-limit 2
//!
//! # Enqueue a job
//! dbq create-job send_report --workspace '{"report_id": 7}'
//!
//! # Remove finished jobs older than two days
//! dbq delete-old-jobs --hours 48
//!
//! # Waiting jobs per queue
//! dbq queue-depth default emails
//! ```

use anyhow::Result;
use clap::{Parser, Subcommand};

use dbq_cli::commands::{create_job, delete_old_jobs, info, queue_depth, show_job, worker};
use dbq_cli::context::GlobalArgs;

/// DBQ - Database-backed job queue
///
/// Jobs are rows in a shared SQLite database; workers claim them one at a
/// time and run each job type's task sequence.
#[derive(Parser)]
#[command(name = "dbq", version, about = "DBQ - Database-backed job queue")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(flatten)]
    global: GlobalArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a queue worker process
    #[command(name = "worker")]
    Worker(worker::WorkerArgs),

    /// Create a job
    #[command(name = "create-job")]
    CreateJob(create_job::CreateJobArgs),

    /// Delete finished jobs older than a number of hours
    #[command(name = "delete-old-jobs")]
    DeleteOldJobs(delete_old_jobs::DeleteOldJobsArgs),

    /// Print the current depth of the given queues
    #[command(name = "queue-depth")]
    QueueDepth(queue_depth::QueueDepthArgs),

    /// Print a job as JSON
    #[command(name = "show-job")]
    ShowJob(show_job::ShowJobArgs),

    /// Show configured job types and built-in handlers
    #[command(name = "info")]
    Info(info::InfoArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    match cli.command {
        Commands::Worker(args) => worker::run(&cli.global, args).await,
        Commands::CreateJob(args) => create_job::run(&cli.global, args).await,
        Commands::DeleteOldJobs(args) => delete_old_jobs::run(&cli.global, args).await,
        Commands::QueueDepth(args) => queue_depth::run(&cli.global, args).await,
        Commands::ShowJob(args) => show_job::run(&cli.global, args).await,
        Commands::Info(args) => info::run(&cli.global, args),
    }
}

/// Setup logging based on verbosity level
fn setup_logging(verbosity: u8) {
    use tracing_subscriber::EnvFilter;

    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();
}
