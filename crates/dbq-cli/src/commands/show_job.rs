//! Show-job command - Print one job as JSON

use anyhow::{anyhow, Result};
use clap::Args;
use uuid::Uuid;

use crate::context::GlobalArgs;

/// Arguments for the show-job command
#[derive(Args, Debug)]
pub struct ShowJobArgs {
    /// Job id
    pub id: Uuid,
}

/// Run the show-job command
pub async fn run(global: &GlobalArgs, args: ShowJobArgs) -> Result<()> {
    let queue = global.store_queue().await?;
    let job = queue
        .get(args.id)
        .await?
        .ok_or_else(|| anyhow!("Job {} not found", args.id))?;
    println!("{}", serde_json::to_string_pretty(&job)?);
    Ok(())
}
