//! Settings shared by every subcommand and the objects built from them

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::sync::Arc;

use dbq_persist::{SqliteConfig, SqliteJobStore};
use dbq_queue::{Handlers, JobQueue, TaskRegistry};

use crate::builtins;

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// SQLite database URL
    #[arg(long, env = "DBQ_DATABASE_URL", global = true)]
    pub database_url: Option<String>,

    /// Job registry file (TOML, YAML or JSON)
    #[arg(long, env = "DBQ_JOBS_CONFIG", default_value = "dbq.toml", global = true)]
    pub jobs_config: PathBuf,
}

impl GlobalArgs {
    pub fn sqlite_config(&self) -> Result<SqliteConfig> {
        let config = SqliteConfig::from_env()?;
        Ok(match &self.database_url {
            Some(url) => config.with_url(url.clone()),
            None => config,
        })
    }

    pub fn registry(&self) -> Result<Arc<TaskRegistry>> {
        let registry = TaskRegistry::from_file(&self.jobs_config)
            .context("Could not load job registry (set --jobs-config or DBQ_JOBS_CONFIG)")?;
        Ok(Arc::new(registry))
    }

    /// Queue with the configured registry and the built-in handlers.
    pub async fn queue(&self) -> Result<JobQueue> {
        let registry = self.registry()?;
        let handlers = builtins::handlers()?;
        self.queue_with(registry, handlers).await
    }

    /// Queue for commands that only read or sweep rows and never run handlers.
    pub async fn store_queue(&self) -> Result<JobQueue> {
        self.queue_with(Arc::new(TaskRegistry::default()), Handlers::default())
            .await
    }

    async fn queue_with(&self, registry: Arc<TaskRegistry>, handlers: Handlers) -> Result<JobQueue> {
        let config = self.sqlite_config()?;
        let store = SqliteJobStore::connect(&config)
            .await
            .with_context(|| format!("Could not open database {}", config.url))?;
        Ok(JobQueue::new(Arc::new(store), registry, handlers))
    }
}
