//! SQLite connection setup

use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use dbq_queue::{QueueError, QueueResult};

/// Default on-disk database, created on first use
pub const DEFAULT_DATABASE_URL: &str = "sqlite:dbq.db?mode=rwc";

/// SQLite configuration options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SqliteConfig {
    /// Database URL (e.g., "sqlite:jobs.db" or "sqlite::memory:") (env: DBQ_DATABASE_URL)
    pub url: String,
    /// Maximum number of connections in the pool (env: DBQ_DB_MAX_CONNECTIONS)
    pub max_connections: u32,
    /// WAL journal lets readers proceed while a worker writes
    pub wal_mode: bool,
    /// How long a writer waits on a locked database before SQLITE_BUSY (env: DBQ_DB_BUSY_TIMEOUT_SECS)
    pub busy_timeout_secs: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            max_connections: 5,
            wal_mode: true,
            busy_timeout_secs: 5,
        }
    }
}

impl SqliteConfig {
    /// In-memory database for tests. One connection, since every
    /// connection to `sqlite::memory:` opens its own database.
    pub fn memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            wal_mode: false,
            busy_timeout_secs: 5,
        }
    }

    /// Defaults overridden by environment variables
    pub fn from_env() -> QueueResult<Self> {
        let defaults = Self::default();
        Ok(Self {
            url: env::var("DBQ_DATABASE_URL").unwrap_or(defaults.url),
            max_connections: parse_env("DBQ_DB_MAX_CONNECTIONS")?.unwrap_or(defaults.max_connections),
            wal_mode: defaults.wal_mode,
            busy_timeout_secs: parse_env("DBQ_DB_BUSY_TIMEOUT_SECS")?
                .unwrap_or(defaults.busy_timeout_secs),
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }
}

fn parse_env<T: FromStr>(key: &str) -> QueueResult<Option<T>> {
    match env::var(key) {
        Ok(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| QueueError::Configuration(format!("invalid value for {key}: '{raw}'"))),
        Err(_) => Ok(None),
    }
}

/// Open the pool and bring the schema up to date.
pub async fn connect(config: &SqliteConfig) -> QueueResult<SqlitePool> {
    let mut options = SqliteConnectOptions::from_str(&config.url)
        .map_err(|e| QueueError::Configuration(format!("invalid database url: {e}")))?
        .busy_timeout(Duration::from_secs(config.busy_timeout_secs));

    if config.wal_mode {
        options = options.journal_mode(SqliteJournalMode::Wal);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .connect_with(options)
        .await
        .map_err(|e| QueueError::Persistence(format!("failed to connect: {e}")))?;

    info!(
        url = %config.url,
        wal = config.wal_mode,
        max_connections = config.max_connections,
        "Connected to SQLite"
    );

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| QueueError::Persistence(format!("migration failed: {e}")))?;

    Ok(pool)
}
