//! `JobStore` backed by a SQLite table

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use dbq_queue::{
    Clock, Job, JobId, JobState, JobStore, QueueDepths, QueueError, QueueResult, SystemClock,
    Workspace,
};

use crate::sqlite::{connect, SqliteConfig};

const JOB_COLUMNS: &str =
    "id, created, modified, name, state, next_task, workspace, queue_name, priority, run_after";

/// SQLite primary result codes for a locked database. Extended codes keep
/// the primary code in the low byte.
const SQLITE_BUSY: i32 = 5;
const SQLITE_LOCKED: i32 = 6;

#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: String,
    created: DateTime<Utc>,
    modified: DateTime<Utc>,
    name: String,
    state: String,
    next_task: String,
    workspace: String,
    queue_name: String,
    priority: i64,
    run_after: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for Job {
    type Error = QueueError;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| QueueError::Persistence(format!("invalid job id '{}': {e}", row.id)))?;
        let workspace: Workspace = serde_json::from_str(&row.workspace)?;
        let priority = i32::try_from(row.priority)
            .map_err(|_| QueueError::Persistence(format!("priority {} out of range", row.priority)))?;
        Ok(Job {
            id,
            created: row.created,
            modified: row.modified,
            name: row.name,
            state: row.state.parse()?,
            next_task: row.next_task,
            workspace,
            queue_name: row.queue_name,
            priority,
            run_after: row.run_after,
        })
    }
}

fn is_lock_error(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = err else {
        return false;
    };
    db.code()
        .and_then(|code| code.parse::<i32>().ok())
        .map(|code| code & 0xff)
        .is_some_and(|code| code == SQLITE_BUSY || code == SQLITE_LOCKED)
}

fn persistence(context: &str) -> impl FnOnce(sqlx::Error) -> QueueError + '_ {
    move |e| QueueError::Persistence(format!("{context}: {e}"))
}

/// Durable job store using SQLite
#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    pool: SqlitePool,
    clock: Arc<dyn Clock>,
}

impl SqliteJobStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            clock: Arc::new(SystemClock),
        }
    }

    /// Connect, migrate and wrap the pool.
    pub async fn connect(config: &SqliteConfig) -> QueueResult<Self> {
        Ok(Self::new(connect(config).await?))
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn insert(&self, job: &Job) -> QueueResult<()> {
        let workspace = serde_json::to_string(&job.workspace)?;
        sqlx::query(&format!(
            "INSERT INTO dbq_jobs ({JOB_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(job.id.to_string())
        .bind(job.created)
        .bind(job.modified)
        .bind(&job.name)
        .bind(job.state.as_str())
        .bind(&job.next_task)
        .bind(workspace)
        .bind(&job.queue_name)
        .bind(job.priority)
        .bind(job.run_after)
        .execute(&self.pool)
        .await
        .map_err(persistence("insert job"))?;
        Ok(())
    }

    async fn try_claim(&self, queue_name: &str) -> QueueResult<Option<Job>> {
        let now = self.clock.now();

        // Select and mark in one statement so two connections can never
        // both flip the same row.
        let row: Option<JobRow> = sqlx::query_as(&format!(
            r#"
            UPDATE dbq_jobs
            SET state = 'PROCESSING', modified = ?
            WHERE id = (
                SELECT id FROM dbq_jobs
                WHERE queue_name = ?
                  AND state IN ('NEW', 'READY')
                  AND (run_after IS NULL OR run_after <= ?)
                ORDER BY priority DESC, created ASC, rowid ASC
                LIMIT 1
            )
            AND state IN ('NEW', 'READY')
            RETURNING {JOB_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(queue_name)
        .bind(now)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            if is_lock_error(&e) {
                QueueError::ClaimContention(e.to_string())
            } else {
                QueueError::Persistence(format!("claim job: {e}"))
            }
        })?;

        row.map(Job::try_from).transpose()
    }

    async fn save(&self, job: &Job) -> QueueResult<()> {
        let workspace = serde_json::to_string(&job.workspace)?;
        let result = sqlx::query(
            r#"
            UPDATE dbq_jobs
            SET modified = ?, name = ?, state = ?, next_task = ?, workspace = ?,
                queue_name = ?, priority = ?, run_after = ?
            WHERE id = ?
            "#,
        )
        .bind(self.clock.now())
        .bind(&job.name)
        .bind(job.state.as_str())
        .bind(&job.next_task)
        .bind(workspace)
        .bind(&job.queue_name)
        .bind(job.priority)
        .bind(job.run_after)
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(persistence("save job"))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::Persistence(format!("job {} not found", job.id)));
        }
        Ok(())
    }

    async fn set_state(&self, id: JobId, state: JobState) -> QueueResult<()> {
        let result = sqlx::query("UPDATE dbq_jobs SET state = ?, modified = ? WHERE id = ?")
            .bind(state.as_str())
            .bind(self.clock.now())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(persistence("set job state"))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::Persistence(format!("job {id} not found")));
        }
        Ok(())
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        let row: Option<JobRow> =
            sqlx::query_as(&format!("SELECT {JOB_COLUMNS} FROM dbq_jobs WHERE id = ?"))
                .bind(id.to_string())
                .fetch_optional(&self.pool)
                .await
                .map_err(persistence("load job"))?;
        row.map(Job::try_from).transpose()
    }

    async fn delete_terminal_created_before(&self, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM dbq_jobs
            WHERE state IN ('FAILED', 'COMPLETE', 'STOPPING')
              AND created <= ?
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await
        .map_err(persistence("delete old jobs"))?;
        Ok(result.rows_affected())
    }

    async fn queue_depths(&self, exclude_future_jobs: bool) -> QueueResult<QueueDepths> {
        let rows: Vec<(String, i64)> = if exclude_future_jobs {
            sqlx::query_as(
                r#"
                SELECT queue_name, COUNT(*) FROM dbq_jobs
                WHERE state IN ('NEW', 'READY')
                  AND (run_after IS NULL OR run_after <= ?)
                GROUP BY queue_name
                "#,
            )
            .bind(self.clock.now())
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as(
                r#"
                SELECT queue_name, COUNT(*) FROM dbq_jobs
                WHERE state IN ('NEW', 'READY')
                GROUP BY queue_name
                "#,
            )
            .fetch_all(&self.pool)
            .await
        }
        .map_err(persistence("count queue depths"))?;

        Ok(rows
            .into_iter()
            .map(|(queue, count)| (queue, u64::try_from(count).unwrap_or(0)))
            .collect())
    }
}
