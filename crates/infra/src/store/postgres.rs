//! Postgres-backed task store.
//!
//! Row-level transactional semantics carry the whole concurrency contract:
//! `claim` is a single conditional `UPDATE .. RETURNING`, so two contenders
//! can never both observe the pre-state, and every commit is fenced on the
//! attempt count in its `WHERE` clause. No advisory locks.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use torque_core::{NewTask, Task, TaskId, TaskStatus};

use super::{ClaimOutcome, TaskCounts, TaskStore, TaskStoreError};

const TASK_COLUMNS: &str = "id, url, body, headers, status, attempts, due_at, claimed_until, \
     last_status_code, last_error, created_at, updated_at, timeout_ms, backoff, max_attempts";

/// Postgres task store over a sqlx connection pool.
///
/// The pool is `Clone + Send + Sync`; all operations run as single
/// statements or implicit transactions against it.
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: PgPool,
}

impl PostgresTaskStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect and bootstrap the schema.
    pub async fn connect(database_url: &str) -> Result<Self, TaskStoreError> {
        let pool = PgPool::connect(database_url).await.map_err(storage)?;
        let store = Self::new(pool);
        store.migrate().await?;
        Ok(store)
    }

    /// Create the `tasks` table and its dispatch/GC indexes if missing.
    pub async fn migrate(&self) -> Result<(), TaskStoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id UUID PRIMARY KEY,
                url TEXT NOT NULL,
                body BYTEA NOT NULL,
                headers TEXT NOT NULL DEFAULT '[]',
                status TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                due_at TIMESTAMPTZ NOT NULL,
                claimed_until TIMESTAMPTZ,
                last_status_code INTEGER,
                last_error TEXT,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                timeout_ms BIGINT NOT NULL,
                backoff TEXT NOT NULL,
                max_attempts INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_status_due_at ON tasks (status, due_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_status_updated_at ON tasks (status, updated_at)",
        )
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(())
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn insert(&self, new: NewTask) -> Result<Task, TaskStoreError> {
        let task = Task::from_new(new, Utc::now());
        let headers = serde_json::to_string(&task.headers)
            .map_err(|e| TaskStoreError::Storage(e.to_string()))?;

        let result = sqlx::query(
            r#"
            INSERT INTO tasks (id, url, body, headers, status, attempts, due_at,
                               created_at, updated_at, timeout_ms, backoff, max_attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(task.id.as_uuid())
        .bind(&task.url)
        .bind(&task.body)
        .bind(&headers)
        .bind(task.status.as_str())
        .bind(task.attempts as i32)
        .bind(task.due_at)
        .bind(task.created_at)
        .bind(task.updated_at)
        .bind(task.timeout.as_millis() as i64)
        .bind(task.backoff.as_str())
        .bind(task.max_attempts.map(|m| m as i32))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(task),
            Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
                Err(TaskStoreError::Conflict(task.id))
            }
            Err(e) => Err(storage(e)),
        }
    }

    async fn claim(
        &self,
        id: TaskId,
        now: DateTime<Utc>,
        claim_duration: Duration,
    ) -> Result<ClaimOutcome, TaskStoreError> {
        let claimed_until =
            now + chrono::Duration::from_std(claim_duration).unwrap_or_default();

        let row = sqlx::query(&format!(
            r#"
            UPDATE tasks
            SET status = 'executing', claimed_until = $3,
                attempts = attempts + 1, updated_at = $2
            WHERE id = $1
              AND status NOT IN ('completed', 'failed')
              AND due_at <= $2
              AND (claimed_until IS NULL OR claimed_until <= $2)
            RETURNING {TASK_COLUMNS}
            "#
        ))
        .bind(id.as_uuid())
        .bind(now)
        .bind(claimed_until)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?;

        match row {
            Some(row) => Ok(ClaimOutcome::Claimed(row_to_task(&row)?)),
            None => Ok(ClaimOutcome::NotClaimable),
        }
    }

    async fn complete(
        &self,
        id: TaskId,
        expected_attempts: u32,
        status_code: u16,
    ) -> Result<(), TaskStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed', claimed_until = NULL,
                last_status_code = $3, last_error = NULL, updated_at = $4
            WHERE id = $1 AND status = 'executing' AND attempts = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected_attempts as i32)
        .bind(status_code as i32)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        fence(result.rows_affected(), id, expected_attempts)
    }

    async fn fail(
        &self,
        id: TaskId,
        expected_attempts: u32,
        status_code: Option<u16>,
        error: &str,
    ) -> Result<(), TaskStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed', claimed_until = NULL,
                last_status_code = $3, last_error = $4, updated_at = $5
            WHERE id = $1 AND status = 'executing' AND attempts = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected_attempts as i32)
        .bind(status_code.map(|c| c as i32))
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        fence(result.rows_affected(), id, expected_attempts)
    }

    async fn schedule_retry(
        &self,
        id: TaskId,
        expected_attempts: u32,
        due_at: DateTime<Utc>,
        status_code: Option<u16>,
        error: &str,
    ) -> Result<(), TaskStoreError> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'retry', claimed_until = NULL, due_at = $3,
                last_status_code = $4, last_error = $5, updated_at = $6
            WHERE id = $1 AND status = 'executing' AND attempts = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected_attempts as i32)
        .bind(due_at)
        .bind(status_code.map(|c| c as i32))
        .bind(error)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        fence(result.rows_affected(), id, expected_attempts)
    }

    async fn select_due(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskId>, TaskStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id FROM tasks
            WHERE status NOT IN ('completed', 'failed')
              AND due_at <= $1
              AND (claimed_until IS NULL OR claimed_until <= $1)
            ORDER BY due_at ASC
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;

        rows.iter()
            .map(|row| {
                row.try_get::<Uuid, _>("id")
                    .map(TaskId::from_uuid)
                    .map_err(storage)
            })
            .collect()
    }

    async fn sweep_terminal(&self, older_than: DateTime<Utc>) -> Result<u64, TaskStoreError> {
        let result = sqlx::query(
            "DELETE FROM tasks WHERE status IN ('completed', 'failed') AND updated_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await
        .map_err(storage)?;

        Ok(result.rows_affected())
    }

    async fn get(&self, id: TaskId) -> Result<Option<Task>, TaskStoreError> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"))
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(storage)?;

        row.map(|row| row_to_task(&row)).transpose()
    }

    async fn delete(&self, id: TaskId) -> Result<bool, TaskStoreError> {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(result.rows_affected() > 0)
    }

    async fn delete_all(&self) -> Result<u64, TaskStoreError> {
        let result = sqlx::query("DELETE FROM tasks")
            .execute(&self.pool)
            .await
            .map_err(storage)?;

        Ok(result.rows_affected())
    }

    async fn counts(&self) -> Result<TaskCounts, TaskStoreError> {
        let rows = sqlx::query("SELECT status, COUNT(*) AS n FROM tasks GROUP BY status")
            .fetch_all(&self.pool)
            .await
            .map_err(storage)?;

        let mut counts = TaskCounts::default();
        for row in rows {
            let status: String = row.try_get("status").map_err(storage)?;
            let n: i64 = row.try_get("n").map_err(storage)?;
            let n = n as u64;
            match status.parse::<TaskStatus>() {
                Ok(TaskStatus::Pending) => counts.pending = n,
                Ok(TaskStatus::Executing) => counts.executing = n,
                Ok(TaskStatus::Retry) => counts.retry = n,
                Ok(TaskStatus::Completed) => counts.completed = n,
                Ok(TaskStatus::Failed) => counts.failed = n,
                Err(_) => {
                    return Err(TaskStoreError::Storage(format!(
                        "unknown status in tasks table: {status:?}"
                    )))
                }
            }
        }
        Ok(counts)
    }
}

fn storage(e: impl std::fmt::Display) -> TaskStoreError {
    TaskStoreError::Storage(e.to_string())
}

fn fence(rows_affected: u64, id: TaskId, expected: u32) -> Result<(), TaskStoreError> {
    if rows_affected == 0 {
        return Err(TaskStoreError::Fenced { id, expected });
    }
    Ok(())
}

fn row_to_task(row: &PgRow) -> Result<Task, TaskStoreError> {
    let headers_raw: String = row.try_get("headers").map_err(storage)?;
    let headers: Vec<(String, String)> =
        serde_json::from_str(&headers_raw).map_err(|e| TaskStoreError::Storage(e.to_string()))?;

    let status_raw: String = row.try_get("status").map_err(storage)?;
    let status = status_raw.parse().map_err(storage)?;

    let backoff_raw: String = row.try_get("backoff").map_err(storage)?;
    let backoff = backoff_raw.parse().map_err(storage)?;

    Ok(Task {
        id: TaskId::from_uuid(row.try_get::<Uuid, _>("id").map_err(storage)?),
        url: row.try_get("url").map_err(storage)?,
        body: row.try_get("body").map_err(storage)?,
        headers,
        status,
        attempts: row.try_get::<i32, _>("attempts").map_err(storage)? as u32,
        due_at: row.try_get("due_at").map_err(storage)?,
        claimed_until: row.try_get("claimed_until").map_err(storage)?,
        last_status_code: row
            .try_get::<Option<i32>, _>("last_status_code")
            .map_err(storage)?
            .map(|c| c as u16),
        last_error: row.try_get("last_error").map_err(storage)?,
        created_at: row.try_get("created_at").map_err(storage)?,
        updated_at: row.try_get("updated_at").map_err(storage)?,
        timeout: Duration::from_millis(
            row.try_get::<i64, _>("timeout_ms").map_err(storage)? as u64
        ),
        backoff,
        max_attempts: row
            .try_get::<Option<i32>, _>("max_attempts")
            .map_err(storage)?
            .map(|m| m as u32),
    })
}
