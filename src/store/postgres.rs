//! PostgreSQL store backend.
//!
//! Plain `sqlx::query` with bound parameters throughout; row structs are
//! converted into the model types so unknown status strings surface as
//! store errors instead of panics. The lease protocol is a filtered UPDATE
//! whose `rows_affected` decides who won.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{
    ExecutionOutcome, ExecutionStore, NotificationStore, StoreError, StoreResult, TaskFilter,
    TaskStore,
};
use crate::model::{
    CallbackConfig, CallbackKind, Execution, ExecutionId, ExecutionStatus, StoredNotification,
    Task, TaskId, TaskKind, TaskStatus,
};

/// Connection-pooled Postgres store.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

const TASK_COLUMNS: &str = "id, name, description, kind, fire_at, cron, timezone, next_fire_at, \
     callback_kind, callback_config, payload, status, max_retries, retry_delay_seconds, \
     current_retry_count, last_fired_at, fire_count, created_by, tags, locked_at, locked_by, \
     created_at, updated_at";

const EXECUTION_COLUMNS: &str = "id, task_id, started_at, finished_at, status, response_code, \
     response_body, error_message, duration_ms, retry_number, request_url, request_payload";

impl PostgresStore {
    /// Connect with a bounded pool.
    pub async fn connect(database_url: &str, pool_size: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(pool_size)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the schema. Idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id UUID PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                kind TEXT NOT NULL,
                fire_at TIMESTAMPTZ,
                cron TEXT,
                timezone TEXT NOT NULL DEFAULT 'UTC',
                next_fire_at TIMESTAMPTZ,
                callback_kind TEXT NOT NULL,
                callback_config JSONB NOT NULL DEFAULT '{}'::jsonb,
                payload JSONB NOT NULL DEFAULT '{}'::jsonb,
                status TEXT NOT NULL DEFAULT 'active',
                max_retries INT NOT NULL DEFAULT 3,
                retry_delay_seconds BIGINT NOT NULL DEFAULT 60,
                current_retry_count INT NOT NULL DEFAULT 0,
                last_fired_at TIMESTAMPTZ,
                fire_count BIGINT NOT NULL DEFAULT 0,
                created_by TEXT NOT NULL DEFAULT 'anonymous',
                tags TEXT[] NOT NULL DEFAULT '{}',
                locked_at TIMESTAMPTZ,
                locked_by TEXT,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS executions (
                id UUID PRIMARY KEY,
                task_id UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                started_at TIMESTAMPTZ NOT NULL,
                finished_at TIMESTAMPTZ,
                status TEXT NOT NULL DEFAULT 'running',
                response_code INT,
                response_body TEXT,
                error_message TEXT,
                duration_ms BIGINT,
                retry_number INT NOT NULL DEFAULT 0,
                request_url TEXT,
                request_payload JSONB
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS stored_notifications (
                id UUID PRIMARY KEY,
                task_id UUID NOT NULL REFERENCES tasks(id) ON DELETE CASCADE,
                payload JSONB NOT NULL DEFAULT '{}'::jsonb,
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                read_at TIMESTAMPTZ,
                session_id TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_due
             ON tasks (status, locked_at, next_fire_at, fire_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tasks_session ON tasks (created_by, status)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_executions_task ON executions (task_id, started_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_notifications_session
             ON stored_notifications (session_id, read_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

// ============================================================================
// Row Conversion
// ============================================================================

#[derive(FromRow)]
struct TaskRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    kind: String,
    fire_at: Option<DateTime<Utc>>,
    cron: Option<String>,
    timezone: String,
    next_fire_at: Option<DateTime<Utc>>,
    callback_kind: String,
    callback_config: Value,
    payload: Value,
    status: String,
    max_retries: i32,
    retry_delay_seconds: i64,
    current_retry_count: i32,
    last_fired_at: Option<DateTime<Utc>>,
    fire_count: i64,
    created_by: String,
    tags: Vec<String>,
    locked_at: Option<DateTime<Utc>>,
    locked_by: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for Task {
    type Error = StoreError;

    fn try_from(row: TaskRow) -> Result<Self, StoreError> {
        let kind = TaskKind::parse(&row.kind)
            .ok_or_else(|| StoreError::Message(format!("unknown task kind '{}'", row.kind)))?;
        let status = TaskStatus::parse(&row.status)
            .ok_or_else(|| StoreError::Message(format!("unknown task status '{}'", row.status)))?;
        let callback_kind = CallbackKind::parse(&row.callback_kind).ok_or_else(|| {
            StoreError::Message(format!("unknown callback kind '{}'", row.callback_kind))
        })?;
        let callback_config: CallbackConfig = serde_json::from_value(row.callback_config)?;

        Ok(Task {
            id: TaskId(row.id),
            name: row.name,
            description: row.description,
            kind,
            fire_at: row.fire_at,
            cron: row.cron,
            timezone: row.timezone,
            next_fire_at: row.next_fire_at,
            callback_kind,
            callback_config,
            payload: row.payload,
            status,
            max_retries: row.max_retries,
            retry_delay_seconds: row.retry_delay_seconds,
            current_retry_count: row.current_retry_count,
            last_fired_at: row.last_fired_at,
            fire_count: row.fire_count,
            created_by: row.created_by,
            tags: row.tags,
            locked_at: row.locked_at,
            locked_by: row.locked_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct ExecutionRow {
    id: Uuid,
    task_id: Uuid,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
    status: String,
    response_code: Option<i32>,
    response_body: Option<String>,
    error_message: Option<String>,
    duration_ms: Option<i64>,
    retry_number: i32,
    request_url: Option<String>,
    request_payload: Option<Value>,
}

impl TryFrom<ExecutionRow> for Execution {
    type Error = StoreError;

    fn try_from(row: ExecutionRow) -> Result<Self, StoreError> {
        let status = ExecutionStatus::parse(&row.status).ok_or_else(|| {
            StoreError::Message(format!("unknown execution status '{}'", row.status))
        })?;
        Ok(Execution {
            id: ExecutionId(row.id),
            task_id: TaskId(row.task_id),
            started_at: row.started_at,
            finished_at: row.finished_at,
            status,
            response_code: row.response_code,
            response_body: row.response_body,
            error_message: row.error_message,
            duration_ms: row.duration_ms,
            retry_number: row.retry_number,
            request_url: row.request_url,
            request_payload: row.request_payload,
        })
    }
}

#[derive(FromRow)]
struct NotificationRow {
    id: Uuid,
    task_id: Uuid,
    payload: Value,
    created_at: DateTime<Utc>,
    read_at: Option<DateTime<Utc>>,
    session_id: String,
}

impl From<NotificationRow> for StoredNotification {
    fn from(row: NotificationRow) -> Self {
        Self {
            id: row.id,
            task_id: TaskId(row.task_id),
            payload: row.payload,
            created_at: row.created_at,
            read_at: row.read_at,
            session_id: row.session_id,
        }
    }
}

// ============================================================================
// TaskStore
// ============================================================================

#[async_trait]
impl TaskStore for PostgresStore {
    async fn insert_task(&self, task: &Task) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks
                (id, name, description, kind, fire_at, cron, timezone, next_fire_at,
                 callback_kind, callback_config, payload, status, max_retries,
                 retry_delay_seconds, current_retry_count, last_fired_at, fire_count,
                 created_by, tags, locked_at, locked_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15,
                    $16, $17, $18, $19, $20, $21, $22, $23)
            "#,
        )
        .bind(task.id.0)
        .bind(&task.name)
        .bind(&task.description)
        .bind(task.kind.as_str())
        .bind(task.fire_at)
        .bind(&task.cron)
        .bind(&task.timezone)
        .bind(task.next_fire_at)
        .bind(task.callback_kind.as_str())
        .bind(serde_json::to_value(&task.callback_config)?)
        .bind(&task.payload)
        .bind(task.status.as_str())
        .bind(task.max_retries)
        .bind(task.retry_delay_seconds)
        .bind(task.current_retry_count)
        .bind(task.last_fired_at)
        .bind(task.fire_count)
        .bind(&task.created_by)
        .bind(&task.tags)
        .bind(task.locked_at)
        .bind(&task.locked_by)
        .bind(task.created_at)
        .bind(task.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Task::try_from).transpose()
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE created_by = $1
              AND ($2::text IS NULL OR status = $2)
              AND ($3::text IS NULL OR kind = $3)
              AND (cardinality($4::text[]) = 0 OR tags @> $4)
            ORDER BY created_at ASC
            LIMIT $5 OFFSET $6
            "#
        ))
        .bind(&filter.created_by)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.kind.map(|k| k.as_str()))
        .bind(&filter.tags)
        .bind(filter.limit)
        .bind(filter.offset)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn count_session_tasks(&self, created_by: &str) -> StoreResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM tasks
             WHERE created_by = $1 AND status IN ('active', 'paused')",
        )
        .bind(created_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn update_status(&self, id: TaskId, status: TaskStatus) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE tasks SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id.0)
        .bind(status.as_str())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn resume_task(
        &self,
        id: TaskId,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'active',
                next_fire_at = COALESCE($2, next_fire_at),
                locked_at = NULL,
                locked_by = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(next_fire_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn due_tasks(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Task>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            r#"
            SELECT {TASK_COLUMNS} FROM tasks
            WHERE status = 'active'
              AND locked_at IS NULL
              AND ((kind = 'one_shot' AND fire_at <= $1)
                   OR (kind = 'recurring' AND next_fire_at <= $1))
            ORDER BY COALESCE(next_fire_at, fire_at) ASC
            LIMIT $2
            "#
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Task::try_from).collect()
    }

    async fn acquire_lease(
        &self,
        id: TaskId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET locked_at = $2, locked_by = $3, updated_at = $2
            WHERE id = $1 AND locked_at IS NULL AND status = 'active'
            "#,
        )
        .bind(id.0)
        .bind(now)
        .bind(worker_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_lease(&self, id: TaskId) -> StoreResult<()> {
        sqlx::query(
            "UPDATE tasks SET locked_at = NULL, locked_by = NULL, updated_at = NOW()
             WHERE id = $1",
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_one_shot(&self, id: TaskId, fired_at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'completed',
                last_fired_at = $2,
                fire_count = fire_count + 1,
                current_retry_count = 0,
                locked_at = NULL,
                locked_by = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(fired_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn advance_recurring(
        &self,
        id: TaskId,
        fired_at: DateTime<Utc>,
        next_fire_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET next_fire_at = $3,
                last_fired_at = $2,
                fire_count = fire_count + 1,
                current_retry_count = 0,
                locked_at = NULL,
                locked_by = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(fired_at)
        .bind(next_fire_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reschedule_retry(&self, id: TaskId, retry_at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET fire_at = CASE WHEN kind = 'one_shot' THEN $2 ELSE fire_at END,
                next_fire_at = CASE WHEN kind = 'recurring' THEN $2 ELSE next_fire_at END,
                current_retry_count = current_retry_count + 1,
                locked_at = NULL,
                locked_by = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(retry_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(&self, id: TaskId) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE tasks
            SET status = 'failed',
                current_retry_count = current_retry_count + 1,
                locked_at = NULL,
                locked_by = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reap_stale_leases(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE tasks SET locked_at = NULL, locked_by = NULL, updated_at = NOW()
             WHERE locked_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

// ============================================================================
// ExecutionStore
// ============================================================================

#[async_trait]
impl ExecutionStore for PostgresStore {
    async fn insert_execution(&self, execution: &Execution) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO executions
                (id, task_id, started_at, finished_at, status, response_code,
                 response_body, error_message, duration_ms, retry_number,
                 request_url, request_payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(execution.id.0)
        .bind(execution.task_id.0)
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .bind(execution.status.as_str())
        .bind(execution.response_code)
        .bind(&execution.response_body)
        .bind(&execution.error_message)
        .bind(execution.duration_ms)
        .bind(execution.retry_number)
        .bind(&execution.request_url)
        .bind(&execution.request_payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn finalize_execution(
        &self,
        id: ExecutionId,
        outcome: &ExecutionOutcome,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE executions
            SET status = $2,
                finished_at = $3,
                response_code = $4,
                response_body = $5,
                error_message = $6,
                duration_ms = $7
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id.0)
        .bind(outcome.status.as_str())
        .bind(outcome.finished_at)
        .bind(outcome.response_code)
        .bind(&outcome.response_body)
        .bind(&outcome.error_message)
        .bind(outcome.duration_ms)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_execution_error(&self, id: ExecutionId, message: &str) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE executions
            SET error_message = CASE
                WHEN error_message IS NULL THEN $2
                ELSE error_message || '; ' || $2
            END
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_executions(&self, task_id: TaskId, limit: i64) -> StoreResult<Vec<Execution>> {
        let rows = sqlx::query_as::<_, ExecutionRow>(&format!(
            "SELECT {EXECUTION_COLUMNS} FROM executions
             WHERE task_id = $1 ORDER BY started_at DESC LIMIT $2"
        ))
        .bind(task_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Execution::try_from).collect()
    }
}

// ============================================================================
// NotificationStore
// ============================================================================

#[async_trait]
impl NotificationStore for PostgresStore {
    async fn insert_notification(&self, notification: &StoredNotification) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO stored_notifications
                (id, task_id, payload, created_at, read_at, session_id)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(notification.id)
        .bind(notification.task_id.0)
        .bind(&notification.payload)
        .bind(notification.created_at)
        .bind(notification.read_at)
        .bind(&notification.session_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pull_notifications(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<StoredNotification>> {
        let rows = sqlx::query_as::<_, NotificationRow>(
            r#"
            UPDATE stored_notifications
            SET read_at = $2
            WHERE session_id = $1 AND read_at IS NULL
            RETURNING id, task_id, payload, created_at, read_at, session_id
            "#,
        )
        .bind(session_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(StoredNotification::from).collect())
    }
}
