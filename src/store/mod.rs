//! Typed repositories over the durable task store.
//!
//! The traits here are the only seam between the scheduling engine and
//! persistence. Two implementations exist: [`PostgresStore`] for real
//! deployments and [`MemoryStore`] for tests and embedded use. The lease
//! columns (`locked_at`, `locked_by`) are the cross-process coordination
//! primitive and are only ever manipulated through the compare-and-set
//! operations on [`TaskStore`].

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

use crate::model::{
    Execution, ExecutionId, ExecutionStatus, StoredNotification, Task, TaskId, TaskKind,
    TaskStatus,
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Message(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Serialization(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Filters for task listing. `limit` and `offset` are always bound as
/// query parameters, never interpolated.
#[derive(Debug, Clone)]
pub struct TaskFilter {
    pub created_by: String,
    pub status: Option<TaskStatus>,
    pub kind: Option<TaskKind>,
    pub tags: Vec<String>,
    pub limit: i64,
    pub offset: i64,
}

/// Terminal outcome written onto an execution record. An execution is
/// finalized exactly once.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub status: ExecutionStatus,
    pub finished_at: DateTime<Utc>,
    pub response_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
}

/// Task persistence and the lease protocol.
#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn insert_task(&self, task: &Task) -> StoreResult<()>;

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>>;

    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>>;

    /// Active + paused tasks owned by a session, for the per-session cap.
    async fn count_session_tasks(&self, created_by: &str) -> StoreResult<i64>;

    /// Plain status update (cancel, pause, fail).
    async fn update_status(&self, id: TaskId, status: TaskStatus) -> StoreResult<bool>;

    /// Resume a task: status back to active, fresh `next_fire_at` for
    /// recurring tasks, lease cleared. Does not touch `fire_count`.
    async fn resume_task(
        &self,
        id: TaskId,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> StoreResult<bool>;

    /// Up to `limit` due tasks: active, unleased, and past their fire
    /// instant, ordered by `COALESCE(next_fire_at, fire_at)` ascending.
    async fn due_tasks(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Task>>;

    /// Atomic lease acquisition. Sets the lease only if the row is still
    /// active and unleased; returns false when another worker won.
    async fn acquire_lease(
        &self,
        id: TaskId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool>;

    /// Clear the lease without touching scheduling state.
    async fn release_lease(&self, id: TaskId) -> StoreResult<()>;

    /// One-shot fired: completed, `last_fired_at` stamped, `fire_count`
    /// bumped, retries reset, lease cleared.
    async fn complete_one_shot(&self, id: TaskId, fired_at: DateTime<Utc>) -> StoreResult<()>;

    /// Recurring fired: roll `next_fire_at`, stamp `last_fired_at`, bump
    /// `fire_count`, reset retries, clear the lease.
    async fn advance_recurring(
        &self,
        id: TaskId,
        fired_at: DateTime<Utc>,
        next_fire_at: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Failed dispatch with retry budget left: push the due instant to
    /// `retry_at`, bump `current_retry_count`, clear the lease.
    async fn reschedule_retry(&self, id: TaskId, retry_at: DateTime<Utc>) -> StoreResult<()>;

    /// Failed dispatch with the retry budget exhausted (or an unrecoverable
    /// advancement error): status failed, lease cleared.
    async fn mark_failed(&self, id: TaskId) -> StoreResult<()>;

    /// Free leases older than `older_than`. The cutoff is a bound
    /// parameter in the backing query.
    async fn reap_stale_leases(&self, older_than: DateTime<Utc>) -> StoreResult<u64>;
}

/// Execution-record persistence.
#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn insert_execution(&self, execution: &Execution) -> StoreResult<()>;

    async fn finalize_execution(
        &self,
        id: ExecutionId,
        outcome: &ExecutionOutcome,
    ) -> StoreResult<()>;

    /// Attach an error message to an already-finalized execution (used when
    /// schedule advancement fails after a successful dispatch).
    async fn append_execution_error(&self, id: ExecutionId, message: &str) -> StoreResult<()>;

    /// Most recent executions for a task, newest first.
    async fn list_executions(&self, task_id: TaskId, limit: i64) -> StoreResult<Vec<Execution>>;
}

/// Stored-notification persistence (the `store` callback kind).
#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert_notification(&self, notification: &StoredNotification) -> StoreResult<()>;

    /// Unread notifications for a session, stamping `read_at` so each row
    /// is delivered once.
    async fn pull_notifications(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<StoredNotification>>;
}

/// The full store surface the engine works against.
pub trait Store: TaskStore + ExecutionStore + NotificationStore {}

impl<T: TaskStore + ExecutionStore + NotificationStore> Store for T {}
