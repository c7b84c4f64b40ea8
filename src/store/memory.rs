//! In-memory store backend for tests and embedded setups.
//!
//! Every operation takes the single mutex, so the lease compare-and-set is
//! atomic by construction, matching the UPDATE-with-predicate semantics of
//! the Postgres backend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{
    ExecutionOutcome, ExecutionStore, NotificationStore, StoreResult, TaskFilter, TaskStore,
};
use crate::model::{
    Execution, ExecutionId, StoredNotification, Task, TaskId, TaskKind, TaskStatus,
};

#[derive(Default)]
struct Inner {
    tasks: HashMap<Uuid, Task>,
    executions: Vec<Execution>,
    notifications: Vec<StoredNotification>,
}

/// Shared in-memory store. Clones share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store poisoned")
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn insert_task(&self, task: &Task) -> StoreResult<()> {
        self.lock().tasks.insert(task.id.0, task.clone());
        Ok(())
    }

    async fn get_task(&self, id: TaskId) -> StoreResult<Option<Task>> {
        Ok(self.lock().tasks.get(&id.0).cloned())
    }

    async fn list_tasks(&self, filter: &TaskFilter) -> StoreResult<Vec<Task>> {
        let guard = self.lock();
        let mut matched: Vec<Task> = guard
            .tasks
            .values()
            .filter(|t| t.created_by == filter.created_by)
            .filter(|t| filter.status.is_none_or(|s| t.status == s))
            .filter(|t| filter.kind.is_none_or(|k| t.kind == k))
            .filter(|t| filter.tags.iter().all(|tag| t.tags.contains(tag)))
            .cloned()
            .collect();
        matched.sort_by_key(|t| t.created_at);
        Ok(matched
            .into_iter()
            .skip(filter.offset.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .collect())
    }

    async fn count_session_tasks(&self, created_by: &str) -> StoreResult<i64> {
        let guard = self.lock();
        Ok(guard
            .tasks
            .values()
            .filter(|t| t.created_by == created_by)
            .filter(|t| matches!(t.status, TaskStatus::Active | TaskStatus::Paused))
            .count() as i64)
    }

    async fn update_status(&self, id: TaskId, status: TaskStatus) -> StoreResult<bool> {
        let mut guard = self.lock();
        match guard.tasks.get_mut(&id.0) {
            Some(task) => {
                task.status = status;
                task.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn resume_task(
        &self,
        id: TaskId,
        next_fire_at: Option<DateTime<Utc>>,
    ) -> StoreResult<bool> {
        let mut guard = self.lock();
        match guard.tasks.get_mut(&id.0) {
            Some(task) => {
                task.status = TaskStatus::Active;
                if let Some(next) = next_fire_at {
                    task.next_fire_at = Some(next);
                }
                task.locked_at = None;
                task.locked_by = None;
                task.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn due_tasks(&self, now: DateTime<Utc>, limit: i64) -> StoreResult<Vec<Task>> {
        let guard = self.lock();
        let mut due: Vec<Task> = guard
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Active && t.locked_at.is_none())
            .filter(|t| match t.kind {
                TaskKind::OneShot => t.fire_at.is_some_and(|at| at <= now),
                TaskKind::Recurring => t.next_fire_at.is_some_and(|at| at <= now),
            })
            .cloned()
            .collect();
        due.sort_by_key(|t| t.due_at());
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn acquire_lease(
        &self,
        id: TaskId,
        worker_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let mut guard = self.lock();
        match guard.tasks.get_mut(&id.0) {
            Some(task) if task.status == TaskStatus::Active && task.locked_at.is_none() => {
                task.locked_at = Some(now);
                task.locked_by = Some(worker_id.to_string());
                task.updated_at = now;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, id: TaskId) -> StoreResult<()> {
        let mut guard = self.lock();
        if let Some(task) = guard.tasks.get_mut(&id.0) {
            task.locked_at = None;
            task.locked_by = None;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete_one_shot(&self, id: TaskId, fired_at: DateTime<Utc>) -> StoreResult<()> {
        let mut guard = self.lock();
        if let Some(task) = guard.tasks.get_mut(&id.0) {
            task.status = TaskStatus::Completed;
            task.last_fired_at = Some(fired_at);
            task.fire_count += 1;
            task.current_retry_count = 0;
            task.locked_at = None;
            task.locked_by = None;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn advance_recurring(
        &self,
        id: TaskId,
        fired_at: DateTime<Utc>,
        next_fire_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let mut guard = self.lock();
        if let Some(task) = guard.tasks.get_mut(&id.0) {
            task.next_fire_at = Some(next_fire_at);
            task.last_fired_at = Some(fired_at);
            task.fire_count += 1;
            task.current_retry_count = 0;
            task.locked_at = None;
            task.locked_by = None;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reschedule_retry(&self, id: TaskId, retry_at: DateTime<Utc>) -> StoreResult<()> {
        let mut guard = self.lock();
        if let Some(task) = guard.tasks.get_mut(&id.0) {
            match task.kind {
                TaskKind::OneShot => task.fire_at = Some(retry_at),
                TaskKind::Recurring => task.next_fire_at = Some(retry_at),
            }
            task.current_retry_count += 1;
            task.locked_at = None;
            task.locked_by = None;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn mark_failed(&self, id: TaskId) -> StoreResult<()> {
        let mut guard = self.lock();
        if let Some(task) = guard.tasks.get_mut(&id.0) {
            task.status = TaskStatus::Failed;
            task.current_retry_count += 1;
            task.locked_at = None;
            task.locked_by = None;
            task.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn reap_stale_leases(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let mut guard = self.lock();
        let mut freed = 0u64;
        for task in guard.tasks.values_mut() {
            if task.locked_at.is_some_and(|at| at < older_than) {
                task.locked_at = None;
                task.locked_by = None;
                task.updated_at = Utc::now();
                freed += 1;
            }
        }
        Ok(freed)
    }
}

#[async_trait]
impl ExecutionStore for MemoryStore {
    async fn insert_execution(&self, execution: &Execution) -> StoreResult<()> {
        self.lock().executions.push(execution.clone());
        Ok(())
    }

    async fn finalize_execution(
        &self,
        id: ExecutionId,
        outcome: &ExecutionOutcome,
    ) -> StoreResult<()> {
        let mut guard = self.lock();
        if let Some(execution) = guard.executions.iter_mut().find(|e| e.id == id) {
            execution.status = outcome.status;
            execution.finished_at = Some(outcome.finished_at);
            execution.response_code = outcome.response_code;
            execution.response_body = outcome.response_body.clone();
            execution.error_message = outcome.error_message.clone();
            execution.duration_ms = outcome.duration_ms;
        }
        Ok(())
    }

    async fn append_execution_error(&self, id: ExecutionId, message: &str) -> StoreResult<()> {
        let mut guard = self.lock();
        if let Some(execution) = guard.executions.iter_mut().find(|e| e.id == id) {
            execution.error_message = Some(match execution.error_message.take() {
                Some(existing) => format!("{existing}; {message}"),
                None => message.to_string(),
            });
        }
        Ok(())
    }

    async fn list_executions(&self, task_id: TaskId, limit: i64) -> StoreResult<Vec<Execution>> {
        let guard = self.lock();
        let mut matched: Vec<Execution> = guard
            .executions
            .iter()
            .filter(|e| e.task_id == task_id)
            .cloned()
            .collect();
        matched.sort_by_key(|e| std::cmp::Reverse(e.started_at));
        matched.truncate(limit.max(0) as usize);
        Ok(matched)
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_notification(&self, notification: &StoredNotification) -> StoreResult<()> {
        self.lock().notifications.push(notification.clone());
        Ok(())
    }

    async fn pull_notifications(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<Vec<StoredNotification>> {
        let mut guard = self.lock();
        let mut pulled = Vec::new();
        for notification in guard.notifications.iter_mut() {
            if notification.session_id == session_id && notification.read_at.is_none() {
                notification.read_at = Some(now);
                pulled.push(notification.clone());
            }
        }
        Ok(pulled)
    }
}
