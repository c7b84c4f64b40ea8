//! Background scheduler worker.
//!
//! Each worker polls the store for due tasks, takes a per-task lease via an
//! atomic compare-and-set, dispatches the callback, records an execution and
//! advances the task. Multiple workers may run against one store; the lease
//! columns are the only coordination between them. A reaper pass frees
//! leases whose holders appear to have died, trading exactly-once for
//! at-least-once delivery (downstream consumers treat `task_id + fired_at`
//! as an idempotency key).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use rand::distributions::Alphanumeric;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::dispatch::{CallbackRouter, DispatchResult};
use crate::model::{CallbackKind, Execution, ExecutionId, ExecutionStatus, Task, TaskKind};
use crate::schedule;
use crate::store::{ExecutionOutcome, Store, StoreResult};

/// Configuration for the scheduler worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// How often to poll for due tasks.
    pub poll_interval: Duration,
    /// Maximum number of due tasks to process per poll.
    pub batch_size: i64,
    /// Lease age after which the reaper frees a lock.
    pub lock_timeout: Duration,
    /// How often the reaper pass runs.
    pub reaper_interval: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            batch_size: 50,
            lock_timeout: Duration::from_secs(60),
            reaper_interval: Duration::from_secs(5 * 60),
        }
    }
}

fn random_worker_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// One poll/reap engine. Shared by the background loops and driven directly
/// by tests.
#[derive(Clone)]
pub struct WorkerCore {
    worker_id: String,
    store: Arc<dyn Store>,
    router: CallbackRouter,
    config: WorkerConfig,
}

impl WorkerCore {
    pub fn new(store: Arc<dyn Store>, router: CallbackRouter, config: WorkerConfig) -> Self {
        Self {
            worker_id: random_worker_id(),
            store,
            router,
            config,
        }
    }

    pub fn worker_id(&self) -> &str {
        &self.worker_id
    }

    /// One poll pass: fetch due tasks, lease and fire each in ascending due
    /// order. Serialized per worker; a new poll never starts before the
    /// previous batch finishes.
    pub async fn poll_once(&self) -> StoreResult<usize> {
        let now = Utc::now();
        let due = self.store.due_tasks(now, self.config.batch_size).await?;
        if due.is_empty() {
            return Ok(0);
        }

        debug!(count = due.len(), worker_id = %self.worker_id, "found due tasks");

        let mut fired = 0usize;
        for task in due {
            if !self
                .store
                .acquire_lease(task.id, &self.worker_id, Utc::now())
                .await?
            {
                // Another worker won the race; skip.
                debug!(task_id = %task.id, "task already locked");
                continue;
            }
            self.fire_leased(task).await?;
            fired += 1;
        }
        Ok(fired)
    }

    /// Dispatch a task we hold the lease on, then advance it.
    async fn fire_leased(&self, task: Task) -> StoreResult<()> {
        let scheduled_for = task.due_at().unwrap_or_else(Utc::now);
        let started_at = Utc::now();

        let request_url = match task.callback_kind {
            CallbackKind::Webhook => task.callback_config.get("url").cloned(),
            CallbackKind::Chat => task.callback_config.get("webhook_url").cloned(),
            _ => None,
        };

        let execution = Execution {
            id: ExecutionId::new(),
            task_id: task.id,
            started_at,
            finished_at: None,
            status: ExecutionStatus::Running,
            response_code: None,
            response_body: None,
            error_message: None,
            duration_ms: None,
            retry_number: task.current_retry_count,
            request_url,
            request_payload: Some(task.payload.clone()),
        };
        self.store.insert_execution(&execution).await?;

        let result = self.router.dispatch(&task, scheduled_for).await;

        let finished_at = Utc::now();
        let status = if result.success {
            ExecutionStatus::Success
        } else if result.timed_out {
            ExecutionStatus::Timeout
        } else {
            ExecutionStatus::Failed
        };
        let outcome = ExecutionOutcome {
            status,
            finished_at,
            response_code: result.status_code,
            response_body: result.body.clone(),
            error_message: result.error.clone(),
            duration_ms: Some((finished_at - started_at).num_milliseconds()),
        };
        self.store.finalize_execution(execution.id, &outcome).await?;

        self.advance(&task, &result, execution.id).await
    }

    /// Advance the task after a finalized execution. Only a successful
    /// dispatch advances the schedule; failures and timeouts consume the
    /// retry budget and leave the task eligible.
    async fn advance(
        &self,
        task: &Task,
        result: &DispatchResult,
        execution_id: ExecutionId,
    ) -> StoreResult<()> {
        let fired_at = Utc::now();

        if result.success {
            match task.kind {
                TaskKind::OneShot => {
                    self.store.complete_one_shot(task.id, fired_at).await?;
                    info!(task_id = %task.id, worker_id = %self.worker_id, "one-shot task completed");
                }
                TaskKind::Recurring => {
                    let cron = task.cron.as_deref().unwrap_or_default();
                    let tz = schedule::parse_timezone(Some(task.timezone.as_str()))
                        .unwrap_or(chrono_tz::Tz::UTC);
                    match schedule::next_after(cron, tz, fired_at) {
                        Ok(next) => {
                            self.store
                                .advance_recurring(task.id, fired_at, next)
                                .await?;
                            debug!(task_id = %task.id, next = %next, "recurring task advanced");
                        }
                        Err(e) => {
                            // Alarm condition: the expression stopped
                            // evaluating after registration.
                            error!(task_id = %task.id, error = %e, "failed to advance recurring task");
                            let message = format!("schedule advancement failed: {e}");
                            self.store
                                .append_execution_error(execution_id, &message)
                                .await?;
                            self.store.mark_failed(task.id).await?;
                        }
                    }
                }
            }
            return Ok(());
        }

        // Dispatch failure or timeout: retry with the task's delay until
        // the budget runs out.
        if task.current_retry_count >= task.max_retries {
            warn!(
                task_id = %task.id,
                retries = task.current_retry_count,
                "retry budget exhausted; marking task failed"
            );
            self.store.mark_failed(task.id).await?;
        } else {
            let retry_at = fired_at + chrono::Duration::seconds(task.retry_delay_seconds);
            warn!(
                task_id = %task.id,
                retry_at = %retry_at,
                error = result.error.as_deref().unwrap_or("unknown"),
                "dispatch failed; scheduling retry"
            );
            self.store.reschedule_retry(task.id, retry_at).await?;
        }
        Ok(())
    }

    /// One reaper pass: free leases older than the lock timeout. The cutoff
    /// is bound into the store query, never interpolated.
    pub async fn reap_once(&self) -> StoreResult<u64> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.config.lock_timeout)
                .unwrap_or_else(|_| chrono::Duration::seconds(60));
        let freed = self.store.reap_stale_leases(cutoff).await?;
        if freed > 0 {
            warn!(freed, worker_id = %self.worker_id, "reaper freed stale leases");
        }
        Ok(freed)
    }
}

/// Background scheduler worker: a state machine over {stopped, running}.
/// `start` launches the poll and reaper loops; `stop` cancels them and
/// joins the in-flight poll. Both are idempotent.
pub struct SchedulerWorker {
    core: WorkerCore,
    shutdown_tx: Option<watch::Sender<bool>>,
    handles: Vec<tokio::task::JoinHandle<()>>,
}

impl SchedulerWorker {
    pub fn new(store: Arc<dyn Store>, router: CallbackRouter, config: WorkerConfig) -> Self {
        Self {
            core: WorkerCore::new(store, router, config),
            shutdown_tx: None,
            handles: Vec::new(),
        }
    }

    pub fn worker_id(&self) -> &str {
        self.core.worker_id()
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_tx.is_some()
    }

    /// Transition to running. A second `start` while running is a no-op.
    pub fn start(&mut self) {
        if self.shutdown_tx.is_some() {
            return;
        }
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(
            worker_id = %self.core.worker_id,
            poll_interval_ms = self.core.config.poll_interval.as_millis(),
            batch_size = self.core.config.batch_size,
            "scheduler worker started"
        );

        self.handles
            .push(tokio::spawn(run_poll_loop(self.core.clone(), shutdown_rx.clone())));
        self.handles
            .push(tokio::spawn(run_reaper_loop(self.core.clone(), shutdown_rx)));
        self.shutdown_tx = Some(shutdown_tx);
    }

    /// Transition to stopped, joining the in-flight poll. A second `stop`
    /// while stopped is a no-op.
    pub async fn stop(&mut self) {
        let Some(shutdown_tx) = self.shutdown_tx.take() else {
            return;
        };
        let _ = shutdown_tx.send(true);
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }
        info!(worker_id = %self.core.worker_id, "scheduler worker stopped");
    }
}

async fn run_poll_loop(core: WorkerCore, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!(worker_id = %core.worker_id, "poll loop shutting down");
                    break;
                }
            }
            _ = tokio::time::sleep(core.config.poll_interval) => {
                if let Err(e) = core.poll_once().await {
                    error!(error = %e, worker_id = %core.worker_id, "scheduler poll failed");
                }
            }
        }
    }
}

async fn run_reaper_loop(core: WorkerCore, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!(worker_id = %core.worker_id, "reaper loop shutting down");
                    break;
                }
            }
            _ = tokio::time::sleep(core.config.reaper_interval) => {
                if let Err(e) = core.reap_once().await {
                    error!(error = %e, worker_id = %core.worker_id, "reaper sweep failed");
                }
            }
        }
    }
}

/// Convenience: construct, start and hand back a worker.
pub fn spawn_worker(
    store: Arc<dyn Store>,
    router: CallbackRouter,
    config: WorkerConfig,
) -> SchedulerWorker {
    let mut worker = SchedulerWorker::new(store, router, config);
    worker.start();
    worker
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::model::{CallbackConfig, TaskId, TaskStatus};
    use crate::safety::UrlPolicy;
    use crate::store::{ExecutionStore, MemoryStore, NotificationStore, TaskStore};

    fn test_router(store: Arc<dyn Store>) -> CallbackRouter {
        CallbackRouter {
            store,
            url_policy: UrlPolicy::default(),
            hmac_secret: "test-secret".to_string(),
            webhook_timeout: Duration::from_secs(5),
        }
    }

    fn store_task(due_in_secs: i64) -> Task {
        let now = Utc::now();
        Task {
            id: TaskId::new(),
            name: "notify".to_string(),
            description: None,
            kind: TaskKind::OneShot,
            fire_at: Some(now + chrono::Duration::seconds(due_in_secs)),
            cron: None,
            timezone: "UTC".to_string(),
            next_fire_at: None,
            callback_kind: CallbackKind::Store,
            callback_config: CallbackConfig::new(),
            payload: json!({"k": 1}),
            status: TaskStatus::Active,
            max_retries: 2,
            retry_delay_seconds: 30,
            current_retry_count: 0,
            last_fired_at: None,
            fire_count: 0,
            created_by: "session-1".to_string(),
            tags: Vec::new(),
            locked_at: None,
            locked_by: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn core_with(store: &MemoryStore) -> WorkerCore {
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        WorkerCore::new(shared.clone(), test_router(shared), WorkerConfig::default())
    }

    #[tokio::test]
    async fn one_shot_store_task_fires_once_and_completes() {
        let store = MemoryStore::new();
        let core = core_with(&store);

        let task = store_task(-1);
        store.insert_task(&task).await.unwrap();

        assert_eq!(core.poll_once().await.unwrap(), 1);

        let fired = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(fired.status, TaskStatus::Completed);
        assert_eq!(fired.fire_count, 1);
        assert!(fired.last_fired_at.is_some());
        assert!(fired.locked_at.is_none());

        // Exactly one notification with the echoed payload.
        let notifications = store
            .pull_notifications("session-1", Utc::now())
            .await
            .unwrap();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].payload["payload"], json!({"k": 1}));

        // A second poll finds nothing.
        assert_eq!(core.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn recurring_task_advances_to_next_occurrence() {
        let store = MemoryStore::new();
        let core = core_with(&store);

        let now = Utc::now();
        let mut task = store_task(0);
        task.kind = TaskKind::Recurring;
        task.fire_at = None;
        task.cron = Some("0 9 * * *".to_string());
        task.next_fire_at = Some(now - chrono::Duration::seconds(1));
        store.insert_task(&task).await.unwrap();

        assert_eq!(core.poll_once().await.unwrap(), 1);

        let advanced = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(advanced.status, TaskStatus::Active);
        assert_eq!(advanced.fire_count, 1);
        let next = advanced.next_fire_at.unwrap();
        assert!(next > now, "next fire must be in the future");
    }

    #[tokio::test]
    async fn failed_dispatch_consumes_retry_budget_then_fails() {
        let store = MemoryStore::new();
        let core = core_with(&store);

        // Webhook callback with no 'url' key fails without touching the
        // network.
        let mut task = store_task(-1);
        task.callback_kind = CallbackKind::Webhook;
        task.max_retries = 1;
        store.insert_task(&task).await.unwrap();

        // First failure: retry scheduled, count bumped.
        assert_eq!(core.poll_once().await.unwrap(), 1);
        let after_first = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(after_first.status, TaskStatus::Active);
        assert_eq!(after_first.current_retry_count, 1);
        let retry_at = after_first.fire_at.unwrap();
        assert!(retry_at > Utc::now(), "retry pushed into the future");

        // Force the retry due and poll again: budget exhausted, failed.
        let mut due_now = after_first.clone();
        due_now.fire_at = Some(Utc::now() - chrono::Duration::seconds(1));
        store.insert_task(&due_now).await.unwrap();

        assert_eq!(core.poll_once().await.unwrap(), 1);
        let after_second = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(after_second.status, TaskStatus::Failed);
        assert!(after_second.locked_at.is_none());

        // Two executions recorded, both failed.
        let executions = store.list_executions(task.id, 10).await.unwrap();
        assert_eq!(executions.len(), 2);
        assert!(executions
            .iter()
            .all(|e| e.status == ExecutionStatus::Failed));
    }

    #[tokio::test]
    async fn timed_out_dispatch_consumes_retry_budget_instead_of_advancing() {
        let store = MemoryStore::new();
        let core = core_with(&store);

        let task = store_task(-1);
        store.insert_task(&task).await.unwrap();

        // Mirror the fire path up to the dispatch: lease held, execution
        // open, then the callback times out.
        let now = Utc::now();
        assert!(store
            .acquire_lease(task.id, core.worker_id(), now)
            .await
            .unwrap());
        let execution = Execution {
            id: ExecutionId::new(),
            task_id: task.id,
            started_at: now,
            finished_at: None,
            status: ExecutionStatus::Running,
            response_code: None,
            response_body: None,
            error_message: None,
            duration_ms: None,
            retry_number: task.current_retry_count,
            request_url: None,
            request_payload: None,
        };
        store.insert_execution(&execution).await.unwrap();

        core.advance(&task, &DispatchResult::timeout(), execution.id)
            .await
            .unwrap();

        // The task must not complete or advance; the timeout consumed one
        // retry and left it eligible for re-lease.
        let after = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(after.status, TaskStatus::Active);
        assert_eq!(after.fire_count, 0);
        assert!(after.last_fired_at.is_none());
        assert_eq!(after.current_retry_count, 1);
        assert!(after.locked_at.is_none());
        assert!(after.fire_at.unwrap() > now, "retry pushed into the future");

        // With the budget exhausted, a further timeout fails the task.
        let mut spent = after.clone();
        spent.current_retry_count = spent.max_retries;
        store.insert_task(&spent).await.unwrap();

        core.advance(&spent, &DispatchResult::timeout(), execution.id)
            .await
            .unwrap();
        let failed = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(failed.status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn two_workers_fire_a_task_exactly_once() {
        let store = MemoryStore::new();
        let core_a = core_with(&store);
        let core_b = core_with(&store);

        let task = store_task(-1);
        store.insert_task(&task).await.unwrap();

        let (fired_a, fired_b) = tokio::join!(core_a.poll_once(), core_b.poll_once());
        let total = fired_a.unwrap() + fired_b.unwrap();
        assert_eq!(total, 1, "exactly one worker wins the lease");

        let executions = store.list_executions(task.id, 10).await.unwrap();
        assert_eq!(executions.len(), 1);
        assert_eq!(executions[0].status, ExecutionStatus::Success);
    }

    #[tokio::test]
    async fn reaper_makes_stale_leases_eligible_again() {
        let store = MemoryStore::new();
        let core = core_with(&store);

        let task = store_task(-1);
        store.insert_task(&task).await.unwrap();

        // Simulate a crashed worker: lease taken 2 minutes ago.
        let stale = Utc::now() - chrono::Duration::seconds(120);
        assert!(store.acquire_lease(task.id, "dead-worker", stale).await.unwrap());
        assert_eq!(core.poll_once().await.unwrap(), 0);

        assert_eq!(core.reap_once().await.unwrap(), 1);
        assert_eq!(core.poll_once().await.unwrap(), 1);

        let fired = store.get_task(task.id).await.unwrap().unwrap();
        assert_eq!(fired.status, TaskStatus::Completed);
    }

    #[tokio::test]
    async fn start_and_stop_are_idempotent() {
        let store = MemoryStore::new();
        let shared: Arc<dyn Store> = Arc::new(store);
        let router = test_router(shared.clone());
        let mut worker = SchedulerWorker::new(shared, router, WorkerConfig::default());

        assert!(!worker.is_running());
        worker.start();
        worker.start();
        assert!(worker.is_running());

        worker.stop().await;
        worker.stop().await;
        assert!(!worker.is_running());
    }
}
