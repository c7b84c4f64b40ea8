//! The seven tool operations exposed to remote agents.
//!
//! Every operation takes a named-argument JSON mapping and the caller's
//! session id, validates through the safety layer and the schedule
//! evaluator, and only then touches the store. Validation failures never
//! reach persistence.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::info;

use crate::config::Config;
use crate::error::ToolError;
use crate::model::{
    CallbackKind, Execution, Task, TaskId, TaskKind, TaskStatus,
};
use crate::safety::cron_guard;
use crate::safety::{UrlPolicy, payload, validate_webhook_url};
use crate::schedule;
use crate::store::{Store, TaskFilter};

const DEFAULT_LIST_LIMIT: i64 = 50;
const MAX_LIST_LIMIT: i64 = 200;
const HISTORY_LIMIT: i64 = 10;
const UPCOMING_PREVIEW: usize = 3;

/// The tool surface, wired over the store and server configuration.
#[derive(Clone)]
pub struct Tools {
    store: Arc<dyn Store>,
    config: Arc<Config>,
}

// ============================================================================
// Parameter Structs
// ============================================================================

#[derive(Debug, Deserialize)]
struct CallbackParams {
    #[serde(rename = "type")]
    kind: String,
    #[serde(flatten)]
    config: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct ScheduleOneShotParams {
    name: String,
    description: Option<String>,
    at: Option<String>,
    #[serde(rename = "in")]
    in_: Option<String>,
    callback: CallbackParams,
    payload: Option<Value>,
    max_retries: Option<i32>,
    retry_delay_seconds: Option<i64>,
    tags: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
struct ScheduleRecurringParams {
    name: String,
    description: Option<String>,
    cron: String,
    timezone: Option<String>,
    callback: CallbackParams,
    payload: Option<Value>,
    enabled: Option<bool>,
    max_retries: Option<i32>,
    retry_delay_seconds: Option<i64>,
    tags: Option<Vec<String>>,
}

#[derive(Debug, Default, Deserialize)]
struct ListTasksParams {
    status: Option<String>,
    kind: Option<String>,
    tags: Option<Vec<String>>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct GetTaskParams {
    id: String,
    include_history: Option<bool>,
}

#[derive(Debug, Deserialize)]
struct TaskIdParams {
    id: String,
}

// ============================================================================
// Views
// ============================================================================

fn task_view(task: &Task) -> Value {
    json!({
        "id": task.id.to_string(),
        "name": task.name,
        "description": task.description,
        "kind": task.kind.as_str(),
        "fire_at": task.fire_at.map(|t| t.to_rfc3339()),
        "cron": task.cron,
        "timezone": task.timezone,
        "next_fire_at": task.next_fire_at.map(|t| t.to_rfc3339()),
        "callback_kind": task.callback_kind.as_str(),
        "status": task.status.as_str(),
        "payload": task.payload,
        "max_retries": task.max_retries,
        "current_retry_count": task.current_retry_count,
        "last_fired_at": task.last_fired_at.map(|t| t.to_rfc3339()),
        "fire_count": task.fire_count,
        "tags": task.tags,
        "created_at": task.created_at.to_rfc3339(),
        "updated_at": task.updated_at.to_rfc3339(),
    })
}

fn execution_view(execution: &Execution) -> Value {
    json!({
        "id": execution.id.to_string(),
        "task_id": execution.task_id.to_string(),
        "started_at": execution.started_at.to_rfc3339(),
        "finished_at": execution.finished_at.map(|t| t.to_rfc3339()),
        "status": execution.status.as_str(),
        "response_code": execution.response_code,
        "response_body": execution.response_body,
        "error_message": execution.error_message,
        "duration_ms": execution.duration_ms,
        "retry_number": execution.retry_number,
        "request_url": execution.request_url,
    })
}

/// Descriptors for the list-tools endpoints.
pub fn tool_descriptors() -> Vec<Value> {
    let entries: [(&str, &str, Value); 7] = [
        (
            "schedule_one_shot",
            "Schedule a task that fires once, at an absolute time or after a relative delay",
            json!({"name": "string", "at": "ISO-8601 timestamp (or use 'in')",
                   "in": "relative duration like '90s', '2h' (or use 'at')",
                   "callback": "{type: webhook|chat|email|store, ...kind-specific config}",
                   "payload": "optional JSON object delivered with the callback"}),
        ),
        (
            "schedule_recurring",
            "Schedule a task that fires on a 5-field cron expression",
            json!({"name": "string", "cron": "5-field cron expression",
                   "timezone": "optional IANA timezone, default UTC",
                   "callback": "{type: webhook|chat|email|store, ...kind-specific config}",
                   "enabled": "optional; false inserts the task paused"}),
        ),
        (
            "list_tasks",
            "List the caller's tasks with optional filters",
            json!({"status": "optional status filter, default active",
                   "kind": "optional one_shot|recurring",
                   "tags": "optional tag list (all must match)",
                   "limit": "optional, default 50, max 200", "offset": "optional"}),
        ),
        (
            "get_task",
            "Fetch one task, optionally with its recent executions",
            json!({"id": "task id", "include_history": "optional bool"}),
        ),
        ("cancel_task", "Cancel an active or paused task", json!({"id": "task id"})),
        ("pause_task", "Pause an active task", json!({"id": "task id"})),
        (
            "resume_task",
            "Resume a paused task (recurring tasks get a fresh next fire time)",
            json!({"id": "task id"}),
        ),
    ];
    entries
        .into_iter()
        .map(|(name, description, args)| {
            json!({"name": name, "description": description, "arguments": args})
        })
        .collect()
}

// ============================================================================
// Implementation
// ============================================================================

impl Tools {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    fn url_policy(&self) -> UrlPolicy {
        UrlPolicy {
            require_https: self.config.environment.is_production(),
            allowed_domains: self.config.allowed_webhook_domains.clone(),
        }
    }

    /// Execute a named operation with its argument mapping.
    pub async fn execute(
        &self,
        tool: &str,
        params: &Value,
        session_id: &str,
    ) -> Result<Value, ToolError> {
        match tool {
            "schedule_one_shot" => self.schedule_one_shot(params, session_id).await,
            "schedule_recurring" => self.schedule_recurring(params, session_id).await,
            "list_tasks" => self.list_tasks(params, session_id).await,
            "get_task" => self.get_task(params, session_id).await,
            "cancel_task" => self.cancel_task(params, session_id).await,
            "pause_task" => self.pause_task(params, session_id).await,
            "resume_task" => self.resume_task(params, session_id).await,
            other => Err(ToolError::InvalidInput(format!("unknown tool '{other}'"))),
        }
    }

    fn parse<'de, T: Deserialize<'de>>(params: &'de Value) -> Result<T, ToolError> {
        T::deserialize(params).map_err(|e| ToolError::InvalidInput(e.to_string()))
    }

    /// Shared validation for both scheduling operations: callback kind,
    /// webhook URL, payload, session cap.
    async fn validate_callback_and_payload(
        &self,
        callback: &CallbackParams,
        raw_payload: Option<&Value>,
        session_id: &str,
    ) -> Result<(CallbackKind, Value), ToolError> {
        let kind = CallbackKind::parse(&callback.kind).ok_or_else(|| {
            ToolError::InvalidInput(format!("unknown callback kind '{}'", callback.kind))
        })?;

        if kind == CallbackKind::Webhook {
            let url = callback.config.get("url").ok_or_else(|| {
                ToolError::InvalidInput("webhook callback requires 'url'".to_string())
            })?;
            validate_webhook_url(url, &self.url_policy())
                .await
                .map_err(ToolError::UrlRejected)?;
        }
        if kind == CallbackKind::Email && !callback.config.contains_key("address") {
            return Err(ToolError::InvalidInput(
                "email callback requires 'address'".to_string(),
            ));
        }
        if kind == CallbackKind::Chat && !callback.config.contains_key("webhook_url") {
            return Err(ToolError::InvalidInput(
                "chat callback requires 'webhook_url'".to_string(),
            ));
        }

        let sanitized = payload::sanitize(raw_payload, self.config.max_payload_size)
            .map_err(|e| match e {
                payload::PayloadError::TooLarge { size, .. } => ToolError::PayloadTooLarge(size),
                payload::PayloadError::Invalid(msg) => ToolError::PayloadInvalid(msg),
            })?;

        let active = self.store.count_session_tasks(session_id).await?;
        if active >= self.config.max_active_tasks {
            return Err(ToolError::TooManyActive(self.config.max_active_tasks));
        }

        Ok((kind, sanitized))
    }

    async fn schedule_one_shot(
        &self,
        params: &Value,
        session_id: &str,
    ) -> Result<Value, ToolError> {
        let params: ScheduleOneShotParams = Self::parse(params)?;
        if params.name.trim().is_empty() {
            return Err(ToolError::InvalidInput("'name' is required".to_string()));
        }

        let now = Utc::now();
        let fire_at =
            schedule::resolve_fire_at(params.at.as_deref(), params.in_.as_deref(), now)?;

        let (callback_kind, sanitized) = self
            .validate_callback_and_payload(&params.callback, params.payload.as_ref(), session_id)
            .await?;

        let task = Task {
            id: TaskId::new(),
            name: params.name,
            description: params.description,
            kind: TaskKind::OneShot,
            fire_at: Some(fire_at),
            cron: None,
            timezone: "UTC".to_string(),
            next_fire_at: None,
            callback_kind,
            callback_config: params.callback.config,
            payload: sanitized,
            status: TaskStatus::Active,
            max_retries: params.max_retries.unwrap_or(self.config.webhook_max_retries),
            retry_delay_seconds: params.retry_delay_seconds.unwrap_or(60),
            current_retry_count: 0,
            last_fired_at: None,
            fire_count: 0,
            created_by: session_id.to_string(),
            tags: params.tags.unwrap_or_default(),
            locked_at: None,
            locked_by: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_task(&task).await?;
        info!(task_id = %task.id, session = session_id, "one-shot task scheduled");

        Ok(json!({
            "success": true,
            "task": task_view(&task),
        }))
    }

    async fn schedule_recurring(
        &self,
        params: &Value,
        session_id: &str,
    ) -> Result<Value, ToolError> {
        let params: ScheduleRecurringParams = Self::parse(params)?;
        if params.name.trim().is_empty() {
            return Err(ToolError::InvalidInput("'name' is required".to_string()));
        }

        cron_guard::validate_cron_expr(&params.cron)
            .map_err(|e| ToolError::InvalidCron(e.to_string()))?;

        let tz = schedule::parse_timezone(params.timezone.as_deref())?;
        let now = Utc::now();
        let next_fire_at = schedule::next_after(&params.cron, tz, now)?;

        let (callback_kind, sanitized) = self
            .validate_callback_and_payload(&params.callback, params.payload.as_ref(), session_id)
            .await?;

        let enabled = params.enabled.unwrap_or(true);
        let task = Task {
            id: TaskId::new(),
            name: params.name,
            description: params.description,
            kind: TaskKind::Recurring,
            fire_at: None,
            cron: Some(params.cron.clone()),
            timezone: tz.name().to_string(),
            next_fire_at: Some(next_fire_at),
            callback_kind,
            callback_config: params.callback.config,
            payload: sanitized,
            status: if enabled {
                TaskStatus::Active
            } else {
                TaskStatus::Paused
            },
            max_retries: params.max_retries.unwrap_or(self.config.webhook_max_retries),
            retry_delay_seconds: params.retry_delay_seconds.unwrap_or(60),
            current_retry_count: 0,
            last_fired_at: None,
            fire_count: 0,
            created_by: session_id.to_string(),
            tags: params.tags.unwrap_or_default(),
            locked_at: None,
            locked_by: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_task(&task).await?;
        info!(task_id = %task.id, session = session_id, cron = %params.cron, "recurring task scheduled");

        let preview: Vec<String> = schedule::upcoming(&params.cron, tz, UPCOMING_PREVIEW)
            .unwrap_or_default()
            .into_iter()
            .map(|t| t.to_rfc3339())
            .collect();

        Ok(json!({
            "success": true,
            "task": task_view(&task),
            "schedule": schedule::describe(&params.cron),
            "upcoming": preview,
        }))
    }

    async fn list_tasks(&self, params: &Value, session_id: &str) -> Result<Value, ToolError> {
        let params: ListTasksParams = if params.is_null() {
            ListTasksParams::default()
        } else {
            Self::parse(params)?
        };

        let status = match params.status.as_deref() {
            None => Some(TaskStatus::Active),
            Some("all") => None,
            Some(s) => Some(TaskStatus::parse(s).ok_or_else(|| {
                ToolError::InvalidInput(format!("unknown status '{s}'"))
            })?),
        };
        let kind = params
            .kind
            .as_deref()
            .map(|k| {
                TaskKind::parse(k)
                    .ok_or_else(|| ToolError::InvalidInput(format!("unknown kind '{k}'")))
            })
            .transpose()?;

        let filter = TaskFilter {
            created_by: session_id.to_string(),
            status,
            kind,
            tags: params.tags.unwrap_or_default(),
            limit: params
                .limit
                .unwrap_or(DEFAULT_LIST_LIMIT)
                .clamp(1, MAX_LIST_LIMIT),
            offset: params.offset.unwrap_or(0).max(0),
        };

        let tasks = self.store.list_tasks(&filter).await?;
        Ok(json!({
            "success": true,
            "count": tasks.len(),
            "tasks": tasks.iter().map(task_view).collect::<Vec<_>>(),
        }))
    }

    /// Fetch a task owned by this session; other sessions' tasks read as
    /// absent.
    async fn owned_task(&self, id: &str, session_id: &str) -> Result<Task, ToolError> {
        let task_id: TaskId = id
            .parse()
            .map_err(|_| ToolError::InvalidInput(format!("invalid task id '{id}'")))?;
        let task = self
            .store
            .get_task(task_id)
            .await?
            .ok_or(ToolError::NotFound)?;
        if task.created_by != session_id {
            return Err(ToolError::NotFound);
        }
        Ok(task)
    }

    async fn get_task(&self, params: &Value, session_id: &str) -> Result<Value, ToolError> {
        let params: GetTaskParams = Self::parse(params)?;
        let task = self.owned_task(&params.id, session_id).await?;

        let mut response = json!({
            "success": true,
            "task": task_view(&task),
        });
        if params.include_history.unwrap_or(false) {
            let executions = self.store.list_executions(task.id, HISTORY_LIMIT).await?;
            response["executions"] =
                Value::Array(executions.iter().map(execution_view).collect());
        }
        Ok(response)
    }

    async fn cancel_task(&self, params: &Value, session_id: &str) -> Result<Value, ToolError> {
        let params: TaskIdParams = Self::parse(params)?;
        let task = self.owned_task(&params.id, session_id).await?;

        match task.status {
            TaskStatus::Active | TaskStatus::Paused => {}
            other => {
                return Err(ToolError::IllegalStateTransition(format!(
                    "cannot cancel a {} task",
                    other.as_str()
                )));
            }
        }

        self.store
            .update_status(task.id, TaskStatus::Cancelled)
            .await?;
        info!(task_id = %task.id, "task cancelled");
        Ok(json!({"success": true, "id": task.id.to_string(), "status": "cancelled"}))
    }

    async fn pause_task(&self, params: &Value, session_id: &str) -> Result<Value, ToolError> {
        let params: TaskIdParams = Self::parse(params)?;
        let task = self.owned_task(&params.id, session_id).await?;

        if task.status != TaskStatus::Active {
            return Err(ToolError::IllegalStateTransition(format!(
                "cannot pause a {} task",
                task.status.as_str()
            )));
        }

        self.store.update_status(task.id, TaskStatus::Paused).await?;
        info!(task_id = %task.id, "task paused");
        Ok(json!({"success": true, "id": task.id.to_string(), "status": "paused"}))
    }

    async fn resume_task(&self, params: &Value, session_id: &str) -> Result<Value, ToolError> {
        let params: TaskIdParams = Self::parse(params)?;
        let task = self.owned_task(&params.id, session_id).await?;

        if task.status != TaskStatus::Paused {
            return Err(ToolError::IllegalStateTransition(format!(
                "cannot resume a {} task",
                task.status.as_str()
            )));
        }

        // Recurring tasks get a fresh next_fire_at so a long pause does not
        // unleash a backlog of stale firings. fire_count is untouched.
        let next_fire_at = match task.kind {
            TaskKind::Recurring => {
                let cron = task.cron.as_deref().unwrap_or_default();
                let tz = schedule::parse_timezone(Some(task.timezone.as_str()))?;
                Some(schedule::next_after(cron, tz, Utc::now())?)
            }
            TaskKind::OneShot => None,
        };

        self.store.resume_task(task.id, next_fire_at).await?;
        info!(task_id = %task.id, "task resumed");
        Ok(json!({
            "success": true,
            "id": task.id.to_string(),
            "status": "active",
            "next_fire_at": next_fire_at.map(|t| t.to_rfc3339()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, TaskStore};

    fn tools() -> (Tools, MemoryStore) {
        let store = MemoryStore::new();
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        (Tools::new(shared, Arc::new(Config::default())), store)
    }

    async fn session_task_count(store: &MemoryStore, session: &str) -> i64 {
        store.count_session_tasks(session).await.unwrap()
    }

    #[tokio::test]
    async fn one_shot_to_blocked_ip_is_rejected_without_inserting() {
        let (tools, store) = tools();
        let params = json!({
            "name": "probe",
            "in": "1s",
            "callback": {"type": "webhook", "url": "http://169.254.169.254/"},
        });
        let err = tools
            .execute("schedule_one_shot", &params, "s1")
            .await
            .unwrap_err();
        let message = err.wire_message(false);
        assert!(message.contains("blocked"), "got: {message}");
        assert_eq!(session_task_count(&store, "s1").await, 0);
    }

    #[tokio::test]
    async fn cron_injection_is_rejected_without_inserting() {
        let (tools, store) = tools();
        let params = json!({
            "name": "daily",
            "cron": "0 9 * * *; curl evil",
            "callback": {"type": "store"},
        });
        let err = tools
            .execute("schedule_recurring", &params, "s1")
            .await
            .unwrap_err();
        assert!(err.wire_message(false).contains("invalid characters"));
        assert_eq!(session_task_count(&store, "s1").await, 0);
    }

    #[tokio::test]
    async fn every_minute_cron_is_rejected() {
        let (tools, _store) = tools();
        let params = json!({
            "name": "spam",
            "cron": "* * * * *",
            "callback": {"type": "store"},
        });
        let err = tools
            .execute("schedule_recurring", &params, "s1")
            .await
            .unwrap_err();
        assert!(err.wire_message(false).contains("frequently"));
    }

    #[tokio::test]
    async fn schedule_and_fetch_round_trip() {
        let (tools, _store) = tools();
        let params = json!({
            "name": "reminder",
            "in": "5m",
            "callback": {"type": "store"},
            "payload": {"note": "hello"},
            "tags": ["alpha"],
        });
        let created = tools
            .execute("schedule_one_shot", &params, "s1")
            .await
            .unwrap();
        assert_eq!(created["success"], json!(true));
        let id = created["task"]["id"].as_str().unwrap().to_string();

        let fetched = tools
            .execute("get_task", &json!({"id": id}), "s1")
            .await
            .unwrap();
        assert_eq!(fetched["task"]["name"], json!("reminder"));
        assert_eq!(fetched["task"]["payload"], json!({"note": "hello"}));

        // Other sessions cannot see it.
        let err = tools
            .execute("get_task", &json!({"id": id}), "s2")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::NotFound));
    }

    #[tokio::test]
    async fn recurring_schedule_reports_description_and_preview() {
        let (tools, _store) = tools();
        let params = json!({
            "name": "daily",
            "cron": "0 9 * * *",
            "callback": {"type": "store"},
        });
        let created = tools
            .execute("schedule_recurring", &params, "s1")
            .await
            .unwrap();
        assert_eq!(created["schedule"], json!("At 09:00 every day"));
        assert_eq!(created["upcoming"].as_array().unwrap().len(), 3);
        assert!(created["task"]["next_fire_at"].is_string());
    }

    #[tokio::test]
    async fn disabled_recurring_task_is_inserted_paused() {
        let (tools, _store) = tools();
        let params = json!({
            "name": "later",
            "cron": "0 9 * * *",
            "enabled": false,
            "callback": {"type": "store"},
        });
        let created = tools
            .execute("schedule_recurring", &params, "s1")
            .await
            .unwrap();
        assert_eq!(created["task"]["status"], json!("paused"));
    }

    #[tokio::test]
    async fn lifecycle_transitions_are_guarded() {
        let (tools, _store) = tools();
        let created = tools
            .execute(
                "schedule_one_shot",
                &json!({"name": "t", "in": "1h", "callback": {"type": "store"}}),
                "s1",
            )
            .await
            .unwrap();
        let id = created["task"]["id"].as_str().unwrap().to_string();

        // pause → resume → cancel is legal.
        tools
            .execute("pause_task", &json!({"id": id}), "s1")
            .await
            .unwrap();
        // Pausing twice is not.
        let err = tools
            .execute("pause_task", &json!({"id": id}), "s1")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::IllegalStateTransition(_)));

        tools
            .execute("resume_task", &json!({"id": id}), "s1")
            .await
            .unwrap();
        tools
            .execute("cancel_task", &json!({"id": id}), "s1")
            .await
            .unwrap();

        // Cancelling a cancelled task errors.
        let err = tools
            .execute("cancel_task", &json!({"id": id}), "s1")
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::IllegalStateTransition(_)));
    }

    #[tokio::test]
    async fn resume_recomputes_next_fire_for_recurring() {
        let (tools, store) = tools();
        let created = tools
            .execute(
                "schedule_recurring",
                &json!({"name": "r", "cron": "0 9 * * *", "enabled": false,
                        "callback": {"type": "store"}}),
                "s1",
            )
            .await
            .unwrap();
        let id: TaskId = created["task"]["id"].as_str().unwrap().parse().unwrap();

        // Simulate a stale next_fire_at from before the pause.
        let mut stale = store.get_task(id).await.unwrap().unwrap();
        stale.next_fire_at = Some(Utc::now() - chrono::Duration::days(3));
        store.insert_task(&stale).await.unwrap();

        let resumed = tools
            .execute("resume_task", &json!({"id": id.to_string()}), "s1")
            .await
            .unwrap();
        assert_eq!(resumed["status"], json!("active"));

        let task = store.get_task(id).await.unwrap().unwrap();
        assert!(task.next_fire_at.unwrap() > Utc::now());
        // fire_count untouched by resume.
        assert_eq!(task.fire_count, 0);
    }

    #[tokio::test]
    async fn session_cap_rejects_further_tasks() {
        let store = MemoryStore::new();
        let shared: Arc<dyn Store> = Arc::new(store.clone());
        let config = Config {
            max_active_tasks: 2,
            ..Config::default()
        };
        let tools = Tools::new(shared, Arc::new(config));

        for i in 0..2 {
            tools
                .execute(
                    "schedule_one_shot",
                    &json!({"name": format!("t{i}"), "in": "1h",
                            "callback": {"type": "store"}}),
                    "s1",
                )
                .await
                .unwrap();
        }
        let err = tools
            .execute(
                "schedule_one_shot",
                &json!({"name": "t3", "in": "1h", "callback": {"type": "store"}}),
                "s1",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::TooManyActive(2)));

        // A different session still has budget.
        tools
            .execute(
                "schedule_one_shot",
                &json!({"name": "other", "in": "1h", "callback": {"type": "store"}}),
                "s2",
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn list_defaults_to_active_with_bounded_limit() {
        let (tools, _store) = tools();
        for i in 0..3 {
            tools
                .execute(
                    "schedule_one_shot",
                    &json!({"name": format!("t{i}"), "in": "1h",
                            "callback": {"type": "store"}}),
                    "s1",
                )
                .await
                .unwrap();
        }
        let one = tools
            .execute(
                "schedule_one_shot",
                &json!({"name": "c", "in": "1h", "callback": {"type": "store"}}),
                "s1",
            )
            .await
            .unwrap();
        tools
            .execute(
                "cancel_task",
                &json!({"id": one["task"]["id"]}),
                "s1",
            )
            .await
            .unwrap();

        let listed = tools
            .execute("list_tasks", &json!({}), "s1")
            .await
            .unwrap();
        // Default filter excludes the cancelled task.
        assert_eq!(listed["count"], json!(3));

        let cancelled = tools
            .execute("list_tasks", &json!({"status": "cancelled"}), "s1")
            .await
            .unwrap();
        assert_eq!(cancelled["count"], json!(1));

        // The limit is clamped to 200.
        let capped = tools
            .execute("list_tasks", &json!({"limit": 100000}), "s1")
            .await
            .unwrap();
        assert_eq!(capped["count"], json!(3));
    }

    #[tokio::test]
    async fn unknown_tool_and_callback_kind_are_rejected() {
        let (tools, _store) = tools();
        let err = tools.execute("explode", &json!({}), "s1").await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));

        let err = tools
            .execute(
                "schedule_one_shot",
                &json!({"name": "x", "in": "1s",
                        "callback": {"type": "carrier-pigeon"}}),
                "s1",
            )
            .await
            .unwrap_err();
        assert!(err.wire_message(false).contains("unknown callback kind"));
    }

    #[tokio::test]
    async fn oversized_payload_is_rejected() {
        let store = MemoryStore::new();
        let shared: Arc<dyn Store> = Arc::new(store);
        let config = Config {
            max_payload_size: 64,
            ..Config::default()
        };
        let tools = Tools::new(shared, Arc::new(config));

        let err = tools
            .execute(
                "schedule_one_shot",
                &json!({"name": "big", "in": "1h",
                        "callback": {"type": "store"},
                        "payload": {"blob": "x".repeat(200)}}),
                "s1",
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PayloadTooLarge(_)));
    }
}
