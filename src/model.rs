//! Core data model: tasks, executions, stored notifications.
//!
//! These are the persistence-facing types shared by the store backends, the
//! scheduler worker and the tool surface. Backends convert their own row
//! structs into these models; nothing here depends on a database driver.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// ============================================================================
// Id Newtypes
// ============================================================================

/// Unique identifier for a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Unique identifier for one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ExecutionId(pub Uuid);

impl ExecutionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Status Enums
// ============================================================================

/// One-shot tasks fire once at `fire_at`; recurring tasks follow a cron
/// expression and carry a rolling `next_fire_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    OneShot,
    Recurring,
}

impl TaskKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OneShot => "one_shot",
            Self::Recurring => "recurring",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "one_shot" => Some(Self::OneShot),
            "recurring" => Some(Self::Recurring),
            _ => None,
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Active,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Which dispatcher handles the task when it fires. The set is closed; new
/// callback kinds mean a new dispatcher implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackKind {
    Webhook,
    Chat,
    Email,
    Store,
}

impl CallbackKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Chat => "chat",
            Self::Email => "email",
            Self::Store => "store",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "webhook" => Some(Self::Webhook),
            "chat" => Some(Self::Chat),
            "email" => Some(Self::Email),
            "store" => Some(Self::Store),
            _ => None,
        }
    }
}

/// Terminal and in-flight states of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Success,
    Failed,
    Timeout,
    Skipped,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Failed => "failed",
            Self::Timeout => "timeout",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "success" => Some(Self::Success),
            "failed" => Some(Self::Failed),
            "timeout" => Some(Self::Timeout),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }
}

// ============================================================================
// Model Structs
// ============================================================================

/// Kind-specific callback settings (webhook url, chat webhook, email
/// address, ...). Opaque string mapping; each dispatcher reads its own keys.
pub type CallbackConfig = HashMap<String, String>;

/// A durable scheduled unit.
///
/// Invariants enforced by the tool surface and the worker:
/// - `kind == OneShot` implies `fire_at` is set and `cron` is empty.
/// - `kind == Recurring` implies `cron` and `next_fire_at` are set.
/// - a task is eligible for lease exactly when `status == Active` and
///   `locked_at` is empty.
/// - `fire_count` never decreases.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub description: Option<String>,
    pub kind: TaskKind,

    /// One-shot: the single fire instant.
    pub fire_at: Option<DateTime<Utc>>,
    /// Recurring: 5-field cron expression.
    pub cron: Option<String>,
    /// IANA timezone the cron expression is evaluated in.
    pub timezone: String,
    /// Recurring: next scheduled fire instant.
    pub next_fire_at: Option<DateTime<Utc>>,

    pub callback_kind: CallbackKind,
    pub callback_config: CallbackConfig,
    pub payload: Value,

    pub status: TaskStatus,

    pub max_retries: i32,
    pub retry_delay_seconds: i64,
    pub current_retry_count: i32,

    pub last_fired_at: Option<DateTime<Utc>>,
    pub fire_count: i64,

    pub created_by: String,
    pub tags: Vec<String>,

    /// Lease held by a worker while dispatching; both fields set together.
    pub locked_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// The instant the due-task ordering sorts on.
    pub fn due_at(&self) -> Option<DateTime<Utc>> {
        self.next_fire_at.or(self.fire_at)
    }
}

/// Immutable record of one dispatch attempt. Created in `Running` when the
/// worker begins a dispatch and transitioned once to a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: ExecutionId,
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: ExecutionStatus,
    pub response_code: Option<i32>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,
    pub retry_number: i32,
    pub request_url: Option<String>,
    pub request_payload: Option<Value>,
}

/// Payload parked for a `store` callback until the owning session pulls it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredNotification {
    pub id: Uuid,
    pub task_id: TaskId,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub session_id: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            TaskStatus::Active,
            TaskStatus::Paused,
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            assert_eq!(TaskStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(TaskStatus::parse("running"), None);
    }

    #[test]
    fn callback_kind_rejects_unknown() {
        assert_eq!(CallbackKind::parse("webhook"), Some(CallbackKind::Webhook));
        assert_eq!(CallbackKind::parse("carrier-pigeon"), None);
    }

    #[test]
    fn due_at_prefers_next_fire_at() {
        let now = Utc::now();
        let later = now + chrono::Duration::hours(1);
        let mut task = sample_task();
        task.fire_at = Some(now);
        task.next_fire_at = Some(later);
        assert_eq!(task.due_at(), Some(later));

        task.next_fire_at = None;
        assert_eq!(task.due_at(), Some(now));
    }

    fn sample_task() -> Task {
        let now = Utc::now();
        Task {
            id: TaskId::new(),
            name: "sample".to_string(),
            description: None,
            kind: TaskKind::OneShot,
            fire_at: Some(now),
            cron: None,
            timezone: "UTC".to_string(),
            next_fire_at: None,
            callback_kind: CallbackKind::Store,
            callback_config: CallbackConfig::new(),
            payload: serde_json::json!({}),
            status: TaskStatus::Active,
            max_retries: 3,
            retry_delay_seconds: 60,
            current_retry_count: 0,
            last_fired_at: None,
            fire_count: 0,
            created_by: "anonymous".to_string(),
            tags: Vec::new(),
            locked_at: None,
            locked_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}
