//! Callback dispatchers.
//!
//! One dispatcher per callback kind, all conforming to the same contract:
//! take the task and its callback config, return a [`DispatchResult`].
//! The set is closed; selection is a match on [`CallbackKind`].

pub mod chat;
pub mod email;
pub mod store;
pub mod webhook;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::model::{CallbackKind, Task};
use crate::safety::UrlPolicy;
use crate::store::Store;

/// Outcome of one dispatch attempt.
#[derive(Debug, Clone, Default)]
pub struct DispatchResult {
    pub success: bool,
    pub status_code: Option<i32>,
    pub body: Option<String>,
    pub error: Option<String>,
    pub timed_out: bool,
}

impl DispatchResult {
    pub fn ok(status_code: Option<i32>, body: Option<String>) -> Self {
        Self {
            success: true,
            status_code,
            body,
            ..Default::default()
        }
    }

    pub fn failure(status_code: Option<i32>, body: Option<String>, error: String) -> Self {
        Self {
            success: false,
            status_code,
            body,
            error: Some(error),
            ..Default::default()
        }
    }

    pub fn timeout() -> Self {
        Self {
            success: false,
            error: Some("request timed out".to_string()),
            timed_out: true,
            ..Default::default()
        }
    }
}

/// Maximum stored response-body length.
pub const MAX_STORED_BODY_BYTES: usize = 1000;

/// Truncate a response body to the storage cap, on a char boundary.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_STORED_BODY_BYTES {
        return body.to_string();
    }
    let mut end = MAX_STORED_BODY_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    body[..end].to_string()
}

/// Everything a dispatcher might need, wired once at startup.
#[derive(Clone)]
pub struct CallbackRouter {
    pub store: Arc<dyn Store>,
    pub url_policy: UrlPolicy,
    pub hmac_secret: String,
    pub webhook_timeout: Duration,
}

impl CallbackRouter {
    /// Run the dispatcher selected by the task's callback kind.
    /// `scheduled_for` is the instant the task was due.
    pub async fn dispatch(&self, task: &Task, scheduled_for: DateTime<Utc>) -> DispatchResult {
        match task.callback_kind {
            CallbackKind::Webhook => webhook::dispatch(self, task, scheduled_for).await,
            CallbackKind::Chat => chat::dispatch(self, task).await,
            CallbackKind::Email => email::dispatch(task).await,
            CallbackKind::Store => store::dispatch(self, task, scheduled_for).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_leaves_short_bodies_alone() {
        assert_eq!(truncate_body("short"), "short");
    }

    #[test]
    fn truncate_caps_at_the_storage_limit() {
        let long = "x".repeat(5000);
        assert_eq!(truncate_body(&long).len(), MAX_STORED_BODY_BYTES);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        // 3-byte chars straddle the 1000-byte limit.
        let long = "é".repeat(1000);
        let truncated = truncate_body(&long);
        assert!(truncated.len() <= MAX_STORED_BODY_BYTES);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}
