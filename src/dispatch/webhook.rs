//! Webhook dispatcher: signed envelope POSTed through the safety layer.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::{CallbackRouter, DispatchResult, truncate_body};
use crate::model::Task;
use crate::safety::{SafetyError, secure_http_send, signing};

/// Name stamped into the envelope `source` field.
const ENVELOPE_SOURCE: &str = "temporal-agent-mcp";
const ENVELOPE_VERSION: &str = "1.0";

const USER_AGENT: &str = concat!("tempo/", env!("CARGO_PKG_VERSION"));

/// The canonical signed envelope. The HMAC covers the literal bytes
/// `<timestamp>.<body>` where `timestamp` is the same instant stamped into
/// `fired_at` and the `X-Timestamp` header.
#[derive(Debug, Serialize)]
struct Envelope<'a> {
    task_id: String,
    task_name: &'a str,
    task_kind: &'a str,
    scheduled_for: String,
    fired_at: String,
    fire_index: i64,
    payload: &'a serde_json::Value,
    source: &'a str,
    version: &'a str,
}

pub async fn dispatch(
    router: &CallbackRouter,
    task: &Task,
    scheduled_for: DateTime<Utc>,
) -> DispatchResult {
    let Some(url) = task.callback_config.get("url") else {
        return DispatchResult::failure(None, None, "webhook config missing 'url'".to_string());
    };

    let fired_at = Utc::now();
    let timestamp = fired_at.to_rfc3339();

    let envelope = Envelope {
        task_id: task.id.to_string(),
        task_name: &task.name,
        task_kind: task.kind.as_str(),
        scheduled_for: scheduled_for.to_rfc3339(),
        fired_at: timestamp.clone(),
        fire_index: task.fire_count,
        payload: &task.payload,
        source: ENVELOPE_SOURCE,
        version: ENVELOPE_VERSION,
    };

    let body = match serde_json::to_string(&envelope) {
        Ok(body) => body,
        Err(e) => return DispatchResult::failure(None, None, format!("envelope encoding: {e}")),
    };

    let signature = signing::sign(&router.hmac_secret, body.as_bytes(), &timestamp);

    let headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        ("User-Agent".to_string(), USER_AGENT.to_string()),
        ("X-Signature".to_string(), signature),
        ("X-Task-Id".to_string(), task.id.to_string()),
        ("X-Timestamp".to_string(), timestamp),
    ];

    debug!(task_id = %task.id, url, "sending webhook");

    match secure_http_send(
        url,
        reqwest::Method::POST,
        &headers,
        Some(body),
        router.webhook_timeout,
        &router.url_policy,
    )
    .await
    {
        Ok(response) => {
            let stored_body = Some(truncate_body(&response.body));
            let code = Some(response.status as i32);
            if (200..300).contains(&response.status) {
                DispatchResult::ok(code, stored_body)
            } else {
                DispatchResult::failure(
                    code,
                    stored_body,
                    format!("webhook returned status {}", response.status),
                )
            }
        }
        Err(SafetyError::Timeout) => DispatchResult::timeout(),
        Err(err) => DispatchResult::failure(None, None, err.to_string()),
    }
}
