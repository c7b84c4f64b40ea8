//! Chat dispatcher: posts a channel message to a provider incoming webhook.
//!
//! The webhook URL is treated opaquely (Slack-compatible `{"text": ...}`
//! contract); the safety layer still validates and pins it.

use serde_json::json;

use super::{CallbackRouter, DispatchResult, truncate_body};
use crate::model::Task;
use crate::safety::{SafetyError, secure_http_send};

pub async fn dispatch(router: &CallbackRouter, task: &Task) -> DispatchResult {
    let Some(url) = task.callback_config.get("webhook_url") else {
        return DispatchResult::failure(
            None,
            None,
            "chat config missing 'webhook_url'".to_string(),
        );
    };

    let text = match task.callback_config.get("message") {
        Some(message) => format!("⏰ {}: {}", task.name, message),
        None => format!(
            "⏰ {} fired\n```{}```",
            task.name,
            serde_json::to_string_pretty(&task.payload).unwrap_or_default()
        ),
    };

    let body = json!({ "text": text }).to_string();
    let headers = vec![("Content-Type".to_string(), "application/json".to_string())];

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
            let code = Some(response.status as i32);
            let stored = Some(truncate_body(&response.body));
            if (200..300).contains(&response.status) {
                DispatchResult::ok(code, stored)
            } else {
                DispatchResult::failure(
                    code,
                    stored,
                    format!("chat webhook returned status {}", response.status),
                )
            }
        }
        Err(SafetyError::Timeout) => DispatchResult::timeout(),
        Err(err) => DispatchResult::failure(None, None, err.to_string()),
    }
}
