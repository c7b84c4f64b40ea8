//! Store dispatcher: parks the firing as a StoredNotification for the
//! owning session to pull later.

use chrono::{DateTime, Utc};
use serde_json::json;
use uuid::Uuid;

use super::{CallbackRouter, DispatchResult};
use crate::model::{StoredNotification, Task};

pub async fn dispatch(
    router: &CallbackRouter,
    task: &Task,
    scheduled_for: DateTime<Utc>,
) -> DispatchResult {
    let fired_at = Utc::now();
    let notification = StoredNotification {
        id: Uuid::new_v4(),
        task_id: task.id,
        payload: json!({
            "task_id": task.id.to_string(),
            "task_name": task.name,
            "scheduled_for": scheduled_for.to_rfc3339(),
            "fired_at": fired_at.to_rfc3339(),
            "payload": task.payload,
        }),
        created_at: fired_at,
        read_at: None,
        session_id: task.created_by.clone(),
    };

    match router.store.insert_notification(&notification).await {
        Ok(()) => DispatchResult::ok(None, None),
        Err(e) => DispatchResult::failure(None, None, format!("notification insert: {e}")),
    }
}
