use std::future::Future;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use teloxide::types::Message;
use tracing::info;

/// Times one inbound update from receipt to the last user-visible response.
#[derive(Debug)]
pub struct UpdateTimer {
    event: String,
    chat_id: i64,
    user_id: Option<i64>,
    message_id: Option<i32>,
    started_at: DateTime<Utc>,
    started_perf: Instant,
    status: String,
    detail: Option<String>,
    completed: bool,
}

impl UpdateTimer {
    pub fn new(event: &str, chat_id: i64, user_id: Option<i64>, message_id: Option<i32>) -> Self {
        UpdateTimer {
            event: event.to_string(),
            chat_id,
            user_id,
            message_id,
            started_at: Utc::now(),
            started_perf: Instant::now(),
            status: "success".to_string(),
            detail: None,
            completed: false,
        }
    }

    pub fn from_message(event: &str, message: &Message) -> Self {
        let user_id = message.from.as_ref().and_then(|u| i64::try_from(u.id.0).ok());
        Self::new(event, message.chat.id.0, user_id, Some(message.id.0))
    }

    pub fn log_received(&self) {
        info!(
            target: "bot.timing",
            "event=update_received kind={} chat_id={} user_id={:?} message_id={:?} received_at={}",
            self.event,
            self.chat_id,
            self.user_id,
            self.message_id,
            self.started_at.to_rfc3339()
        );
    }

    pub fn mark_status(&mut self, status: &str, detail: Option<String>) {
        self.status = status.to_string();
        self.detail = detail;
    }

    pub fn log_completed(&mut self) {
        if self.completed {
            return;
        }
        self.completed = true;
        let duration = self.started_perf.elapsed().as_secs_f64();
        info!(
            target: "bot.timing",
            "event=update_completed kind={} chat_id={} user_id={:?} message_id={:?} started_at={} completed_at={} duration_s={:.3} status={} detail={}",
            self.event,
            self.chat_id,
            self.user_id,
            self.message_id,
            self.started_at.to_rfc3339(),
            Utc::now().to_rfc3339(),
            duration,
            self.status,
            self.detail.clone().unwrap_or_default()
        );
    }
}

impl Drop for UpdateTimer {
    fn drop(&mut self) {
        self.log_completed();
    }
}

pub fn start_update_timer(event: &str, message: &Message) -> UpdateTimer {
    let timer = UpdateTimer::from_message(event, message);
    timer.log_received();
    timer
}

/// Logs start and end of a call to an outside service on the `bot.timing` target.
pub async fn log_external_call<T, E, F, Fut>(
    service: &str,
    operation: &str,
    metadata: Option<JsonValue>,
    call: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let started_at = Utc::now();
    let started_perf = Instant::now();
    let metadata_text = metadata
        .as_ref()
        .map(|value| value.to_string())
        .unwrap_or_else(|| "{}".to_string());
    info!(
        target: "bot.timing",
        "event=external_request service={} operation={} started_at={} metadata={}",
        service,
        operation,
        started_at.to_rfc3339(),
        metadata_text
    );

    let result = call().await;
    let status = if result.is_ok() { "success" } else { "error" };

    info!(
        target: "bot.timing",
        "event=external_response service={} operation={} completed_at={} duration_s={:.3} status={} metadata={}",
        service,
        operation,
        Utc::now().to_rfc3339(),
        started_perf.elapsed().as_secs_f64(),
        status,
        metadata_text
    );

    result
}
