use std::future::Future;
use std::time::Duration;

use anyhow::Result;
use teloxide::prelude::*;
use tracing::{debug, warn};

use crate::config::CONFIG;
use crate::handlers::workflow::{self, CallbackRoute};
use crate::screens::MenuAction;
use crate::state::AppState;
use crate::utils::timing::UpdateTimer;

const UNKNOWN_ACTION: &str = "This button is no longer available.";

async fn answer(bot: &Bot, query: &CallbackQuery, text: Option<&str>) {
    let mut request = bot.answer_callback_query(query.id.clone());
    if let Some(text) = text {
        request = request.text(text.to_string());
    }
    answer_within(CONFIG.telegram_request_timeout(), request.send()).await;
}

/// Best-effort answer bounded like every other outbound call; `true` when it landed.
async fn answer_within<T, E, F>(deadline: Duration, call: F) -> bool
where
    E: std::fmt::Display,
    F: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(deadline, call).await {
        Ok(Ok(_)) => true,
        Ok(Err(err)) => {
            debug!("Failed to answer callback query: {err}");
            false
        }
        Err(_) => {
            debug!("Answering callback query timed out after {deadline:?}");
            false
        }
    }
}

pub async fn menu_callback(bot: Bot, state: AppState, query: CallbackQuery) -> Result<()> {
    let Some(message) = query.message.as_ref() else {
        answer(&bot, &query, None).await;
        return Ok(());
    };
    let chat_id = message.chat().id;
    let message_id = message.id();
    let Ok(user_id) = i64::try_from(query.from.id.0) else {
        answer(&bot, &query, None).await;
        return Ok(());
    };
    let mut timer = UpdateTimer::new("callback", chat_id.0, Some(user_id), Some(message_id.0));
    timer.log_received();

    if workflow::classify_callback(&state, chat_id, user_id, message_id) == CallbackRoute::Unmatched {
        let notice = match workflow::recover_interaction(&state, chat_id, user_id, message_id).await {
            Ok(notice) => notice,
            Err(err) => {
                warn!(user_id, "Menu recovery failed: {err:#}");
                timer.mark_status("error", Some(format!("{err:#}")));
                crate::session::recovery::OBSOLETE_NOTICE
            }
        };
        answer(&bot, &query, Some(notice)).await;
        return Ok(());
    }

    let Some(action) = query.data.as_deref().and_then(MenuAction::parse) else {
        answer(&bot, &query, Some(UNKNOWN_ACTION)).await;
        return Ok(());
    };
    // Answer first: generation can outlive the callback's answer window.
    answer(&bot, &query, None).await;

    let result = workflow::handle_menu_action(&state, chat_id, user_id, action).await;
    if let Err(err) = &result {
        timer.mark_status("error", Some(format!("{err:#}")));
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn stalled_answer_gives_up_at_the_deadline() {
        let stalled = std::future::pending::<Result<(), String>>();
        assert!(!answer_within(Duration::from_secs(20), stalled).await);
    }

    #[tokio::test]
    async fn answer_outcome_is_reported() {
        assert!(answer_within(Duration::from_secs(1), async { Ok::<_, String>(()) }).await);
        assert!(!answer_within(Duration::from_secs(1), async { Err::<(), _>("query is too old") }).await);
    }
}
