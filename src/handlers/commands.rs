use anyhow::Result;
use teloxide::prelude::*;
use tracing::{info, warn};

use crate::handlers::workflow;
use crate::state::AppState;
use crate::utils::timing::start_update_timer;

fn sender_id(message: &Message) -> Option<i64> {
    message
        .from
        .as_ref()
        .and_then(|user| i64::try_from(user.id.0).ok())
}

pub async fn start_handler(state: AppState, message: Message) -> Result<()> {
    let Some(user_id) = sender_id(&message) else {
        return Ok(());
    };
    let mut timer = start_update_timer("start", &message);
    let result = workflow::start_session(&state, message.chat.id, user_id).await;
    if let Err(err) = &result {
        timer.mark_status("error", Some(format!("{err:#}")));
    }
    result
}

pub async fn help_handler(state: AppState, message: Message) -> Result<()> {
    let Some(user_id) = sender_id(&message) else {
        return Ok(());
    };
    let _timer = start_update_timer("help", &message);
    workflow::show_help(&state, message.chat.id, user_id).await
}

pub async fn balance_handler(state: AppState, message: Message) -> Result<()> {
    let Some(user_id) = sender_id(&message) else {
        return Ok(());
    };
    let _timer = start_update_timer("balance", &message);
    workflow::show_balance(&state, message.chat.id, user_id).await
}

pub fn parse_grant_args(args: &str) -> Result<(i64, i64), &'static str> {
    let mut parts = args.split_whitespace();
    let (Some(user), Some(credits), None) = (parts.next(), parts.next(), parts.next()) else {
        return Err("Usage: /grant <user_id> <credits>");
    };
    let user_id = user.parse::<i64>().map_err(|_| "Invalid user id.")?;
    let credits = credits.parse::<i64>().map_err(|_| "Invalid credit amount.")?;
    // Negative grants are negated later.
    if credits.checked_neg().is_none() {
        return Err("Invalid credit amount.");
    }
    if credits == 0 {
        return Err("Credits must be non-zero.");
    }
    Ok((user_id, credits))
}

/// `/grant <user_id> <credits>`: manual top-up by an administrator.
/// A negative amount takes credits back, only if the balance covers it.
pub async fn grant_handler(state: AppState, message: Message, args: String) -> Result<()> {
    let Some(admin_id) = sender_id(&message) else {
        return Ok(());
    };
    if !state.settings.is_admin(admin_id) {
        warn!(user_id = admin_id, "Non-admin attempted /grant");
        return Ok(());
    }
    let _timer = start_update_timer("grant", &message);

    let reply = match parse_grant_args(&args) {
        Ok((user_id, credits)) => {
            if credits > 0 {
                state.db.credit(user_id, credits).await?;
            } else if !state.db.debit(user_id, -credits).await? {
                let balance = state.db.get_balance(user_id).await?;
                let reply = format!(
                    "Cannot take {} credits from {user_id}. Balance: {balance}.",
                    -credits
                );
                state.transport.send_text(message.chat.id, &reply, None).await?;
                return Ok(());
            }
            let balance = state.db.get_balance(user_id).await?;
            info!(
                target: "bot.audit",
                "event=credits_granted admin_id={} user_id={} credits={} balance={}",
                admin_id,
                user_id,
                credits,
                balance
            );
            format!("Granted {credits} credits to {user_id}. Balance: {balance}.")
        }
        Err(usage) => usage.to_string(),
    };
    state
        .transport
        .send_text(message.chat.id, &reply, None)
        .await?;
    Ok(())
}
