use std::error::Error;

use dotenvy::dotenv;
use teloxide::dispatching::UpdateFilterExt;
use teloxide::prelude::*;
use teloxide::utils::command::BotCommands;
use tracing::{error, info, warn};

mod billing;
mod config;
mod db;
mod generation;
mod handlers;
mod media;
mod screens;
mod session;
mod state;
mod transport;
mod utils;

use config::CONFIG;
use db::database::Database;
use handlers::{callbacks, commands, photos};
use state::AppState;
use utils::logging::init_logging;

#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase")]
enum Command {
    Start,
    Help,
    Balance,
    Grant(String),
}

type HandlerResult = Result<(), Box<dyn Error + Send + Sync>>;

#[tokio::main]
async fn main() -> HandlerResult {
    dotenv().ok();
    let _guards = init_logging();

    let bot = Bot::new(CONFIG.bot_token.clone());
    info!("Starting photo style menu bot");

    let db = Database::init(&CONFIG.database_url).await?;
    db.health_check().await?;
    let state = AppState::new(db, bot.clone());

    match state.transactions.reconcile_interrupted().await {
        Ok(summary) if summary.refunded + summary.settled + summary.failed > 0 => info!(
            "Reconciled interrupted generations: refunded={} settled={} failed={}",
            summary.refunded, summary.settled, summary.failed
        ),
        Ok(_) => {}
        Err(err) => warn!("Could not reconcile interrupted generations: {err:#}"),
    }

    let command_handler = dptree::entry()
        .filter_command::<Command>()
        .endpoint(handle_command);

    // Menus are per chat and per user; only private chats have exactly one of each.
    let message_handler = Update::filter_message()
        .filter(|msg: Message| msg.chat.is_private())
        .branch(command_handler)
        .branch(dptree::filter(|msg: Message| msg.photo().is_some()).endpoint(handle_photo))
        .endpoint(ignore_message);

    let callback_handler = Update::filter_callback_query()
        .filter(|query: CallbackQuery| {
            query
                .message
                .as_ref()
                .is_some_and(|message| message.chat().is_private())
        })
        .endpoint(handle_callback_query);

    let handler = dptree::entry()
        .branch(message_handler)
        .branch(callback_handler);

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![state])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    Ok(())
}

async fn handle_command(state: AppState, message: Message, command: Command) -> HandlerResult {
    let result = match command {
        Command::Start => commands::start_handler(state, message).await,
        Command::Help => commands::help_handler(state, message).await,
        Command::Balance => commands::balance_handler(state, message).await,
        Command::Grant(args) => commands::grant_handler(state, message, args).await,
    };
    if let Err(err) = result {
        error!("command handler failed: {err:#}");
    }
    Ok(())
}

async fn handle_photo(state: AppState, message: Message) -> HandlerResult {
    // The dispatcher serializes updates per chat; album members must not wait for each other.
    tokio::spawn(async move {
        if let Err(err) = photos::photo_handler(state, message).await {
            error!("photo handler failed: {err:#}");
        }
    });
    Ok(())
}

async fn handle_callback_query(bot: Bot, state: AppState, query: CallbackQuery) -> HandlerResult {
    tokio::spawn(async move {
        if let Err(err) = callbacks::menu_callback(bot, state, query).await {
            error!("callback handler failed: {err:#}");
        }
    });
    Ok(())
}

async fn ignore_message() -> HandlerResult {
    Ok(())
}
