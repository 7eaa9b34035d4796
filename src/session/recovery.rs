use std::sync::Arc;

use teloxide::types::{ChatId, MessageId};
use tracing::info;

use crate::db::database::Database;
use crate::screens;
use crate::session::menu::{MenuError, MenuSynchronizer};
use crate::session::store::{SessionStore, Stage};

pub const REFRESHED_NOTICE: &str = "🔄 The menu was refreshed.";
pub const OBSOLETE_NOTICE: &str = "This menu is out of date. Send /start to open a new one.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryAction {
    /// The tapped message is the recorded menu; the session was rebuilt around it.
    Refreshed { message_id: MessageId },
    /// The tapped message was superseded; nothing was touched.
    Obsolete,
}

impl RecoveryAction {
    pub fn notice(&self) -> &'static str {
        match self {
            RecoveryAction::Refreshed { .. } => REFRESHED_NOTICE,
            RecoveryAction::Obsolete => OBSOLETE_NOTICE,
        }
    }
}

/// Repairs sessions for taps on menus the session no longer knows about,
/// typically after a restart dropped the volatile state.
pub struct StaleRecovery {
    db: Database,
    sessions: SessionStore,
    menu: Arc<MenuSynchronizer>,
}

impl StaleRecovery {
    pub fn new(db: Database, sessions: SessionStore, menu: Arc<MenuSynchronizer>) -> Self {
        Self { db, sessions, menu }
    }

    pub async fn handle_unmatched_interaction(
        &self,
        chat_id: ChatId,
        user_id: i64,
        interacting_message_id: MessageId,
    ) -> Result<RecoveryAction, MenuError> {
        let record = self
            .db
            .get_chat_menu(chat_id.0)
            .await
            .map_err(MenuError::Store)?;

        let recorded = record.as_ref().and_then(|record| record.message_id());
        if recorded != Some(interacting_message_id) {
            info!(
                chat_id = chat_id.0,
                user_id,
                message_id = interacting_message_id.0,
                recorded = recorded.map(|id| id.0),
                "Interaction on an obsolete menu"
            );
            return Ok(RecoveryAction::Obsolete);
        }

        self.sessions.reset(user_id, Stage::Root);
        if let Some(record) = &record {
            self.sessions
                .set_menu(user_id, chat_id, interacting_message_id, &record.screen_code);
        }

        let balance = self
            .db
            .get_balance(user_id)
            .await
            .map_err(MenuError::Store)?;
        let view = screens::main_menu(balance, Some(REFRESHED_NOTICE));
        let rendered = self.menu.render_menu(chat_id, user_id, &view).await?;

        info!(
            chat_id = chat_id.0,
            user_id,
            message_id = rendered.message_id.0,
            created = rendered.created,
            "Recovered desynchronized menu"
        );
        Ok(RecoveryAction::Refreshed {
            message_id: rendered.message_id,
        })
    }
}
