//! The single live menu message per chat.
//!
//! The menu id lives in two places: the volatile [`SessionStore`] (fast path)
//! and the durable `chat_menus` row (ground truth). Reads go cache first and
//! backfill from the record; writes go to both after the chat side effect
//! succeeded.
//!
//! Known race: `render_menu` is not atomic across its awaits. Two renders for
//! the same chat that interleave both run to completion and the later write
//! wins. The workflow is paced by one human per chat, so this is accepted.

use std::sync::Arc;

use teloxide::types::{ChatId, InlineKeyboardMarkup, MessageId};
use tracing::{debug, error, info, warn};
use url::Url;

use crate::db::database::Database;
use crate::session::store::SessionStore;
use crate::transport::{delete_quietly, PhotoSource, Transport, TransportError};

#[derive(Debug, Clone)]
pub struct MenuView {
    pub text: String,
    pub keyboard: InlineKeyboardMarkup,
    pub screen_code: &'static str,
    /// New menus are sent as the banner photo with `text` as caption.
    pub show_banner: bool,
    /// Skip the in-place edit and post a fresh menu at the bottom of the chat.
    pub recreate: bool,
}

impl MenuView {
    pub fn new(screen_code: &'static str, text: impl Into<String>, keyboard: InlineKeyboardMarkup) -> Self {
        Self {
            text: text.into(),
            keyboard,
            screen_code,
            show_banner: false,
            recreate: false,
        }
    }

    pub fn with_banner(mut self) -> Self {
        self.show_banner = true;
        self
    }

    pub fn recreated(mut self, recreate: bool) -> Self {
        self.recreate = recreate;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderResult {
    pub message_id: MessageId,
    pub created: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum MenuError {
    #[error("menu could not be rendered: {0}")]
    Transport(#[from] TransportError),
    #[error("menu store failed: {0:#}")]
    Store(anyhow::Error),
}

pub struct MenuSynchronizer {
    db: Database,
    sessions: SessionStore,
    transport: Arc<dyn Transport>,
    banner: Option<Url>,
}

impl MenuSynchronizer {
    pub fn new(
        db: Database,
        sessions: SessionStore,
        transport: Arc<dyn Transport>,
        banner: Option<Url>,
    ) -> Self {
        Self {
            db,
            sessions,
            transport,
            banner,
        }
    }

    pub async fn render_menu(
        &self,
        chat_id: ChatId,
        user_id: i64,
        view: &MenuView,
    ) -> Result<RenderResult, MenuError> {
        let previous = self.current_menu_id(chat_id, user_id).await;

        if let Some(message_id) = previous.filter(|_| !view.recreate) {
            match self.edit_in_place(chat_id, message_id, view).await {
                Ok(()) => {
                    self.commit(chat_id, user_id, message_id, view.screen_code)
                        .await?;
                    return Ok(RenderResult {
                        message_id,
                        created: false,
                    });
                }
                Err(err) if err.is_unknown_outcome() => {
                    // The edit may have landed; a new message now could leave two live menus.
                    warn!(
                        chat_id = chat_id.0,
                        message_id = message_id.0,
                        "Menu edit timed out; keeping the recorded menu"
                    );
                    return Err(MenuError::Transport(err));
                }
                Err(err) => {
                    info!(
                        chat_id = chat_id.0,
                        message_id = message_id.0,
                        kind = err.kind(),
                        "Menu edit failed, posting a new menu: {err}"
                    );
                }
            }
        }

        let message_id = self.create(chat_id, view).await?;
        self.commit(chat_id, user_id, message_id, view.screen_code)
            .await?;

        if let Some(stale) = previous.filter(|stale| *stale != message_id) {
            delete_quietly(self.transport.as_ref(), chat_id, stale, "superseded menu").await;
        }

        Ok(RenderResult {
            message_id,
            created: true,
        })
    }

    /// Session cache first, then the durable record (backfilling the cache).
    async fn current_menu_id(&self, chat_id: ChatId, user_id: i64) -> Option<MessageId> {
        if let Some(message_id) = self.sessions.menu_message_id(user_id, chat_id) {
            return Some(message_id);
        }

        match self.db.get_chat_menu(chat_id.0).await {
            Ok(Some(record)) => {
                let message_id = record.message_id()?;
                debug!(
                    chat_id = chat_id.0,
                    message_id = message_id.0,
                    "Backfilled menu id from chat record"
                );
                self.sessions
                    .set_menu(user_id, chat_id, message_id, &record.screen_code);
                Some(message_id)
            }
            Ok(None) => None,
            Err(err) => {
                warn!(chat_id = chat_id.0, "Failed to read chat menu record: {err:#}");
                None
            }
        }
    }

    async fn edit_in_place(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        view: &MenuView,
    ) -> Result<(), TransportError> {
        let edited = self
            .transport
            .edit_text(chat_id, message_id, &view.text, Some(&view.keyboard))
            .await;
        match edited {
            Ok(()) | Err(TransportError::NotModified) => Ok(()),
            Err(TransportError::NoTextBody) => {
                match self
                    .transport
                    .edit_caption(chat_id, message_id, &view.text, Some(&view.keyboard))
                    .await
                {
                    Ok(()) | Err(TransportError::NotModified) => Ok(()),
                    Err(err) => Err(err),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn create(&self, chat_id: ChatId, view: &MenuView) -> Result<MessageId, TransportError> {
        if view.show_banner {
            if let Some(banner) = &self.banner {
                let sent = self
                    .transport
                    .send_photo(
                        chat_id,
                        PhotoSource::Url(banner.clone()),
                        Some(&view.text),
                        Some(&view.keyboard),
                    )
                    .await;
                match sent {
                    Ok(message_id) => return Ok(message_id),
                    Err(err) if err.is_unknown_outcome() => return Err(err),
                    Err(err) => {
                        warn!(
                            chat_id = chat_id.0,
                            kind = err.kind(),
                            "Banner menu failed, falling back to text: {err}"
                        );
                    }
                }
            }
        }

        self.transport
            .send_text(chat_id, &view.text, Some(&view.keyboard))
            .await
    }

    async fn commit(
        &self,
        chat_id: ChatId,
        user_id: i64,
        message_id: MessageId,
        screen_code: &str,
    ) -> Result<(), MenuError> {
        self.sessions.set_menu(user_id, chat_id, message_id, screen_code);
        self.db
            .save_chat_menu(chat_id.0, user_id, Some(i64::from(message_id.0)), screen_code)
            .await
            .map_err(|err| {
                error!(
                    chat_id = chat_id.0,
                    message_id = message_id.0,
                    "Menu rendered but chat record write failed: {err:#}"
                );
                MenuError::Store(err)
            })
    }
}
