use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use teloxide::types::{ChatId, FileId, MessageId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    Root,
    AwaitingPhoto,
    ChoosingCategory,
    ChoosingStyle,
    Generating,
    Result,
}

#[derive(Debug, Clone, Default)]
pub struct SessionFields {
    /// Cache of the chat's menu record; the durable record wins on disagreement.
    /// Message ids are only meaningful inside `menu_chat_id`.
    pub menu_chat_id: Option<ChatId>,
    pub menu_message_id: Option<MessageId>,
    pub screen_code: Option<String>,
    pub mode: Option<String>,
    pub category: Option<String>,
    pub style: Option<String>,
    pub reference_photo: Option<FileId>,
}

#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub stage: Stage,
    pub fields: SessionFields,
    pub in_flight_start: bool,
}

/// Volatile per-user session state; not persisted across restarts.
///
/// Every method takes the lock for the duration of a synchronous closure only,
/// so no lock is ever held across an await point.
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<Mutex<HashMap<i64, SessionState>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, user_id: i64) -> Option<SessionState> {
        self.sessions.lock().get(&user_id).cloned()
    }

    pub fn stage(&self, user_id: i64) -> Option<Stage> {
        self.sessions.lock().get(&user_id).map(|session| session.stage)
    }

    pub fn update<R>(&self, user_id: i64, apply: impl FnOnce(&mut SessionState) -> R) -> R {
        let mut sessions = self.sessions.lock();
        let session = sessions.entry(user_id).or_default();
        apply(session)
    }

    /// The cached menu id, provided it was rendered in `chat_id`.
    pub fn menu_message_id(&self, user_id: i64, chat_id: ChatId) -> Option<MessageId> {
        self.sessions
            .lock()
            .get(&user_id)
            .filter(|session| session.fields.menu_chat_id == Some(chat_id))
            .and_then(|session| session.fields.menu_message_id)
    }

    pub fn set_menu(&self, user_id: i64, chat_id: ChatId, message_id: MessageId, screen_code: &str) {
        self.update(user_id, |session| {
            session.fields.menu_chat_id = Some(chat_id);
            session.fields.menu_message_id = Some(message_id);
            session.fields.screen_code = Some(screen_code.to_string());
        });
    }

    /// Starts a new logical session at `stage`, keeping only the cached menu location.
    pub fn reset(&self, user_id: i64, stage: Stage) {
        self.update(user_id, |session| {
            let fields = SessionFields {
                menu_chat_id: session.fields.menu_chat_id,
                menu_message_id: session.fields.menu_message_id,
                screen_code: session.fields.screen_code.take(),
                ..SessionFields::default()
            };
            *session = SessionState {
                stage,
                fields,
                in_flight_start: session.in_flight_start,
            };
        });
    }

    /// Claims the start guard; `false` when another start for this user is still running.
    pub fn try_begin_start(&self, user_id: i64) -> bool {
        self.update(user_id, |session| {
            if session.in_flight_start {
                false
            } else {
                session.in_flight_start = true;
                true
            }
        })
    }

    pub fn finish_start(&self, user_id: i64) {
        self.update(user_id, |session| session.in_flight_start = false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_keeps_menu_location_only() {
        let store = SessionStore::new();
        store.set_menu(1, ChatId(1), MessageId(77), "styles");
        store.update(1, |session| {
            session.stage = Stage::ChoosingStyle;
            session.fields.category = Some("art".to_string());
            session.fields.reference_photo = Some(FileId("photo".to_string()));
        });

        store.reset(1, Stage::Root);

        let session = store.snapshot(1).unwrap();
        assert_eq!(session.stage, Stage::Root);
        assert_eq!(session.fields.menu_message_id, Some(MessageId(77)));
        assert_eq!(session.fields.screen_code.as_deref(), Some("styles"));
        assert!(session.fields.category.is_none());
        assert!(session.fields.reference_photo.is_none());
    }

    #[test]
    fn menu_id_is_scoped_to_its_chat() {
        let store = SessionStore::new();
        store.set_menu(1, ChatId(1), MessageId(77), "main");

        assert_eq!(store.menu_message_id(1, ChatId(1)), Some(MessageId(77)));
        assert_eq!(store.menu_message_id(1, ChatId(-100123)), None);

        store.set_menu(1, ChatId(-100123), MessageId(5), "help");
        assert_eq!(store.menu_message_id(1, ChatId(1)), None);
    }

    #[test]
    fn start_guard_rejects_reentry_until_finished() {
        let store = SessionStore::new();
        assert!(store.try_begin_start(1));
        assert!(!store.try_begin_start(1));
        store.reset(1, Stage::Root);
        assert!(!store.try_begin_start(1));
        store.finish_start(1);
        assert!(store.try_begin_start(1));
    }
}
