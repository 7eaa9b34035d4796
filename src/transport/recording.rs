use std::collections::VecDeque;

use async_trait::async_trait;
use parking_lot::Mutex;
use teloxide::types::{ChatId, FileId, InlineKeyboardMarkup, MessageId};

use super::{PhotoSource, Transport, TransportError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    SendText { chat_id: i64, message_id: Option<i32>, text: String },
    SendPhoto { chat_id: i64, message_id: Option<i32>, source: &'static str },
    EditText { chat_id: i64, message_id: i32, text: String },
    EditCaption { chat_id: i64, message_id: i32, caption: String },
    Delete { chat_id: i64, message_id: i32 },
}

/// In-memory transport that records every call and answers from scripted queues.
/// Unscripted calls succeed; new messages get sequential ids.
pub struct RecordingTransport {
    next_message_id: Mutex<i32>,
    calls: Mutex<Vec<Call>>,
    edit_text_results: Mutex<VecDeque<Result<(), TransportError>>>,
    edit_caption_results: Mutex<VecDeque<Result<(), TransportError>>>,
    send_text_results: Mutex<VecDeque<Result<(), TransportError>>>,
    send_photo_results: Mutex<VecDeque<Result<(), TransportError>>>,
    delete_results: Mutex<VecDeque<Result<(), TransportError>>>,
}

impl RecordingTransport {
    pub fn new(first_message_id: i32) -> Self {
        Self {
            next_message_id: Mutex::new(first_message_id),
            calls: Mutex::new(Vec::new()),
            edit_text_results: Mutex::new(VecDeque::new()),
            edit_caption_results: Mutex::new(VecDeque::new()),
            send_text_results: Mutex::new(VecDeque::new()),
            send_photo_results: Mutex::new(VecDeque::new()),
            delete_results: Mutex::new(VecDeque::new()),
        }
    }

    pub fn script_edit_text(&self, result: Result<(), TransportError>) {
        self.edit_text_results.lock().push_back(result);
    }

    pub fn script_edit_caption(&self, result: Result<(), TransportError>) {
        self.edit_caption_results.lock().push_back(result);
    }

    pub fn script_send_text(&self, result: Result<(), TransportError>) {
        self.send_text_results.lock().push_back(result);
    }

    pub fn script_send_photo(&self, result: Result<(), TransportError>) {
        self.send_photo_results.lock().push_back(result);
    }

    pub fn script_delete(&self, result: Result<(), TransportError>) {
        self.delete_results.lock().push_back(result);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    pub fn sent_photos(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, Call::SendPhoto { message_id: Some(_), .. }))
            .collect()
    }

    pub fn created_messages(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| {
                matches!(
                    call,
                    Call::SendText { message_id: Some(_), .. }
                        | Call::SendPhoto { message_id: Some(_), .. }
                )
            })
            .count()
    }

    pub fn edited_ids(&self) -> Vec<i32> {
        self.calls()
            .iter()
            .filter_map(|call| match call {
                Call::EditText { message_id, .. } | Call::EditCaption { message_id, .. } => {
                    Some(*message_id)
                }
                _ => None,
            })
            .collect()
    }

    pub fn deleted_ids(&self) -> Vec<i32> {
        self.calls()
            .iter()
            .filter_map(|call| match call {
                Call::Delete { message_id, .. } => Some(*message_id),
                _ => None,
            })
            .collect()
    }

    fn allocate_id(&self) -> MessageId {
        let mut next = self.next_message_id.lock();
        let id = *next;
        *next += 1;
        MessageId(id)
    }

    fn pop(queue: &Mutex<VecDeque<Result<(), TransportError>>>) -> Result<(), TransportError> {
        queue.lock().pop_front().unwrap_or(Ok(()))
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        _keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<MessageId, TransportError> {
        let result = Self::pop(&self.send_text_results).map(|_| self.allocate_id());
        self.calls.lock().push(Call::SendText {
            chat_id: chat_id.0,
            message_id: result.as_ref().ok().map(|id| id.0),
            text: text.to_string(),
        });
        result
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        photo: PhotoSource,
        _caption: Option<&str>,
        _keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<MessageId, TransportError> {
        let result = Self::pop(&self.send_photo_results).map(|_| self.allocate_id());
        self.calls.lock().push(Call::SendPhoto {
            chat_id: chat_id.0,
            message_id: result.as_ref().ok().map(|id| id.0),
            source: photo.kind(),
        });
        result
    }

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        _keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TransportError> {
        self.calls.lock().push(Call::EditText {
            chat_id: chat_id.0,
            message_id: message_id.0,
            text: text.to_string(),
        });
        Self::pop(&self.edit_text_results)
    }

    async fn edit_caption(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        caption: &str,
        _keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TransportError> {
        self.calls.lock().push(Call::EditCaption {
            chat_id: chat_id.0,
            message_id: message_id.0,
            caption: caption.to_string(),
        });
        Self::pop(&self.edit_caption_results)
    }

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), TransportError> {
        self.calls.lock().push(Call::Delete {
            chat_id: chat_id.0,
            message_id: message_id.0,
        });
        Self::pop(&self.delete_results)
    }

    async fn file_url(&self, file_id: &FileId) -> Result<String, TransportError> {
        Ok(format!("https://files.test/{}", file_id.0))
    }
}
