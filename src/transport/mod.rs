//! Outbound chat operations the session core depends on.
//!
//! The core only needs five calls and a small error taxonomy; everything else
//! about the Telegram API stays inside [`telegram::TelegramTransport`].

use std::time::Duration;

use async_trait::async_trait;
use teloxide::types::{ChatId, FileId, InlineKeyboardMarkup, MessageId};
use tracing::{debug, warn};
use url::Url;

pub mod telegram;

#[cfg(test)]
pub mod recording;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("message is not modified")]
    NotModified,
    #[error("message has no text body to edit")]
    NoTextBody,
    #[error("message not found or can no longer be edited")]
    NotFound,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport error: {0}")]
    Other(String),
}

impl TransportError {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::NotModified => "not_modified",
            TransportError::NoTextBody => "no_text_body",
            TransportError::NotFound => "not_found",
            TransportError::Timeout(_) => "timeout",
            TransportError::Other(_) => "other",
        }
    }

    /// A timed-out call may or may not have reached the chat.
    pub fn is_unknown_outcome(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoSource {
    Url(Url),
    Bytes { data: Vec<u8>, file_name: String },
}

impl PhotoSource {
    pub fn kind(&self) -> &'static str {
        match self {
            PhotoSource::Url(_) => "url",
            PhotoSource::Bytes { .. } => "bytes",
        }
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<MessageId, TransportError>;

    async fn send_photo(
        &self,
        chat_id: ChatId,
        photo: PhotoSource,
        caption: Option<&str>,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<MessageId, TransportError>;

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TransportError>;

    async fn edit_caption(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        caption: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TransportError>;

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), TransportError>;

    /// Download URL for a file the user sent. It embeds the bot token, so it stays in-process.
    async fn file_url(&self, file_id: &FileId) -> Result<String, TransportError>;
}

/// Deletes a message where failure is acceptable; the failure is classified and logged.
pub async fn delete_quietly(
    transport: &dyn Transport,
    chat_id: ChatId,
    message_id: MessageId,
    reason: &str,
) -> bool {
    match transport.delete(chat_id, message_id).await {
        Ok(()) => {
            debug!(
                chat_id = chat_id.0,
                message_id = message_id.0,
                "Deleted message ({reason})"
            );
            true
        }
        Err(err) => {
            warn!(
                chat_id = chat_id.0,
                message_id = message_id.0,
                kind = err.kind(),
                "Could not delete message ({reason}): {err}"
            );
            false
        }
    }
}
