use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{FileId, InlineKeyboardMarkup, InputFile, MessageId, ParseMode};
use teloxide::{ApiError, RequestError};
use tracing::{debug, warn};

use super::{PhotoSource, Transport, TransportError};

#[derive(Clone)]
pub struct TelegramTransport {
    bot: Bot,
    bot_token: String,
    request_timeout: Duration,
}

impl TelegramTransport {
    pub fn new(bot: Bot, bot_token: String, request_timeout: Duration) -> Self {
        Self {
            bot,
            bot_token,
            request_timeout,
        }
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> Result<T, TransportError>
    where
        F: Future<Output = Result<T, RequestError>>,
    {
        match tokio::time::timeout(self.request_timeout, call).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(classify_request_error(&err)),
            Err(_) => {
                warn!(
                    "{operation} did not finish within {:?}; outcome unknown",
                    self.request_timeout
                );
                Err(TransportError::Timeout(self.request_timeout))
            }
        }
    }
}

fn classify_request_error(err: &RequestError) -> TransportError {
    match err {
        RequestError::Api(api_error) => classify_api_error(api_error),
        other => TransportError::Other(other.to_string()),
    }
}

fn classify_api_error(err: &ApiError) -> TransportError {
    match err {
        ApiError::MessageNotModified => TransportError::NotModified,
        ApiError::MessageToEditNotFound
        | ApiError::MessageCantBeEdited
        | ApiError::MessageToDeleteNotFound
        | ApiError::MessageCantBeDeleted => TransportError::NotFound,
        ApiError::Unknown(description) => classify_description(description),
        other => classify_description(&other.to_string()),
    }
}

fn classify_description(description: &str) -> TransportError {
    let lowered = description.to_lowercase();
    if lowered.contains("message is not modified") {
        TransportError::NotModified
    } else if lowered.contains("no text in the message") {
        TransportError::NoTextBody
    } else if lowered.contains("message to edit not found")
        || lowered.contains("message can't be edited")
        || lowered.contains("message to delete not found")
        || lowered.contains("message can't be deleted")
        || lowered.contains("message_id_invalid")
    {
        TransportError::NotFound
    } else {
        TransportError::Other(description.to_string())
    }
}

#[async_trait]
impl Transport for TelegramTransport {
    async fn send_text(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<MessageId, TransportError> {
        let mut request = self
            .bot
            .send_message(chat_id, text.to_string())
            .parse_mode(ParseMode::Html);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(keyboard.clone());
        }
        let message = self.bounded("send_message", request.send()).await?;
        Ok(message.id)
    }

    async fn send_photo(
        &self,
        chat_id: ChatId,
        photo: PhotoSource,
        caption: Option<&str>,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<MessageId, TransportError> {
        debug!(chat_id = chat_id.0, source = photo.kind(), "Sending photo");
        let input = match photo {
            PhotoSource::Url(url) => InputFile::url(url),
            PhotoSource::Bytes { data, file_name } => InputFile::memory(data).file_name(file_name),
        };
        let mut request = self.bot.send_photo(chat_id, input);
        if let Some(caption) = caption {
            request = request
                .caption(caption.to_string())
                .parse_mode(ParseMode::Html);
        }
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(keyboard.clone());
        }
        let message = self.bounded("send_photo", request.send()).await?;
        Ok(message.id)
    }

    async fn edit_text(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        text: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TransportError> {
        let mut request = self
            .bot
            .edit_message_text(chat_id, message_id, text.to_string())
            .parse_mode(ParseMode::Html);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(keyboard.clone());
        }
        self.bounded("edit_message_text", request.send()).await?;
        Ok(())
    }

    async fn edit_caption(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        caption: &str,
        keyboard: Option<&InlineKeyboardMarkup>,
    ) -> Result<(), TransportError> {
        let mut request = self
            .bot
            .edit_message_caption(chat_id, message_id)
            .caption(caption.to_string())
            .parse_mode(ParseMode::Html);
        if let Some(keyboard) = keyboard {
            request = request.reply_markup(keyboard.clone());
        }
        self.bounded("edit_message_caption", request.send()).await?;
        Ok(())
    }

    async fn delete(&self, chat_id: ChatId, message_id: MessageId) -> Result<(), TransportError> {
        self.bounded(
            "delete_message",
            self.bot.delete_message(chat_id, message_id).send(),
        )
        .await?;
        Ok(())
    }

    async fn file_url(&self, file_id: &FileId) -> Result<String, TransportError> {
        let file = self
            .bounded("get_file", self.bot.get_file(file_id.clone()).send())
            .await?;
        Ok(format!(
            "https://api.telegram.org/file/bot{}/{}",
            self.bot_token, file.path
        ))
    }
}
