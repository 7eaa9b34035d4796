use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use teloxide::types::MessageId;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ChatMenuRecord {
    pub chat_id: i64,
    pub user_id: i64,
    pub menu_message_id: Option<i64>,
    pub screen_code: String,
    pub updated_at: DateTime<Utc>,
}

impl ChatMenuRecord {
    pub fn message_id(&self) -> Option<MessageId> {
        self.menu_message_id
            .and_then(|id| i32::try_from(id).ok())
            .map(MessageId)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptStatus {
    Pending,
    Succeeded,
    Failed,
}

impl AttemptStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            AttemptStatus::Pending => "pending",
            AttemptStatus::Succeeded => "succeeded",
            AttemptStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FundsState {
    Debited,
    Refunded,
    Settled,
    Exempt,
}

impl FundsState {
    pub fn as_str(self) -> &'static str {
        match self {
            FundsState::Debited => "debited",
            FundsState::Refunded => "refunded",
            FundsState::Settled => "settled",
            FundsState::Exempt => "exempt",
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GenerationAttemptRow {
    pub correlation_id: String,
    pub user_id: i64,
    pub chat_id: i64,
    pub cost: i64,
    pub exempt: bool,
    pub status: String,
    pub funds_state: String,
    pub style_code: Option<String>,
    pub artifact_ref: Option<String>,
    pub error: Option<String>,
    pub delivered_message_id: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AttemptInsert {
    pub correlation_id: String,
    pub user_id: i64,
    pub chat_id: i64,
    pub cost: i64,
    pub exempt: bool,
    pub style_code: Option<String>,
}
