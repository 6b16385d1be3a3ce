use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "channel_type", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum ChannelType {
    Public,
    Private,
}

impl Default for ChannelType {
    fn default() -> Self {
        Self::Public
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Channel {
    pub id: Uuid,
    pub workspace_id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "type"))]
    #[serde(rename = "type")]
    pub channel_type: ChannelType,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl Channel {
    /// Private channels are only visible to the user that created them.
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        match self.channel_type {
            ChannelType::Public => true,
            ChannelType::Private => self.created_by == user_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(type_name = "message_type", rename_all = "lowercase"))]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Text,
    Image,
    System,
}

impl Default for MessageType {
    fn default() -> Self {
        Self::Text
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "sqlx", derive(sqlx::FromRow))]
pub struct Message {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    #[cfg_attr(feature = "sqlx", sqlx(rename = "type"))]
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
    /// Position in the channel; strictly increasing from 1.
    pub sequence: i64,
}

/// Message fields supplied by the sender; the store assigns id and sequence.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub channel_id: Uuid,
    pub sender_id: Uuid,
    pub content: String,
    pub message_type: MessageType,
    pub timestamp: DateTime<Utc>,
}

/// Event delivered to live subscribers of a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChannelEvent {
    Message(Message),
    Typing {
        channel_id: Uuid,
        user_id: Uuid,
        is_typing: bool,
    },
    /// The subscriber fell behind and dropped `missed` events; it should
    /// resync from the last sequence it saw.
    Lagged { missed: u64 },
}
