use serde::{Deserialize, Serialize};

use crate::models::{ChannelType, MessageType};

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateChannelRequest {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub channel_type: ChannelType,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub content: String,
    #[serde(default, rename = "type")]
    pub message_type: MessageType,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct HistoryParams {
    /// Return messages with a sequence strictly greater than this.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TypingRequest {
    pub is_typing: bool,
}

/// Frames a client may push over a channel WebSocket.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ChannelClientFrame {
    Send {
        content: String,
        #[serde(default, rename = "type")]
        message_type: MessageType,
    },
    Typing {
        is_typing: bool,
    },
}
