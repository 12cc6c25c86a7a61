//! Wire protocol for the live connection.
//!
//! Every frame is one JSON text message, adjacently tagged:
//! `{"event": "send-message", "data": {"receiverId": "...", ...}}`.
//! Both directions are closed enums so the router matches them exhaustively and
//! serde enforces the payload shape per event name.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::db::{Message, User};

// --- client -> server ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    UserOnline(UserOnline),
    Typing(Typing),
    StopTyping(StopTyping),
    SendMessage(SendMessage),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOnline {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Typing {
    pub to_user_id: String,
    #[serde(default)]
    pub from_user_id: String,
    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopTyping {
    pub to_user_id: String,
    #[serde(default)]
    pub from_user_id: String,
}

/// Missing fields deserialize as empty strings so they are reported through
/// `message-failed` instead of being rejected as malformed frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    #[serde(default)]
    pub receiver_id: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub correlation_token: String,
}

impl ClientEvent {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UserOnline(_) => "user-online",
            Self::Typing(_) => "typing",
            Self::StopTyping(_) => "stop-typing",
            Self::SendMessage(_) => "send-message",
        }
    }
}

// --- server -> client ---

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    UserTyping(UserTyping),
    UserStopTyping(UserStopTyping),
    NewMessage(NewMessage),
    MessageConfirmed(MessageConfirmed),
    MessageFailed(MessageFailed),
    MessageNotification(MessageNotification),
    PresenceChanged(PresenceChanged),
    PresenceSnapshot(PresenceSnapshot),
    UserOnlineStatus(UserStatus),
    UserOfflineStatus(UserStatus),
    Error(ProtocolError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTyping {
    pub from_user_id: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStopTyping {
    pub from_user_id: String,
}

/// A message pushed to a live connection.
///
/// Instantly relayed copies carry the sender's correlation token and no `id`;
/// they are provisional until the durable record replaces them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_token: Option<String>,
    #[serde(default)]
    pub confirmed: bool,
}

impl NewMessage {
    pub fn provisional(
        sender_id: &str,
        receiver_id: &str,
        content: &str,
        correlation_token: &str,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            sender_id: sender_id.to_string(),
            receiver_id: receiver_id.to_string(),
            content: content.to_string(),
            created_at,
            correlation_token: Some(correlation_token.to_string()),
            confirmed: false,
        }
    }

    pub fn durable(message: &Message) -> Self {
        Self {
            id: Some(message.id.clone()),
            sender_id: message.sender_id.clone(),
            receiver_id: message.receiver_id.clone(),
            content: message.content.clone(),
            created_at: message.created_at,
            correlation_token: None,
            confirmed: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageConfirmed {
    pub correlation_token: String,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFailed {
    pub correlation_token: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageNotification {
    pub message: Message,
    pub from: User,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceChanged {
    pub user_id: String,
    pub online: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub user_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStatus {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolError {
    pub message: String,
}

impl ServerEvent {
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::UserTyping(_) => "user-typing",
            Self::UserStopTyping(_) => "user-stop-typing",
            Self::NewMessage(_) => "new-message",
            Self::MessageConfirmed(_) => "message-confirmed",
            Self::MessageFailed(_) => "message-failed",
            Self::MessageNotification(_) => "message-notification",
            Self::PresenceChanged(_) => "presence-changed",
            Self::PresenceSnapshot(_) => "presence-snapshot",
            Self::UserOnlineStatus(_) => "user-online-status",
            Self::UserOfflineStatus(_) => "user-offline-status",
            Self::Error(_) => "error",
        }
    }
}
