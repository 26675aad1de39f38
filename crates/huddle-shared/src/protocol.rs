//! Realtime wire protocol.
//!
//! Every WebSocket text frame carries one JSON object of the form
//! `{"event": <name>, "data": <args>}`. Events with several arguments carry
//! them as a JSON array in order, e.g. `join(chatId, user)` becomes
//! `{"event":"join","data":["r1",{"id":"u1","username":"alice"}]}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::MAX_MESSAGE_SIZE;
use crate::error::ValidationError;
use crate::types::{validate_emoji, ChatId, ChatUser, MessageId, ReactionId};

/// Events sent by clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    Join(ChatId, ChatUser),
    Leave(ChatId, ChatUser),
    Typing(ChatId, ChatUser),
    Message(NewMessage),
    Reaction(ReactionRequest),
    EditMessage(EditRequest),
    DeleteMessage(MessageId),
    UndoDeleteMessage(MessageId),
}

/// Events sent by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    Presence(Vec<ChatUser>),
    UserJoined(ChatUser),
    UserLeft(ChatUser),
    Typing(ChatUser),
    Message(ChatMessage),
    Reaction(ReactionEvent),
    MessageEdited(MessageEdited),
    MessagePendingDeletion(MessageId),
    MessageUndoDelete(MessageId),
    MessageRemoved(MessageId),
    /// Validation failure, delivered to the originating connection only.
    Error(ErrorNotice),
}

/// File attachment metadata. `nonce` is present iff the blob is encrypted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub key: String,
    pub url: String,
    pub filename: String,
    pub content_type: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Inbound `message` payload. Any client-side `id` / `createdAt` fields are
/// ignored; the server assigns both when persisting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    pub chat_id: ChatId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub sender: ChatUser,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl NewMessage {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.sender.validate()?;
        if self.content.is_empty() && self.attachments.is_empty() {
            return Err(ValidationError::EmptyMessage);
        }
        if self.content.len() > MAX_MESSAGE_SIZE {
            return Err(ValidationError::TooLong {
                field: "content",
                max: MAX_MESSAGE_SIZE,
            });
        }
        if let Some(attachment) = self
            .attachments
            .iter()
            .find(|a| i64::try_from(a.size).is_err())
        {
            return Err(ValidationError::AttachmentSize {
                size: attachment.size,
            });
        }
        Ok(())
    }
}

/// A persisted message as broadcast to a room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub sender: ChatUser,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reactions: Vec<ReactionEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionRequest {
    pub message_id: MessageId,
    pub emoji: String,
    pub user: ChatUser,
}

impl ReactionRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.user.validate()?;
        validate_emoji(&self.emoji)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReactionEvent {
    pub id: ReactionId,
    pub message_id: MessageId,
    pub emoji: String,
    pub user: ChatUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditRequest {
    pub message_id: MessageId,
    pub new_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl EditRequest {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.new_content.is_empty() {
            return Err(ValidationError::Empty {
                field: "newContent",
            });
        }
        if self.new_content.len() > MAX_MESSAGE_SIZE {
            return Err(ValidationError::TooLong {
                field: "newContent",
                max: MAX_MESSAGE_SIZE,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEdited {
    pub message_id: MessageId,
    pub new_content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
    pub edited_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub code: String,
    pub message: String,
}

impl ErrorNotice {
    pub fn new(code: impl Into<String>, message: impl ToString) -> Self {
        Self {
            code: code.into(),
            message: message.to_string(),
        }
    }
}

impl ClientEvent {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Payload checks that go beyond what deserialization enforces.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            ClientEvent::Join(_, user)
            | ClientEvent::Leave(_, user)
            | ClientEvent::Typing(_, user) => user.validate(),
            ClientEvent::Message(msg) => msg.validate(),
            ClientEvent::Reaction(req) => req.validate(),
            ClientEvent::EditMessage(req) => req.validate(),
            ClientEvent::DeleteMessage(_) | ClientEvent::UndoDeleteMessage(_) => Ok(()),
        }
    }
}

impl ServerEvent {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Presence(_) => "presence",
            ServerEvent::UserJoined(_) => "userJoined",
            ServerEvent::UserLeft(_) => "userLeft",
            ServerEvent::Typing(_) => "typing",
            ServerEvent::Message(_) => "message",
            ServerEvent::Reaction(_) => "reaction",
            ServerEvent::MessageEdited(_) => "messageEdited",
            ServerEvent::MessagePendingDeletion(_) => "messagePendingDeletion",
            ServerEvent::MessageUndoDelete(_) => "messageUndoDelete",
            ServerEvent::MessageRemoved(_) => "messageRemoved",
            ServerEvent::Error(_) => "error",
        }
    }
}
