//! Domain model structs persisted in the database.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use huddle_shared::protocol::{Attachment, ChatMessage, ReactionEvent};
use huddle_shared::types::{ChatId, ChatUser, MessageId, ReactionId, UserId};

// ---------------------------------------------------------------------------
// User
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    /// Base64 X25519 public key; `None` until the user initialises encryption.
    pub public_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// Input for [`crate::ChatStore::create_message`].
#[derive(Debug, Clone, PartialEq)]
pub struct CreateMessage {
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    pub nonce: Option<String>,
    pub attachments: Vec<Attachment>,
    pub created_at: DateTime<Utc>,
}

/// A stored chat message with its sender, attachments and reactions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender: ChatUser,
    pub content: String,
    pub nonce: Option<String>,
    pub created_at: DateTime<Utc>,
    pub edited_at: Option<DateTime<Utc>>,
    pub attachments: Vec<Attachment>,
    pub reactions: Vec<Reaction>,
}

impl From<Message> for ChatMessage {
    fn from(message: Message) -> Self {
        ChatMessage {
            id: message.id,
            chat_id: message.chat_id,
            content: message.content,
            nonce: message.nonce,
            sender: message.sender,
            created_at: message.created_at,
            edited_at: message.edited_at,
            attachments: message.attachments,
            reactions: message.reactions.into_iter().map(ReactionEvent::from).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Reaction
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub id: ReactionId,
    pub message_id: MessageId,
    pub user: ChatUser,
    pub emoji: String,
    pub created_at: DateTime<Utc>,
}

impl From<Reaction> for ReactionEvent {
    fn from(reaction: Reaction) -> Self {
        ReactionEvent {
            id: reaction.id,
            message_id: reaction.message_id,
            emoji: reaction.emoji,
            user: reaction.user,
        }
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Truncate to millisecond precision, the precision timestamps are stored at.
pub fn to_millis(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(at.timestamp_millis()).unwrap_or(at)
}

pub(crate) fn format_ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}
