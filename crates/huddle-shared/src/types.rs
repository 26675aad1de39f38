use serde::{Deserialize, Serialize};

use crate::constants::{MAX_EMOJI_LEN, MAX_ID_LEN, MAX_USERNAME_LEN};
use crate::error::ValidationError;

fn validate_id(field: &'static str, raw: &str) -> Result<(), ValidationError> {
    if raw.is_empty() {
        return Err(ValidationError::Empty { field });
    }
    if raw.len() > MAX_ID_LEN {
        return Err(ValidationError::TooLong {
            field,
            max: MAX_ID_LEN,
        });
    }
    if !raw
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
    {
        return Err(ValidationError::InvalidCharacters { field });
    }
    Ok(())
}

// Opaque string identifiers. Deserialization validates, so a malformed id in
// an inbound frame fails to decode instead of reaching the room coordinator.
macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $field:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn parse(raw: impl Into<String>) -> Result<Self, ValidationError> {
                let raw = raw.into();
                validate_id($field, &raw)?;
                Ok(Self(raw))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = ValidationError;

            fn try_from(raw: String) -> Result<Self, Self::Error> {
                Self::parse(raw)
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Durable conversation identifier (a room).
    ChatId,
    "chatId"
);
string_id!(
    /// Identity of an authenticated user.
    UserId,
    "userId"
);
string_id!(MessageId, "messageId");
string_id!(ReactionId, "reactionId");

/// A user as seen by the realtime layer: `{id, username}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChatUser {
    pub id: UserId,
    pub username: String,
}

impl ChatUser {
    pub fn new(id: UserId, username: impl Into<String>) -> Self {
        Self {
            id,
            username: username.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.username.trim().is_empty() {
            return Err(ValidationError::Empty { field: "username" });
        }
        if self.username.chars().count() > MAX_USERNAME_LEN {
            return Err(ValidationError::TooLong {
                field: "username",
                max: MAX_USERNAME_LEN,
            });
        }
        Ok(())
    }
}

pub fn validate_emoji(emoji: &str) -> Result<(), ValidationError> {
    if emoji.is_empty() {
        return Err(ValidationError::Empty { field: "emoji" });
    }
    if emoji.len() > MAX_EMOJI_LEN {
        return Err(ValidationError::TooLong {
            field: "emoji",
            max: MAX_EMOJI_LEN,
        });
    }
    Ok(())
}

/// Identifies one live WebSocket connection for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_accepts_cuid_and_uuid_shapes() {
        assert!(ChatId::parse("clx1abcd0000qwerty").is_ok());
        assert!(MessageId::parse("0b6f5e0e-3c1d-4f59-9d0f-1f9bb2c1a2d3").is_ok());
    }

    #[test]
    fn test_id_rejects_malformed() {
        assert_eq!(
            ChatId::parse(""),
            Err(ValidationError::Empty { field: "chatId" })
        );
        assert!(ChatId::parse("a/../b").is_err());
        assert!(UserId::parse("x".repeat(MAX_ID_LEN + 1)).is_err());
    }

    #[test]
    fn test_id_deserialize_validates() {
        let ok: Result<ChatId, _> = serde_json::from_str("\"r1\"");
        assert_eq!(ok.unwrap().as_str(), "r1");

        let bad: Result<ChatId, _> = serde_json::from_str("\"r 1\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_chat_user_validation() {
        let id = UserId::parse("u1").unwrap();
        assert!(ChatUser::new(id.clone(), "alice").validate().is_ok());
        assert!(ChatUser::new(id.clone(), "  ").validate().is_err());
        assert!(ChatUser::new(id, "a".repeat(MAX_USERNAME_LEN + 1))
            .validate()
            .is_err());
    }

    #[test]
    fn test_username_length_counts_characters() {
        let id = UserId::parse("u1").unwrap();
        // 20 characters, 80 bytes.
        assert!(ChatUser::new(id.clone(), "😀".repeat(20)).validate().is_ok());
        assert!(ChatUser::new(id.clone(), "é".repeat(MAX_USERNAME_LEN))
            .validate()
            .is_ok());
        assert_eq!(
            ChatUser::new(id, "é".repeat(MAX_USERNAME_LEN + 1)).validate(),
            Err(ValidationError::TooLong {
                field: "username",
                max: MAX_USERNAME_LEN
            })
        );
    }

    #[test]
    fn test_emoji_validation() {
        assert!(validate_emoji("👍").is_ok());
        assert!(validate_emoji("").is_err());
        assert!(validate_emoji(&"🎉".repeat(20)).is_err());
    }
}
