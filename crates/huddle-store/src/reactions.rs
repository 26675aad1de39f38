use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use huddle_shared::types::{ChatUser, MessageId, ReactionId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::{conversion_error, parse_ts};
use crate::models::{format_ts, to_millis, Reaction};

impl Database {
    /// Append a reaction. Identical reactions from the same user are kept as
    /// separate rows.
    pub fn create_reaction(
        &self,
        message_id: &MessageId,
        user_id: &UserId,
        emoji: &str,
    ) -> Result<Reaction> {
        let username: String = self
            .conn()
            .query_row(
                "SELECT username FROM users WHERE id = ?1",
                params![user_id.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        let id = ReactionId::parse(uuid::Uuid::new_v4().to_string())
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let now = to_millis(Utc::now());

        self.conn().execute(
            "INSERT INTO reactions (id, message_id, user_id, emoji, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                id.as_str(),
                message_id.as_str(),
                user_id.as_str(),
                emoji,
                format_ts(now),
            ],
        )?;

        Ok(Reaction {
            id,
            message_id: message_id.clone(),
            user: ChatUser::new(user_id.clone(), username),
            emoji: emoji.to_string(),
            created_at: now,
        })
    }

    pub fn reactions_for_message(&self, message_id: &MessageId) -> Result<Vec<Reaction>> {
        let mut stmt = self.conn().prepare(
            "SELECT r.id, r.message_id, r.user_id, u.username, r.emoji, r.created_at
             FROM reactions r JOIN users u ON u.id = r.user_id
             WHERE r.message_id = ?1
             ORDER BY r.created_at ASC, r.rowid ASC",
        )?;

        let rows = stmt.query_map(params![message_id.as_str()], |row| {
            let id: String = row.get(0)?;
            let message_id: String = row.get(1)?;
            let user_id: String = row.get(2)?;
            let username: String = row.get(3)?;
            let created_at: String = row.get(5)?;

            Ok(Reaction {
                id: ReactionId::parse(id).map_err(|e| conversion_error(0, e))?,
                message_id: MessageId::parse(message_id).map_err(|e| conversion_error(1, e))?,
                user: ChatUser::new(
                    UserId::parse(user_id).map_err(|e| conversion_error(2, e))?,
                    username,
                ),
                emoji: row.get(4)?,
                created_at: parse_ts(5, &created_at)?,
            })
        })?;

        let mut reactions = Vec::new();
        for row in rows {
            reactions.push(row?);
        }
        Ok(reactions)
    }

    /// Remove every reaction on a message; returns how many were removed.
    pub fn delete_reactions_for_message(&self, message_id: &MessageId) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM reactions WHERE message_id = ?1",
            params![message_id.as_str()],
        )?;
        Ok(affected)
    }
}
