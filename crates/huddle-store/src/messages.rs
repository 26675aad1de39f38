use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use huddle_shared::protocol::Attachment;
use huddle_shared::types::{ChatId, ChatUser, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{format_ts, to_millis, CreateMessage, Message};

const MESSAGE_COLUMNS: &str = "m.id, m.chat_id, m.sender_id, u.username, m.content, m.nonce,
     m.created_at, m.edited_at";

impl Database {
    /// Insert a message and its attachment metadata in one transaction.
    ///
    /// The sender must already be a known user (see [`Database::upsert_user`]).
    pub fn create_message(&mut self, input: &CreateMessage) -> Result<Message> {
        let id = MessageId::parse(uuid::Uuid::new_v4().to_string())
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let created_at = to_millis(input.created_at);

        let tx = self.conn_mut().transaction()?;

        let username: String = tx
            .query_row(
                "SELECT username FROM users WHERE id = ?1",
                params![input.sender_id.as_str()],
                |row| row.get(0),
            )
            .optional()?
            .ok_or(StoreError::NotFound)?;

        tx.execute(
            "INSERT INTO messages (id, chat_id, sender_id, content, nonce, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.as_str(),
                input.chat_id.as_str(),
                input.sender_id.as_str(),
                input.content,
                input.nonce,
                format_ts(created_at),
            ],
        )?;

        for (position, attachment) in input.attachments.iter().enumerate() {
            let size = i64::try_from(attachment.size).map_err(|_| {
                StoreError::Corrupt(format!("attachment size {} out of range", attachment.size))
            })?;
            tx.execute(
                "INSERT INTO attachments
                     (key, message_id, position, url, filename, content_type, size, nonce)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    attachment.key,
                    id.as_str(),
                    position as i64,
                    attachment.url,
                    attachment.filename,
                    attachment.content_type,
                    size,
                    attachment.nonce,
                ],
            )?;
        }

        tx.commit()?;

        Ok(Message {
            id,
            chat_id: input.chat_id.clone(),
            sender: ChatUser::new(input.sender_id.clone(), username),
            content: input.content.clone(),
            nonce: input.nonce.clone(),
            created_at,
            edited_at: None,
            attachments: input.attachments.clone(),
            reactions: Vec::new(),
        })
    }

    pub fn find_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages m JOIN users u ON u.id = m.sender_id
             WHERE m.id = ?1"
        );
        let message = self
            .conn()
            .query_row(&sql, params![id.as_str()], row_to_message)
            .optional()?;

        match message {
            Some(message) => Ok(Some(self.hydrate(message)?)),
            None => Ok(None),
        }
    }

    /// All messages of a chat in ascending creation order.
    pub fn messages_for_chat(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {MESSAGE_COLUMNS}
             FROM messages m JOIN users u ON u.id = m.sender_id
             WHERE m.chat_id = ?1
             ORDER BY m.created_at ASC, m.rowid ASC"
        );
        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(params![chat_id.as_str()], row_to_message)?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(self.hydrate(row?)?);
        }
        Ok(messages)
    }

    pub fn update_message_content(
        &self,
        id: &MessageId,
        content: &str,
        nonce: Option<&str>,
        edited_at: DateTime<Utc>,
    ) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE messages SET content = ?1, nonce = ?2, edited_at = ?3 WHERE id = ?4",
            params![content, nonce, format_ts(edited_at), id.as_str()],
        )?;
        Ok(affected > 0)
    }

    /// Delete a message row. Reactions must be removed first; attachment
    /// metadata goes with the message.
    pub fn delete_message(&self, id: &MessageId) -> Result<bool> {
        let affected = self
            .conn()
            .execute("DELETE FROM messages WHERE id = ?1", params![id.as_str()])?;
        Ok(affected > 0)
    }

    fn attachments_for_message(&self, id: &MessageId) -> Result<Vec<Attachment>> {
        let mut stmt = self.conn().prepare(
            "SELECT key, url, filename, content_type, size, nonce
             FROM attachments WHERE message_id = ?1 ORDER BY position ASC",
        )?;
        let rows = stmt.query_map(params![id.as_str()], |row| {
            let size: i64 = row.get(4)?;
            Ok(Attachment {
                key: row.get(0)?,
                url: row.get(1)?,
                filename: row.get(2)?,
                content_type: row.get(3)?,
                size: u64::try_from(size).map_err(|e| conversion_error(4, e))?,
                nonce: row.get(5)?,
            })
        })?;

        let mut attachments = Vec::new();
        for row in rows {
            attachments.push(row?);
        }
        Ok(attachments)
    }

    fn hydrate(&self, mut message: Message) -> Result<Message> {
        message.attachments = self.attachments_for_message(&message.id)?;
        message.reactions = self.reactions_for_message(&message.id)?;
        Ok(message)
    }
}

pub(crate) fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(err))
}

pub(crate) fn parse_ts(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, e))
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let id: String = row.get(0)?;
    let chat_id: String = row.get(1)?;
    let sender_id: String = row.get(2)?;
    let username: String = row.get(3)?;
    let created_at: String = row.get(6)?;
    let edited_at: Option<String> = row.get(7)?;

    Ok(Message {
        id: MessageId::parse(id).map_err(|e| conversion_error(0, e))?,
        chat_id: ChatId::parse(chat_id).map_err(|e| conversion_error(1, e))?,
        sender: ChatUser::new(
            UserId::parse(sender_id).map_err(|e| conversion_error(2, e))?,
            username,
        ),
        content: row.get(4)?,
        nonce: row.get(5)?,
        created_at: parse_ts(6, &created_at)?,
        edited_at: edited_at.map(|raw| parse_ts(7, &raw)).transpose()?,
        attachments: Vec::new(),
        reactions: Vec::new(),
    })
}
