use chrono::Utc;
use rusqlite::{params, OptionalExtension};

use huddle_shared::crypto::KeyBackupRecord;
use huddle_shared::types::UserId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::messages::{conversion_error, parse_ts};
use crate::models::{format_ts, to_millis, User};

impl Database {
    /// Insert a user, or refresh the username of an existing one.
    pub fn upsert_user(&self, id: &UserId, username: &str) -> Result<User> {
        self.conn().execute(
            "INSERT INTO users (id, username, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET username = excluded.username",
            params![id.as_str(), username, format_ts(to_millis(Utc::now()))],
        )?;
        self.get_user(id)?.ok_or(StoreError::NotFound)
    }

    pub fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        let user = self
            .conn()
            .query_row(
                "SELECT id, username, public_key, created_at FROM users WHERE id = ?1",
                params![id.as_str()],
                |row| {
                    let id: String = row.get(0)?;
                    let created_at: String = row.get(3)?;
                    Ok(User {
                        id: UserId::parse(id).map_err(|e| conversion_error(0, e))?,
                        username: row.get(1)?,
                        public_key: row.get(2)?,
                        created_at: parse_ts(3, &created_at)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    pub fn set_public_key(&self, id: &UserId, public_key: &str) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE users SET public_key = ?1 WHERE id = ?2",
            params![public_key, id.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    /// Store (or replace) the passphrase-wrapped private key of a user.
    pub fn set_key_backup(&self, id: &UserId, backup: &KeyBackupRecord) -> Result<()> {
        if self.get_user(id)?.is_none() {
            return Err(StoreError::NotFound);
        }
        self.conn().execute(
            "INSERT INTO key_backups (user_id, salt, nonce, encrypted_key, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                 salt = excluded.salt,
                 nonce = excluded.nonce,
                 encrypted_key = excluded.encrypted_key,
                 updated_at = excluded.updated_at",
            params![
                id.as_str(),
                backup.salt,
                backup.nonce,
                backup.encrypted_key,
                format_ts(Utc::now()),
            ],
        )?;
        Ok(())
    }

    pub fn get_key_backup(&self, id: &UserId) -> Result<Option<KeyBackupRecord>> {
        let backup = self
            .conn()
            .query_row(
                "SELECT salt, nonce, encrypted_key FROM key_backups WHERE user_id = ?1",
                params![id.as_str()],
                |row| {
                    Ok(KeyBackupRecord {
                        salt: row.get(0)?,
                        nonce: row.get(1)?,
                        encrypted_key: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(backup)
    }
}
