//! The persistent store interface consumed by the realtime engine.
//!
//! [`ChatStore`] is the narrow async surface the gateway and lifecycle
//! manager talk to. [`SqliteStore`] adapts the synchronous [`Database`] by
//! running every call on the blocking thread pool, so a slow query never
//! stalls the async workers serving other rooms.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use huddle_shared::crypto::KeyBackupRecord;
use huddle_shared::types::{ChatId, MessageId, UserId};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{CreateMessage, Message, Reaction, User};

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn upsert_user(&self, id: &UserId, username: &str) -> Result<User>;

    async fn get_user(&self, id: &UserId) -> Result<Option<User>>;

    async fn create_message(&self, input: CreateMessage) -> Result<Message>;

    async fn find_message(&self, id: &MessageId) -> Result<Option<Message>>;

    async fn messages_for_chat(&self, chat_id: &ChatId) -> Result<Vec<Message>>;

    /// Returns `false` when the message no longer exists.
    async fn update_message_content(
        &self,
        id: &MessageId,
        content: &str,
        nonce: Option<&str>,
        edited_at: DateTime<Utc>,
    ) -> Result<bool>;

    async fn delete_message(&self, id: &MessageId) -> Result<bool>;

    async fn delete_reactions_for_message(&self, id: &MessageId) -> Result<usize>;

    async fn create_reaction(
        &self,
        message_id: &MessageId,
        user_id: &UserId,
        emoji: &str,
    ) -> Result<Reaction>;

    async fn get_public_key(&self, user_id: &UserId) -> Result<Option<String>> {
        Ok(self.get_user(user_id).await?.and_then(|u| u.public_key))
    }

    async fn set_public_key(&self, user_id: &UserId, public_key: &str) -> Result<()>;

    async fn get_key_backup(&self, user_id: &UserId) -> Result<Option<KeyBackupRecord>>;

    async fn set_key_backup(&self, user_id: &UserId, backup: &KeyBackupRecord) -> Result<()>;
}

/// [`ChatStore`] backed by SQLite.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Database>>,
}

impl SqliteStore {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    async fn run<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Database) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let mut guard = db
                .lock()
                .map_err(|_| StoreError::Task("database mutex poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::Task(e.to_string()))?
    }
}

#[async_trait]
impl ChatStore for SqliteStore {
    async fn upsert_user(&self, id: &UserId, username: &str) -> Result<User> {
        let (id, username) = (id.clone(), username.to_string());
        self.run(move |db| db.upsert_user(&id, &username)).await
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        let id = id.clone();
        self.run(move |db| db.get_user(&id)).await
    }

    async fn create_message(&self, input: CreateMessage) -> Result<Message> {
        self.run(move |db| db.create_message(&input)).await
    }

    async fn find_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let id = id.clone();
        self.run(move |db| db.find_message(&id)).await
    }

    async fn messages_for_chat(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        let chat_id = chat_id.clone();
        self.run(move |db| db.messages_for_chat(&chat_id)).await
    }

    async fn update_message_content(
        &self,
        id: &MessageId,
        content: &str,
        nonce: Option<&str>,
        edited_at: DateTime<Utc>,
    ) -> Result<bool> {
        let (id, content) = (id.clone(), content.to_string());
        let nonce = nonce.map(str::to_string);
        self.run(move |db| db.update_message_content(&id, &content, nonce.as_deref(), edited_at))
            .await
    }

    async fn delete_message(&self, id: &MessageId) -> Result<bool> {
        let id = id.clone();
        self.run(move |db| db.delete_message(&id)).await
    }

    async fn delete_reactions_for_message(&self, id: &MessageId) -> Result<usize> {
        let id = id.clone();
        self.run(move |db| db.delete_reactions_for_message(&id)).await
    }

    async fn create_reaction(
        &self,
        message_id: &MessageId,
        user_id: &UserId,
        emoji: &str,
    ) -> Result<Reaction> {
        let (message_id, user_id, emoji) = (message_id.clone(), user_id.clone(), emoji.to_string());
        self.run(move |db| db.create_reaction(&message_id, &user_id, &emoji))
            .await
    }

    async fn set_public_key(&self, user_id: &UserId, public_key: &str) -> Result<()> {
        let (user_id, public_key) = (user_id.clone(), public_key.to_string());
        self.run(move |db| db.set_public_key(&user_id, &public_key))
            .await
    }

    async fn get_key_backup(&self, user_id: &UserId) -> Result<Option<KeyBackupRecord>> {
        let user_id = user_id.clone();
        self.run(move |db| db.get_key_backup(&user_id)).await
    }

    async fn set_key_backup(&self, user_id: &UserId, backup: &KeyBackupRecord) -> Result<()> {
        let (user_id, backup) = (user_id.clone(), backup.clone());
        self.run(move |db| db.set_key_backup(&user_id, &backup))
            .await
    }
}
