//! In-memory [`ChatStore`], used for `DATABASE_PATH=:memory:` and in tests.
//!
//! It enforces the same referential rules as the SQLite schema (known sender,
//! reactions only on existing messages) and can be switched into an
//! "unavailable" mode where every call fails.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use huddle_shared::crypto::KeyBackupRecord;
use huddle_shared::types::{ChatId, ChatUser, MessageId, ReactionId, UserId};

use crate::error::{Result, StoreError};
use crate::models::{to_millis, CreateMessage, Message, Reaction, User};
use crate::store::ChatStore;

#[derive(Default)]
struct MemoryState {
    users: HashMap<UserId, User>,
    messages: HashMap<MessageId, Message>,
    /// Insertion order, used as the tie-breaker for equal timestamps.
    order: Vec<MessageId>,
    reactions: HashMap<MessageId, Vec<Reaction>>,
    backups: HashMap<UserId, KeyBackupRecord>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn state(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable);
        }
        self.state
            .lock()
            .map_err(|_| StoreError::Task("memory store mutex poisoned".to_string()))
    }
}

fn fresh_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl MemoryState {
    fn chat_user(&self, id: &UserId) -> Result<ChatUser> {
        self.users
            .get(id)
            .map(|u| ChatUser::new(u.id.clone(), u.username.clone()))
            .ok_or(StoreError::NotFound)
    }

    fn hydrated(&self, message: &Message) -> Message {
        let mut message = message.clone();
        message.reactions = self.reactions.get(&message.id).cloned().unwrap_or_default();
        message
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn upsert_user(&self, id: &UserId, username: &str) -> Result<User> {
        let mut state = self.state()?;
        let user = state.users.entry(id.clone()).or_insert_with(|| User {
            id: id.clone(),
            username: username.to_string(),
            public_key: None,
            created_at: to_millis(Utc::now()),
        });
        user.username = username.to_string();
        Ok(user.clone())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.state()?.users.get(id).cloned())
    }

    async fn create_message(&self, input: CreateMessage) -> Result<Message> {
        let mut state = self.state()?;
        let sender = state.chat_user(&input.sender_id)?;

        let message = Message {
            id: MessageId::parse(fresh_id()).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            chat_id: input.chat_id,
            sender,
            content: input.content,
            nonce: input.nonce,
            created_at: to_millis(input.created_at),
            edited_at: None,
            attachments: input.attachments,
            reactions: Vec::new(),
        };

        state.order.push(message.id.clone());
        state.messages.insert(message.id.clone(), message.clone());
        Ok(message)
    }

    async fn find_message(&self, id: &MessageId) -> Result<Option<Message>> {
        let state = self.state()?;
        Ok(state.messages.get(id).map(|m| state.hydrated(m)))
    }

    async fn messages_for_chat(&self, chat_id: &ChatId) -> Result<Vec<Message>> {
        let state = self.state()?;
        let mut messages: Vec<Message> = state
            .order
            .iter()
            .filter_map(|id| state.messages.get(id))
            .filter(|m| &m.chat_id == chat_id)
            .map(|m| state.hydrated(m))
            .collect();
        // Stable sort keeps insertion order for equal timestamps.
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn update_message_content(
        &self,
        id: &MessageId,
        content: &str,
        nonce: Option<&str>,
        edited_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut state = self.state()?;
        let Some(message) = state.messages.get_mut(id) else {
            return Ok(false);
        };
        message.content = content.to_string();
        message.nonce = nonce.map(str::to_string);
        message.edited_at = Some(to_millis(edited_at));
        Ok(true)
    }

    async fn delete_message(&self, id: &MessageId) -> Result<bool> {
        let mut state = self.state()?;
        if state.reactions.get(id).is_some_and(|r| !r.is_empty()) {
            return Err(StoreError::Corrupt(format!(
                "message {id} still has reactions"
            )));
        }
        state.order.retain(|m| m != id);
        Ok(state.messages.remove(id).is_some())
    }

    async fn delete_reactions_for_message(&self, id: &MessageId) -> Result<usize> {
        let mut state = self.state()?;
        Ok(state.reactions.remove(id).map(|r| r.len()).unwrap_or(0))
    }

    async fn create_reaction(
        &self,
        message_id: &MessageId,
        user_id: &UserId,
        emoji: &str,
    ) -> Result<Reaction> {
        let mut state = self.state()?;
        if !state.messages.contains_key(message_id) {
            return Err(StoreError::NotFound);
        }
        let user = state.chat_user(user_id)?;

        let reaction = Reaction {
            id: ReactionId::parse(fresh_id()).map_err(|e| StoreError::Corrupt(e.to_string()))?,
            message_id: message_id.clone(),
            user,
            emoji: emoji.to_string(),
            created_at: to_millis(Utc::now()),
        };
        state
            .reactions
            .entry(message_id.clone())
            .or_default()
            .push(reaction.clone());
        Ok(reaction)
    }

    async fn set_public_key(&self, user_id: &UserId, public_key: &str) -> Result<()> {
        let mut state = self.state()?;
        let user = state.users.get_mut(user_id).ok_or(StoreError::NotFound)?;
        user.public_key = Some(public_key.to_string());
        Ok(())
    }

    async fn get_key_backup(&self, user_id: &UserId) -> Result<Option<KeyBackupRecord>> {
        Ok(self.state()?.backups.get(user_id).cloned())
    }

    async fn set_key_backup(&self, user_id: &UserId, backup: &KeyBackupRecord) -> Result<()> {
        let mut state = self.state()?;
        if !state.users.contains_key(user_id) {
            return Err(StoreError::NotFound);
        }
        state.backups.insert(user_id.clone(), backup.clone());
        Ok(())
    }
}
