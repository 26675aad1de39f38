//! Message lifecycle: create, edit within the edit window, soft delete with
//! a grace timer and undo, reactions.
//!
//! Every operation returns the event to broadcast to the room, or the reason
//! nothing is broadcast. Callers run these from the owning room's
//! coordinator, so operations on one room never interleave.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;

use huddle_shared::constants::DELETE_GRACE_SECS;
use huddle_shared::protocol::{EditRequest, MessageEdited, NewMessage, ReactionRequest, ServerEvent};
use huddle_shared::timing::can_edit;
use huddle_shared::types::{ChatId, ChatUser, MessageId, UserId};
use huddle_store::{to_millis, ChatStore, CreateMessage, Message, StoreError};

use crate::pending::PendingDeletions;

/// Why a request was dropped. Never shown to clients.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Denied {
    #[error("message not found")]
    UnknownMessage,
    #[error("message belongs to another room")]
    OtherRoom,
    #[error("requester is not the sender")]
    NotSender,
    #[error("edit window closed")]
    EditWindowClosed,
    #[error("deletion already pending")]
    AlreadyPending,
    #[error("no pending deletion")]
    NotPending,
}

#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("denied: {0}")]
    Denied(#[from] Denied),
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

pub type Outcome = Result<ServerEvent, LifecycleError>;

pub struct Lifecycle {
    store: Arc<dyn ChatStore>,
    pending: PendingDeletions,
    store_timeout: Duration,
    grace: Duration,
}

impl Lifecycle {
    pub fn new(store: Arc<dyn ChatStore>, store_timeout: Duration) -> Self {
        Self {
            store,
            pending: PendingDeletions::new(),
            store_timeout,
            grace: Duration::from_secs(DELETE_GRACE_SECS as u64),
        }
    }

    pub fn pending(&self) -> &PendingDeletions {
        &self.pending
    }

    /// Run a store call under the configured deadline.
    pub async fn call<T>(
        &self,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.store_timeout, fut)
            .await
            .map_err(|_| StoreError::Timeout(self.store_timeout))?
    }

    /// Make sure the identity exists before it sends messages.
    pub async fn register(&self, user: &ChatUser) -> Result<(), StoreError> {
        self.call(self.store.upsert_user(&user.id, &user.username))
            .await
            .map(|_| ())
    }

    /// Room a stored message belongs to.
    pub async fn locate(&self, message_id: &MessageId) -> Result<Option<ChatId>, StoreError> {
        Ok(self
            .call(self.store.find_message(message_id))
            .await?
            .map(|m| m.chat_id))
    }

    async fn message_in_room(&self, chat_id: &ChatId, id: &MessageId) -> Result<Message, LifecycleError> {
        let message = self
            .call(self.store.find_message(id))
            .await?
            .ok_or(Denied::UnknownMessage)?;
        if &message.chat_id != chat_id {
            return Err(Denied::OtherRoom.into());
        }
        Ok(message)
    }

    pub async fn create(&self, message: NewMessage, now: DateTime<Utc>) -> Outcome {
        let stored = self
            .call(self.store.create_message(CreateMessage {
                chat_id: message.chat_id,
                sender_id: message.sender.id,
                content: message.content,
                nonce: message.nonce,
                attachments: message.attachments,
                created_at: now,
            }))
            .await?;

        Ok(ServerEvent::Message(stored.into()))
    }

    pub async fn edit(
        &self,
        chat_id: &ChatId,
        requester: &UserId,
        request: EditRequest,
        now: DateTime<Utc>,
    ) -> Outcome {
        let message = self.message_in_room(chat_id, &request.message_id).await?;
        if &message.sender.id != requester {
            return Err(Denied::NotSender.into());
        }
        if !can_edit(now, message.created_at) {
            return Err(Denied::EditWindowClosed.into());
        }

        let edited_at = to_millis(now);
        let updated = self
            .call(self.store.update_message_content(
                &request.message_id,
                &request.new_content,
                request.nonce.as_deref(),
                edited_at,
            ))
            .await?;
        if !updated {
            return Err(Denied::UnknownMessage.into());
        }

        Ok(ServerEvent::MessageEdited(MessageEdited {
            message_id: request.message_id,
            new_content: request.new_content,
            nonce: request.nonce,
            edited_at,
        }))
    }

    /// Start the grace period. `on_expiry` runs once the grace timer fires
    /// unless the deletion is undone first.
    pub async fn request_delete<F>(
        &self,
        chat_id: &ChatId,
        requester: &UserId,
        message_id: &MessageId,
        on_expiry: F,
    ) -> Outcome
    where
        F: FnOnce() + Send + 'static,
    {
        let message = self.message_in_room(chat_id, message_id).await?;
        if &message.sender.id != requester {
            return Err(Denied::NotSender.into());
        }

        let grace = self.grace;
        let scheduled = self.pending.schedule(message_id, chat_id, move || {
            tokio::spawn(async move {
                tokio::time::sleep(grace).await;
                on_expiry();
            })
        });
        if !scheduled {
            return Err(Denied::AlreadyPending.into());
        }

        Ok(ServerEvent::MessagePendingDeletion(message_id.clone()))
    }

    pub fn undo(&self, chat_id: &ChatId, message_id: &MessageId) -> Outcome {
        match self.pending.chat_of(message_id) {
            Some(pending_chat) if &pending_chat == chat_id => {}
            Some(_) => return Err(Denied::OtherRoom.into()),
            None => return Err(Denied::NotPending.into()),
        }

        let entry = self.pending.take(message_id).ok_or(Denied::NotPending)?;
        entry.cancel();
        Ok(ServerEvent::MessageUndoDelete(message_id.clone()))
    }

    /// Grace timer fired: delete for real unless the entry was undone.
    pub async fn expire(&self, message_id: &MessageId) -> Outcome {
        if self.pending.take(message_id).is_none() {
            return Err(Denied::NotPending.into());
        }

        self.call(self.store.delete_reactions_for_message(message_id))
            .await?;
        let deleted = self.call(self.store.delete_message(message_id)).await?;
        if !deleted {
            return Err(Denied::UnknownMessage.into());
        }

        Ok(ServerEvent::MessageRemoved(message_id.clone()))
    }

    pub async fn react(&self, chat_id: &ChatId, request: ReactionRequest) -> Outcome {
        self.message_in_room(chat_id, &request.message_id).await?;
        let reaction = self
            .call(self.store.create_reaction(
                &request.message_id,
                &request.user.id,
                &request.emoji,
            ))
            .await?;
        Ok(ServerEvent::Reaction(reaction.into()))
    }
}
