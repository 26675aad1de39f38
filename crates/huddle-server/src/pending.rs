//! Pending-deletion table: `messageId -> (chatId, grace timer)`.
//!
//! Both undo and timer expiry resolve an entry through [`PendingDeletions::take`],
//! a single remove-under-lock, so exactly one of them wins.

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::task::JoinHandle;

use huddle_shared::types::{ChatId, MessageId};

#[derive(Debug)]
pub struct PendingDeletion {
    pub chat_id: ChatId,
    timer: JoinHandle<()>,
}

impl PendingDeletion {
    /// Stop the grace timer. Harmless if it already fired.
    pub fn cancel(self) {
        self.timer.abort();
    }
}

#[derive(Debug, Default)]
pub struct PendingDeletions {
    entries: Mutex<HashMap<MessageId, PendingDeletion>>,
}

impl PendingDeletions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a pending deletion, starting its timer with `start_timer`.
    ///
    /// Returns `false` without calling `start_timer` if the message is
    /// already pending.
    pub fn schedule<F>(&self, message_id: &MessageId, chat_id: &ChatId, start_timer: F) -> bool
    where
        F: FnOnce() -> JoinHandle<()>,
    {
        let mut entries = self.lock();
        if entries.contains_key(message_id) {
            return false;
        }
        entries.insert(
            message_id.clone(),
            PendingDeletion {
                chat_id: chat_id.clone(),
                timer: start_timer(),
            },
        );
        true
    }

    /// Atomically remove an entry, returning it if it existed.
    pub fn take(&self, message_id: &MessageId) -> Option<PendingDeletion> {
        self.lock().remove(message_id)
    }

    pub fn chat_of(&self, message_id: &MessageId) -> Option<ChatId> {
        self.lock().get(message_id).map(|p| p.chat_id.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<MessageId, PendingDeletion>> {
        // Entries stay consistent even if a holder panicked mid-call.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
