//! Process-wide realtime context: the room registry, the message lifecycle
//! manager and its pending-deletion table.
//!
//! Created once at startup and handed to every connection. Rooms are spawned
//! on first use and retire themselves when their last connection leaves.
//! State lives in this process only; running several instances would need an
//! external coordination layer.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::mpsc;

use huddle_shared::types::{ChatId, ConnectionId};
use huddle_store::ChatStore;

use crate::lifecycle::Lifecycle;
use crate::room::{Room, RoomCommand};

type Registry = HashMap<ChatId, mpsc::UnboundedSender<RoomCommand>>;

#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubInner {
    rooms: Mutex<Registry>,
    lifecycle: Lifecycle,
    next_connection: AtomicU64,
}

impl Hub {
    pub fn new(store: Arc<dyn ChatStore>, store_timeout: Duration) -> Self {
        Self {
            inner: Arc::new(HubInner {
                rooms: Mutex::new(HashMap::new()),
                lifecycle: Lifecycle::new(store, store_timeout),
                next_connection: AtomicU64::new(1),
            }),
        }
    }

    pub fn lifecycle(&self) -> &Lifecycle {
        &self.inner.lifecycle
    }

    pub fn next_connection_id(&self) -> ConnectionId {
        ConnectionId(self.inner.next_connection.fetch_add(1, Ordering::Relaxed))
    }

    /// Queue a command on a room's coordinator, starting one if needed.
    ///
    /// Sends happen under the registry lock, which is what lets a room
    /// retire without losing a command queued at the same moment.
    pub fn dispatch(&self, chat_id: &ChatId, command: RoomCommand) {
        let mut rooms = self.rooms();

        let command = match rooms.get(chat_id) {
            Some(tx) => match tx.send(command) {
                Ok(()) => return,
                Err(mpsc::error::SendError(command)) => {
                    tracing::warn!(chat_id = %chat_id, "Room coordinator gone, restarting");
                    command
                }
            },
            None => command,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        // The receiver is alive, this cannot fail.
        let _ = tx.send(command);
        rooms.insert(chat_id.clone(), tx);
        tokio::spawn(Room::new(chat_id.clone(), self.clone()).run(rx));
    }

    /// Called by an empty room. Hands back a queued command if one arrived,
    /// otherwise unregisters the room.
    pub(crate) fn retire_room(
        &self,
        chat_id: &ChatId,
        commands: &mut mpsc::UnboundedReceiver<RoomCommand>,
    ) -> Option<RoomCommand> {
        let mut rooms = self.rooms();
        match commands.try_recv() {
            Ok(command) => Some(command),
            Err(_) => {
                rooms.remove(chat_id);
                None
            }
        }
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms().len()
    }

    fn rooms(&self) -> MutexGuard<'_, Registry> {
        self.inner.rooms.lock().unwrap_or_else(|e| e.into_inner())
    }
}
