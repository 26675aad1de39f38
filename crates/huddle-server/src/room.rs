//! Per-room coordinator.
//!
//! One task per active room owns the room's subscribers and presence set and
//! applies [`RoomCommand`]s strictly in arrival order. Every broadcast for a
//! room therefore reaches all members in the order the server applied the
//! underlying operations.

use std::collections::HashMap;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use huddle_shared::protocol::{EditRequest, ErrorNotice, NewMessage, ReactionRequest, ServerEvent};
use huddle_shared::types::{ChatId, ChatUser, ConnectionId, MessageId, UserId};

use crate::hub::Hub;
use crate::lifecycle::{LifecycleError, Outcome};
use crate::presence::RoomPresence;

/// Outbound event queue of one connection.
pub type Outbox = mpsc::UnboundedSender<ServerEvent>;

#[derive(Debug)]
pub enum RoomCommand {
    Join {
        conn: ConnectionId,
        user: ChatUser,
        outbox: Outbox,
    },
    Leave {
        conn: ConnectionId,
    },
    Disconnect {
        conn: ConnectionId,
    },
    Typing {
        conn: ConnectionId,
        user: ChatUser,
    },
    Create {
        conn: ConnectionId,
        message: NewMessage,
    },
    React {
        conn: ConnectionId,
        request: ReactionRequest,
    },
    Edit {
        conn: ConnectionId,
        request: EditRequest,
    },
    RequestDelete {
        conn: ConnectionId,
        message_id: MessageId,
    },
    Undo {
        conn: ConnectionId,
        message_id: MessageId,
    },
    /// Sent by the grace timer, not by a client.
    DeletionExpired {
        message_id: MessageId,
    },
}

pub(crate) struct Room {
    chat_id: ChatId,
    hub: Hub,
    presence: RoomPresence,
    subscribers: HashMap<ConnectionId, Outbox>,
}

impl Room {
    pub(crate) fn new(chat_id: ChatId, hub: Hub) -> Self {
        Self {
            chat_id,
            hub,
            presence: RoomPresence::new(),
            subscribers: HashMap::new(),
        }
    }

    /// Apply commands until the room has no subscribers and nothing queued.
    pub(crate) async fn run(mut self, mut commands: mpsc::UnboundedReceiver<RoomCommand>) {
        debug!(chat_id = %self.chat_id, "Room coordinator started");

        let mut next = commands.recv().await;
        while let Some(command) = next {
            self.apply(command).await;
            next = if self.subscribers.is_empty() {
                self.hub.retire_room(&self.chat_id, &mut commands)
            } else {
                commands.recv().await
            };
        }

        debug!(chat_id = %self.chat_id, "Room coordinator stopped");
    }

    async fn apply(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Join { conn, user, outbox } => self.join(conn, user, outbox).await,
            RoomCommand::Leave { conn } => {
                debug!(chat_id = %self.chat_id, %conn, "Leave");
                self.remove(conn);
            }
            RoomCommand::Disconnect { conn } => {
                debug!(chat_id = %self.chat_id, %conn, "Disconnected");
                self.remove(conn);
            }
            RoomCommand::Typing { conn, user } => self.typing(conn, user),
            RoomCommand::Create { conn, message } => {
                if self.member_id(conn) != Some(&message.sender.id) {
                    debug!(chat_id = %self.chat_id, %conn, "Sender does not match connection identity");
                    return;
                }
                let outcome = self.hub.lifecycle().create(message, Utc::now()).await;
                self.finish(conn, "message", outcome);
            }
            RoomCommand::React { conn, request } => {
                if self.member_id(conn) != Some(&request.user.id) {
                    debug!(chat_id = %self.chat_id, %conn, "Reacting user does not match connection identity");
                    return;
                }
                let outcome = self.hub.lifecycle().react(&self.chat_id, request).await;
                self.finish(conn, "reaction", outcome);
            }
            RoomCommand::Edit { conn, request } => {
                let Some(requester) = self.member_id(conn).cloned() else {
                    return;
                };
                let outcome = self
                    .hub
                    .lifecycle()
                    .edit(&self.chat_id, &requester, request, Utc::now())
                    .await;
                self.finish(conn, "editMessage", outcome);
            }
            RoomCommand::RequestDelete { conn, message_id } => {
                let Some(requester) = self.member_id(conn).cloned() else {
                    return;
                };
                let hub = self.hub.clone();
                let (chat_id, expired_id) = (self.chat_id.clone(), message_id.clone());
                let outcome = self
                    .hub
                    .lifecycle()
                    .request_delete(&self.chat_id, &requester, &message_id, move || {
                        hub.dispatch(
                            &chat_id,
                            RoomCommand::DeletionExpired {
                                message_id: expired_id,
                            },
                        );
                    })
                    .await;
                self.finish(conn, "deleteMessage", outcome);
            }
            RoomCommand::Undo { conn, message_id } => {
                if !self.subscribers.contains_key(&conn) {
                    return;
                }
                let outcome = self.hub.lifecycle().undo(&self.chat_id, &message_id);
                self.finish(conn, "undoDeleteMessage", outcome);
            }
            RoomCommand::DeletionExpired { message_id } => {
                match self.hub.lifecycle().expire(&message_id).await {
                    Ok(event) => {
                        info!(
                            chat_id = %self.chat_id,
                            %message_id,
                            still_pending = self.hub.lifecycle().pending().len(),
                            "Message removed"
                        );
                        self.broadcast(&event);
                    }
                    Err(LifecycleError::Denied(reason)) => {
                        debug!(chat_id = %self.chat_id, %message_id, %reason, "Expiry skipped");
                    }
                    Err(LifecycleError::Store(e)) => {
                        error!(chat_id = %self.chat_id, %message_id, error = %e, "Deferred delete failed");
                    }
                }
            }
        }
    }

    async fn join(&mut self, conn: ConnectionId, user: ChatUser, outbox: Outbox) {
        if let Err(e) = self.hub.lifecycle().register(&user).await {
            warn!(chat_id = %self.chat_id, user_id = %user.id, error = %e, "Failed to register user");
        }

        self.subscribers.insert(conn, outbox);
        let outcome = self.presence.join(conn, user.clone());
        info!(chat_id = %self.chat_id, user_id = %user.id, %conn, "Joined room");

        self.broadcast(&ServerEvent::Presence(self.presence.users()));
        if let Some(displaced) = outcome.displaced {
            self.send_to_others(&displaced.id, &ServerEvent::UserLeft(displaced.clone()));
        }
        if outcome.entered {
            self.send_to_others(&user.id, &ServerEvent::UserJoined(user.clone()));
        }
    }

    fn remove(&mut self, conn: ConnectionId) {
        if self.subscribers.remove(&conn).is_none() {
            return;
        }
        let gone = self.presence.remove_connection(conn);
        self.broadcast(&ServerEvent::Presence(self.presence.users()));
        if let Some(gone) = gone {
            info!(chat_id = %self.chat_id, user_id = %gone.id, "Left room");
            self.send_to_others(&gone.id, &ServerEvent::UserLeft(gone.clone()));
        }
    }

    fn typing(&self, conn: ConnectionId, user: ChatUser) {
        match self.presence.identity_of(conn) {
            Some(member) if member.id == user.id => {
                self.send_to_others(&member.id, &ServerEvent::Typing(member.clone()));
            }
            _ => debug!(chat_id = %self.chat_id, %conn, "Typing from non-member ignored"),
        }
    }

    fn member_id(&self, conn: ConnectionId) -> Option<&UserId> {
        self.presence.identity_of(conn).map(|u| &u.id)
    }

    fn finish(&self, conn: ConnectionId, action: &'static str, outcome: Outcome) {
        match outcome {
            Ok(event) => self.broadcast(&event),
            Err(LifecycleError::Denied(reason)) => {
                debug!(chat_id = %self.chat_id, %conn, action, %reason, "Request dropped");
            }
            Err(LifecycleError::Store(e)) => {
                warn!(chat_id = %self.chat_id, %conn, action, error = %e, "Store call failed");
                self.send_to(
                    conn,
                    ServerEvent::Error(ErrorNotice::new(
                        "store_unavailable",
                        format!("{action} failed, try again"),
                    )),
                );
            }
        }
    }

    fn broadcast(&self, event: &ServerEvent) {
        for outbox in self.subscribers.values() {
            let _ = outbox.send(event.clone());
        }
    }

    /// Send to every connection whose identity is not `user_id`.
    fn send_to_others(&self, user_id: &UserId, event: &ServerEvent) {
        for (conn, outbox) in &self.subscribers {
            if self.member_id(*conn) != Some(user_id) {
                let _ = outbox.send(event.clone());
            }
        }
    }

    fn send_to(&self, conn: ConnectionId, event: ServerEvent) {
        if let Some(outbox) = self.subscribers.get(&conn) {
            let _ = outbox.send(event);
        }
    }
}
