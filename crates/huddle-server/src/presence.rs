//! Presence set of one room.
//!
//! Keyed by identity: an identity is present while at least one of its
//! connections has joined the room. Entries keep first-join order, which is
//! the order of the broadcast `presence` list.

use std::collections::BTreeSet;

use huddle_shared::types::{ChatUser, ConnectionId};

#[derive(Debug)]
struct Member {
    user: ChatUser,
    connections: BTreeSet<ConnectionId>,
}

/// What a join changed.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The identity was not present before.
    pub entered: bool,
    /// The connection previously joined as another identity, which has now
    /// left the room.
    pub displaced: Option<ChatUser>,
}

#[derive(Debug, Default)]
pub struct RoomPresence {
    members: Vec<Member>,
}

impl RoomPresence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&mut self, conn: ConnectionId, user: ChatUser) -> JoinOutcome {
        let mut outcome = JoinOutcome::default();

        if let Some(current) = self.identity_of(conn) {
            if current.id != user.id {
                outcome.displaced = self.remove_connection(conn);
            }
        }

        match self.members.iter_mut().find(|m| m.user.id == user.id) {
            Some(member) => {
                member.user.username = user.username;
                member.connections.insert(conn);
            }
            None => {
                self.members.push(Member {
                    user,
                    connections: BTreeSet::from([conn]),
                });
                outcome.entered = true;
            }
        }

        outcome
    }

    /// Remove one connection. Returns the identity if it was that
    /// identity's last connection in the room.
    pub fn remove_connection(&mut self, conn: ConnectionId) -> Option<ChatUser> {
        let idx = self
            .members
            .iter()
            .position(|m| m.connections.contains(&conn))?;

        let member = &mut self.members[idx];
        member.connections.remove(&conn);
        if member.connections.is_empty() {
            Some(self.members.remove(idx).user)
        } else {
            None
        }
    }

    pub fn identity_of(&self, conn: ConnectionId) -> Option<&ChatUser> {
        self.members
            .iter()
            .find(|m| m.connections.contains(&conn))
            .map(|m| &m.user)
    }

    pub fn users(&self) -> Vec<ChatUser> {
        self.members.iter().map(|m| m.user.clone()).collect()
    }
}
