//! Connection gateway: one WebSocket per client.
//!
//! Inbound frames are decoded into [`ClientEvent`]s, validated, and routed to
//! the owning room's coordinator. Outbound events arrive on the connection's
//! outbox and are written by a dedicated send task.

use std::collections::HashSet;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use huddle_shared::protocol::{ClientEvent, ErrorNotice, ServerEvent};
use huddle_shared::types::{ChatId, ConnectionId, MessageId};

use crate::api::AppState;
use crate::hub::Hub;
use crate::room::{Outbox, RoomCommand};

/// Per-connection state: the rooms it joined. Identities live in each room's
/// presence set.
pub struct Session {
    hub: Hub,
    conn: ConnectionId,
    outbox: Outbox,
    rooms: HashSet<ChatId>,
}

impl Session {
    pub fn new(hub: Hub, outbox: Outbox) -> Self {
        let conn = hub.next_connection_id();
        Self {
            hub,
            conn,
            outbox,
            rooms: HashSet::new(),
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.conn
    }

    /// Handle one text frame.
    pub async fn handle_text(&mut self, text: &str) {
        match ClientEvent::from_json(text) {
            Ok(event) => self.handle_event(event).await,
            Err(e) => {
                debug!(conn = %self.conn, error = %e, "Malformed frame");
                self.reject("invalid_event", e);
            }
        }
    }

    pub async fn handle_event(&mut self, event: ClientEvent) {
        if let Err(e) = event.validate() {
            debug!(conn = %self.conn, error = %e, "Invalid event");
            self.reject("validation", e);
            return;
        }

        match event {
            ClientEvent::Join(chat_id, user) => {
                self.rooms.insert(chat_id.clone());
                self.hub.dispatch(
                    &chat_id,
                    RoomCommand::Join {
                        conn: self.conn,
                        user,
                        outbox: self.outbox.clone(),
                    },
                );
            }
            ClientEvent::Leave(chat_id, _) => {
                if self.rooms.remove(&chat_id) {
                    self.hub
                        .dispatch(&chat_id, RoomCommand::Leave { conn: self.conn });
                }
            }
            ClientEvent::Typing(chat_id, user) => {
                if self.rooms.contains(&chat_id) {
                    self.hub.dispatch(
                        &chat_id,
                        RoomCommand::Typing {
                            conn: self.conn,
                            user,
                        },
                    );
                }
            }
            ClientEvent::Message(message) => {
                if !self.rooms.contains(&message.chat_id) {
                    debug!(conn = %self.conn, chat_id = %message.chat_id, "Message for unjoined room");
                    return;
                }
                let chat_id = message.chat_id.clone();
                self.hub.dispatch(
                    &chat_id,
                    RoomCommand::Create {
                        conn: self.conn,
                        message,
                    },
                );
            }
            ClientEvent::Reaction(request) => {
                if let Some(chat_id) = self.joined_room_of(&request.message_id).await {
                    self.hub.dispatch(
                        &chat_id,
                        RoomCommand::React {
                            conn: self.conn,
                            request,
                        },
                    );
                }
            }
            ClientEvent::EditMessage(request) => {
                if let Some(chat_id) = self.joined_room_of(&request.message_id).await {
                    self.hub.dispatch(
                        &chat_id,
                        RoomCommand::Edit {
                            conn: self.conn,
                            request,
                        },
                    );
                }
            }
            ClientEvent::DeleteMessage(message_id) => {
                if let Some(chat_id) = self.joined_room_of(&message_id).await {
                    self.hub.dispatch(
                        &chat_id,
                        RoomCommand::RequestDelete {
                            conn: self.conn,
                            message_id,
                        },
                    );
                }
            }
            ClientEvent::UndoDeleteMessage(message_id) => {
                let pending = self.hub.lifecycle().pending().chat_of(&message_id);
                match pending {
                    Some(chat_id) if self.rooms.contains(&chat_id) => {
                        self.hub.dispatch(
                            &chat_id,
                            RoomCommand::Undo {
                                conn: self.conn,
                                message_id,
                            },
                        );
                    }
                    _ => debug!(conn = %self.conn, %message_id, "Nothing to undo"),
                }
            }
        }
    }

    /// Resolve the room of a stored message, if this connection joined it.
    async fn joined_room_of(&self, message_id: &MessageId) -> Option<ChatId> {
        match self.hub.lifecycle().locate(message_id).await {
            Ok(Some(chat_id)) if self.rooms.contains(&chat_id) => Some(chat_id),
            Ok(_) => {
                debug!(conn = %self.conn, %message_id, "Message not in a joined room");
                None
            }
            Err(e) => {
                warn!(conn = %self.conn, %message_id, error = %e, "Message lookup failed");
                self.reject("store_unavailable", "message lookup failed, try again");
                None
            }
        }
    }

    fn reject(&self, code: &str, message: impl ToString) {
        let _ = self
            .outbox
            .send(ServerEvent::Error(ErrorNotice::new(code, message)));
    }

    /// Leave every joined room. Called once the socket is gone.
    pub fn close(self) {
        for chat_id in &self.rooms {
            self.hub
                .dispatch(chat_id, RoomCommand::Disconnect { conn: self.conn });
        }
    }
}

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state.hub))
}

async fn handle_socket(socket: WebSocket, hub: Hub) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (outbox, mut inbox) = mpsc::unbounded_channel::<ServerEvent>();
    let mut session = Session::new(hub, outbox);
    let conn = session.connection_id();

    info!(%conn, "Client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(event) = inbox.recv().await {
            let text = match event.to_json() {
                Ok(text) => text,
                Err(e) => {
                    warn!(%conn, event = event.name(), error = %e, "Failed to encode event");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = ws_rx.next() => match frame {
                Some(Ok(Message::Text(text))) => session.handle_text(&text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(%conn, error = %e, "WebSocket error");
                    break;
                }
            },
            _ = &mut send_task => break,
        }
    }

    session.close();
    send_task.abort();
    info!(%conn, "Client disconnected");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use huddle_shared::protocol::{ChatMessage, EditRequest, NewMessage, ReactionRequest};
    use huddle_shared::types::{ChatUser, UserId};
    use huddle_store::{ChatStore, MemoryStore};

    struct Client {
        session: Session,
        inbox: mpsc::UnboundedReceiver<ServerEvent>,
        user: ChatUser,
    }

    impl Client {
        fn new(hub: &Hub, id: &str, name: &str) -> Self {
            let (outbox, inbox) = mpsc::unbounded_channel();
            Self {
                session: Session::new(hub.clone(), outbox),
                inbox,
                user: ChatUser::new(UserId::parse(id).unwrap(), name),
            }
        }

        async fn send(&mut self, event: ClientEvent) {
            self.session.handle_event(event).await;
        }

        async fn join(&mut self, chat: &ChatId) {
            self.send(ClientEvent::Join(chat.clone(), self.user.clone()))
                .await;
        }

        async fn say(&mut self, chat: &ChatId, content: &str) {
            self.send(ClientEvent::Message(NewMessage {
                chat_id: chat.clone(),
                content: content.into(),
                nonce: None,
                sender: self.user.clone(),
                attachments: vec![],
            }))
            .await;
        }

        async fn next(&mut self) -> ServerEvent {
            tokio::time::timeout(Duration::from_secs(60), self.inbox.recv())
                .await
                .expect("event within deadline")
                .expect("outbox open")
        }

        /// Skip presence traffic.
        async fn next_non_presence(&mut self) -> ServerEvent {
            loop {
                match self.next().await {
                    ServerEvent::Presence(_)
                    | ServerEvent::UserJoined(_)
                    | ServerEvent::UserLeft(_) => continue,
                    event => return event,
                }
            }
        }

        async fn next_message(&mut self) -> ChatMessage {
            match self.next_non_presence().await {
                ServerEvent::Message(message) => message,
                other => panic!("expected message, got {other:?}"),
            }
        }

        /// Nothing queued once every task had a chance to run.
        async fn assert_quiet(&mut self) {
            for _ in 0..10 {
                tokio::task::yield_now().await;
            }
            assert!(self.inbox.try_recv().is_err());
        }
    }

    fn setup() -> (Hub, Arc<MemoryStore>, ChatId) {
        let store = Arc::new(MemoryStore::new());
        let hub = Hub::new(store.clone(), Duration::from_secs(5));
        (hub, store, ChatId::parse("r1").unwrap())
    }

    #[tokio::test]
    async fn test_presence_join_and_leave() {
        let (hub, _, chat) = setup();
        let mut a = Client::new(&hub, "a", "alice");
        let mut b = Client::new(&hub, "b", "bob");

        a.join(&chat).await;
        assert_eq!(a.next().await, ServerEvent::Presence(vec![a.user.clone()]));

        b.join(&chat).await;
        let both = vec![a.user.clone(), b.user.clone()];
        assert_eq!(a.next().await, ServerEvent::Presence(both.clone()));
        assert_eq!(a.next().await, ServerEvent::UserJoined(b.user.clone()));
        assert_eq!(b.next().await, ServerEvent::Presence(both));

        // Joining again does not duplicate and sends no userJoined.
        b.join(&chat).await;
        assert_eq!(
            a.next().await,
            ServerEvent::Presence(vec![a.user.clone(), b.user.clone()])
        );

        b.send(ClientEvent::Leave(chat.clone(), b.user.clone())).await;
        assert_eq!(a.next().await, ServerEvent::Presence(vec![a.user.clone()]));
        assert_eq!(a.next().await, ServerEvent::UserLeft(b.user.clone()));
    }

    #[tokio::test]
    async fn test_disconnect_cleans_every_room() {
        let (hub, _, chat) = setup();
        let other = ChatId::parse("r2").unwrap();
        let mut a = Client::new(&hub, "a", "alice");
        let mut b = Client::new(&hub, "b", "bob");

        for room in [&chat, &other] {
            a.join(room).await;
            b.join(room).await;
        }
        let Client { session, .. } = b;
        session.close();

        let mut left = 0;
        while left < 2 {
            if let ServerEvent::UserLeft(user) = a.next().await {
                assert_eq!(user.id.as_str(), "b");
                left += 1;
            }
        }
    }

    #[tokio::test]
    async fn test_multi_tab_identity_stays_present() {
        let (hub, _, chat) = setup();
        let mut a = Client::new(&hub, "a", "alice");
        let mut tab1 = Client::new(&hub, "b", "bob");
        let mut tab2 = Client::new(&hub, "b", "bob");

        a.join(&chat).await;
        tab1.join(&chat).await;
        tab2.join(&chat).await;
        tab1.session.close();

        // presence, presence, userJoined, presence (tab2), presence (tab1 closed)
        let mut events = Vec::new();
        for _ in 0..5 {
            events.push(a.next().await);
        }
        assert!(!events
            .iter()
            .any(|e| matches!(e, ServerEvent::UserLeft(_))));
        assert_eq!(
            events[4],
            ServerEvent::Presence(vec![a.user.clone(), tab2.user.clone()])
        );
        a.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_typing_reaches_others_only() {
        let (hub, _, chat) = setup();
        let mut a = Client::new(&hub, "a", "alice");
        let mut b = Client::new(&hub, "b", "bob");
        a.join(&chat).await;
        b.join(&chat).await;

        a.send(ClientEvent::Typing(chat.clone(), a.user.clone())).await;
        assert_eq!(b.next_non_presence().await, ServerEvent::Typing(a.user.clone()));

        b.send(ClientEvent::Typing(chat.clone(), b.user.clone())).await;
        assert_eq!(a.next_non_presence().await, ServerEvent::Typing(b.user.clone()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_chat_scenario() {
        let (hub, store, chat) = setup();
        let mut a = Client::new(&hub, "a", "alice");
        let mut b = Client::new(&hub, "b", "bob");
        a.join(&chat).await;
        b.join(&chat).await;

        a.say(&chat, "hi").await;
        let received = b.next_message().await;
        assert_eq!(received.content, "hi");
        assert_eq!(received.sender, a.user);
        assert_eq!(a.next_message().await, received);

        b.send(ClientEvent::Reaction(ReactionRequest {
            message_id: received.id.clone(),
            emoji: "👍".into(),
            user: b.user.clone(),
        }))
        .await;
        match a.next_non_presence().await {
            ServerEvent::Reaction(reaction) => {
                assert_eq!(reaction.message_id, received.id);
                assert_eq!(reaction.emoji, "👍");
                assert_eq!(reaction.user, b.user);
            }
            other => panic!("expected reaction, got {other:?}"),
        }
        b.next_non_presence().await;

        a.send(ClientEvent::DeleteMessage(received.id.clone())).await;
        let pending = ServerEvent::MessagePendingDeletion(received.id.clone());
        assert_eq!(a.next_non_presence().await, pending);
        assert_eq!(b.next_non_presence().await, pending);

        tokio::time::advance(Duration::from_secs(10)).await;
        a.send(ClientEvent::UndoDeleteMessage(received.id.clone())).await;
        let undone = ServerEvent::MessageUndoDelete(received.id.clone());
        assert_eq!(a.next_non_presence().await, undone);
        assert_eq!(b.next_non_presence().await, undone);

        tokio::time::advance(Duration::from_secs(60)).await;
        a.assert_quiet().await;
        b.assert_quiet().await;
        let stored = store.find_message(&received.id).await.unwrap().unwrap();
        assert_eq!(stored.reactions.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delete_without_undo_removes_once() {
        let (hub, store, chat) = setup();
        let mut a = Client::new(&hub, "a", "alice");
        let mut b = Client::new(&hub, "b", "bob");
        a.join(&chat).await;
        b.join(&chat).await;

        a.say(&chat, "bye").await;
        let message = b.next_message().await;
        a.next_message().await;

        a.send(ClientEvent::DeleteMessage(message.id.clone())).await;
        // Repeat requests while pending are ignored.
        a.send(ClientEvent::DeleteMessage(message.id.clone())).await;
        let pending = ServerEvent::MessagePendingDeletion(message.id.clone());
        assert_eq!(b.next_non_presence().await, pending);

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(
            b.next_non_presence().await,
            ServerEvent::MessageRemoved(message.id.clone())
        );
        assert!(store.find_message(&message.id).await.unwrap().is_none());

        tokio::time::advance(Duration::from_secs(60)).await;
        b.assert_quiet().await;

        // Undo after removal is a silent no-op.
        a.send(ClientEvent::UndoDeleteMessage(message.id.clone())).await;
        b.assert_quiet().await;
    }

    #[tokio::test]
    async fn test_edit_and_delete_by_other_identity_are_silent() {
        let (hub, store, chat) = setup();
        let mut a = Client::new(&hub, "a", "alice");
        let mut b = Client::new(&hub, "b", "bob");
        a.join(&chat).await;
        b.join(&chat).await;

        a.say(&chat, "mine").await;
        let message = b.next_message().await;
        a.next_message().await;

        b.send(ClientEvent::EditMessage(EditRequest {
            message_id: message.id.clone(),
            new_content: "hijacked".into(),
            nonce: None,
        }))
        .await;
        b.send(ClientEvent::DeleteMessage(message.id.clone())).await;

        a.assert_quiet().await;
        b.assert_quiet().await;
        let stored = store.find_message(&message.id).await.unwrap().unwrap();
        assert_eq!(stored.content, "mine");
        assert_eq!(hub.lifecycle().pending().len(), 0);
    }

    #[tokio::test]
    async fn test_edit_and_delete_use_identity_of_the_room() {
        let (hub, store, chat) = setup();
        let other_room = ChatId::parse("r2").unwrap();
        let mut a = Client::new(&hub, "a", "alice");
        let mut b = Client::new(&hub, "b", "bob");
        b.join(&chat).await;
        a.join(&chat).await;
        // Same connection, different identity in another room.
        a.send(ClientEvent::Join(other_room, b.user.clone())).await;

        b.say(&chat, "from bob").await;
        let bobs = b.next_message().await;
        a.say(&chat, "from alice").await;
        let alices = b.next_message().await;
        assert_eq!(alices.sender, a.user);

        a.send(ClientEvent::EditMessage(EditRequest {
            message_id: alices.id.clone(),
            new_content: "edited".into(),
            nonce: None,
        }))
        .await;
        a.send(ClientEvent::DeleteMessage(bobs.id.clone())).await;

        match b.next_non_presence().await {
            ServerEvent::MessageEdited(edited) => {
                assert_eq!(edited.message_id, alices.id);
                assert_eq!(edited.new_content, "edited");
            }
            other => panic!("expected messageEdited, got {other:?}"),
        }
        b.assert_quiet().await;
        assert_eq!(hub.lifecycle().pending().len(), 0);
        let stored = store.find_message(&bobs.id).await.unwrap().unwrap();
        assert_eq!(stored.content, "from bob");
    }

    #[tokio::test]
    async fn test_edit_window_through_gateway() {
        let (hub, store, chat) = setup();
        let mut a = Client::new(&hub, "a", "alice");
        a.join(&chat).await;
        a.next().await;

        let post = |age_secs: i64| huddle_store::CreateMessage {
            chat_id: chat.clone(),
            sender_id: a.user.id.clone(),
            content: "draft".into(),
            nonce: None,
            attachments: vec![],
            created_at: chrono::Utc::now() - chrono::Duration::seconds(age_secs),
        };
        let fresh = store.create_message(post(9 * 60 + 59)).await.unwrap();
        let stale = store.create_message(post(10 * 60 + 1)).await.unwrap();

        for message in [&stale, &fresh] {
            a.send(ClientEvent::EditMessage(EditRequest {
                message_id: message.id.clone(),
                new_content: "final".into(),
                nonce: Some("bm9uY2U=".into()),
            }))
            .await;
        }

        match a.next().await {
            ServerEvent::MessageEdited(edited) => {
                assert_eq!(edited.message_id, fresh.id);
                assert_eq!(edited.nonce.as_deref(), Some("bm9uY2U="));
            }
            other => panic!("expected messageEdited, got {other:?}"),
        }
        a.assert_quiet().await;
        let stale = store.find_message(&stale.id).await.unwrap().unwrap();
        assert_eq!(stale.content, "draft");
    }

    #[tokio::test]
    async fn test_invalid_frames_answered_with_error() {
        let (hub, _, chat) = setup();
        let mut a = Client::new(&hub, "a", "alice");

        a.session.handle_text("not json").await;
        assert!(matches!(a.next().await, ServerEvent::Error(e) if e.code == "invalid_event"));

        a.session
            .handle_text(r#"{"event":"join","data":["bad id!",{"id":"a","username":"alice"}]}"#)
            .await;
        assert!(matches!(a.next().await, ServerEvent::Error(e) if e.code == "invalid_event"));

        a.join(&chat).await;
        a.next().await;
        a.send(ClientEvent::Message(NewMessage {
            chat_id: chat.clone(),
            content: String::new(),
            nonce: None,
            sender: a.user.clone(),
            attachments: vec![],
        }))
        .await;
        assert!(matches!(a.next().await, ServerEvent::Error(e) if e.code == "validation"));
    }

    #[tokio::test]
    async fn test_spoofed_sender_rejected() {
        let (hub, store, chat) = setup();
        let mut a = Client::new(&hub, "a", "alice");
        let mut b = Client::new(&hub, "b", "bob");
        a.join(&chat).await;
        b.join(&chat).await;
        for _ in 0..3 {
            a.next().await;
        }

        b.send(ClientEvent::Message(NewMessage {
            chat_id: chat.clone(),
            content: "i am alice".into(),
            nonce: None,
            sender: a.user.clone(),
            attachments: vec![],
        }))
        .await;

        a.assert_quiet().await;
        assert!(store.messages_for_chat(&chat).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_not_broadcast() {
        let (hub, store, chat) = setup();
        let mut a = Client::new(&hub, "a", "alice");
        let mut b = Client::new(&hub, "b", "bob");
        a.join(&chat).await;
        b.join(&chat).await;
        // Let both joins register their users before the outage.
        a.next().await;
        b.next().await;

        store.set_unavailable(true);
        a.say(&chat, "lost").await;

        assert!(matches!(
            a.next_non_presence().await,
            ServerEvent::Error(e) if e.code == "store_unavailable"
        ));
        b.assert_quiet().await;
        store.set_unavailable(false);
        assert!(store.messages_for_chat(&chat).await.unwrap().is_empty());
    }
}
