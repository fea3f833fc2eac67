// src/chat_server.rs
//
// Live-feed fan-out. One actor holds every open WebSocket session; a
// posted message is persisted with a server timestamp, recorded in the
// read-state ledger, and pushed to the sessions of every other room
// member. Clients key pushes by room id.

use std::collections::HashMap;
use std::sync::Arc;

use actix::prelude::*;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::ledger::ReadStateLedger;
use crate::models::{Message as StoredMessage, MESSAGES};
use crate::rooms;
use crate::store::{self, DataStore};

#[derive(Debug, Clone, Serialize)]
pub struct MessageResponse {
    pub id: String,
    pub room_id: String,
    pub sender_id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

impl From<StoredMessage> for MessageResponse {
    fn from(message: StoredMessage) -> Self {
        MessageResponse {
            id: message.id,
            room_id: message.room_id,
            sender_id: message.sender_id,
            text: message.text,
            created_at: message.created_at.to_chrono(),
        }
    }
}

#[derive(Message, Clone)]
#[rtype(result = "()")]
pub enum WsMessage {
    Chat(MessageResponse),
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Connect {
    pub user_id: String,
    pub addr: Recipient<WsMessage>,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub user_id: String,
    pub addr: Recipient<WsMessage>,
}

#[derive(Message)]
#[rtype(result = "Result<MessageResponse, AppError>")]
pub struct SendMessage {
    pub user_id: String,
    pub room_id: String,
    pub text: String,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct MarkRead {
    pub user_id: String,
    pub room_id: String,
}

pub struct ChatServer {
    // Multiple connections per user (several open tabs/devices).
    sessions: HashMap<String, Vec<Recipient<WsMessage>>>,
    store: Arc<dyn DataStore>,
    ledger: Arc<dyn ReadStateLedger>,
}

impl ChatServer {
    pub fn new(store: Arc<dyn DataStore>, ledger: Arc<dyn ReadStateLedger>) -> Self {
        ChatServer {
            sessions: HashMap::new(),
            store,
            ledger,
        }
    }
}

impl Actor for ChatServer {
    type Context = Context<Self>;
}

impl Handler<Connect> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) {
        info!("user {} connected (ws)", msg.user_id);
        self.sessions.entry(msg.user_id).or_default().push(msg.addr);
    }
}

impl Handler<Disconnect> for ChatServer {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        info!("user {} disconnected (ws)", msg.user_id);
        if let Some(addrs) = self.sessions.get_mut(&msg.user_id) {
            addrs.retain(|a| a != &msg.addr);
            if addrs.is_empty() {
                self.sessions.remove(&msg.user_id);
            }
        }
    }
}

impl Handler<SendMessage> for ChatServer {
    type Result = ResponseFuture<Result<MessageResponse, AppError>>;

    fn handle(&mut self, msg: SendMessage, _: &mut Context<Self>) -> Self::Result {
        let store = self.store.clone();
        let ledger = self.ledger.clone();
        let sessions = self.sessions.clone();
        Box::pin(async move {
            if msg.text.trim().is_empty() {
                return Err(AppError::Validation("message text must not be empty".into()));
            }
            let room =
                rooms::require_feed_access(store.as_ref(), &msg.room_id, &msg.user_id).await?;

            let message = StoredMessage {
                id: Uuid::new_v4().to_string(),
                room_id: msg.room_id.clone(),
                sender_id: msg.user_id.clone(),
                text: msg.text.clone(),
                created_at: store.server_timestamp(),
            };
            store
                .create(MESSAGES, &message.id, store::to_doc(&message)?)
                .await?;
            ledger.record_message(&msg.room_id, message.created_at.to_chrono(), &msg.user_id);

            let response = MessageResponse::from(message);
            for member in &room.members {
                if member == &msg.user_id {
                    continue;
                }
                if let Some(addrs) = sessions.get(member) {
                    for addr in addrs {
                        addr.do_send(WsMessage::Chat(response.clone()));
                    }
                }
            }
            Ok(response)
        })
    }
}

impl Handler<MarkRead> for ChatServer {
    type Result = ResponseFuture<()>;

    fn handle(&mut self, msg: MarkRead, _: &mut Context<Self>) -> Self::Result {
        let store = self.store.clone();
        let ledger = self.ledger.clone();
        Box::pin(async move {
            if let Err(err) =
                mark_read_checked(store.as_ref(), ledger.as_ref(), &msg.room_id, &msg.user_id).await
            {
                warn!(
                    "read mark by {} for room {} refused: {}",
                    msg.user_id, msg.room_id, err
                );
            }
        })
    }
}

/// Marks a room read for a user, refusing when the user cannot read the
/// room's feed. Both the WS `read` frame and the HTTP read endpoint go
/// through here.
pub async fn mark_read_checked(
    store: &dyn DataStore,
    ledger: &dyn ReadStateLedger,
    room_id: &str,
    user_id: &str,
) -> Result<(), AppError> {
    rooms::require_feed_access(store, room_id, user_id).await?;
    ledger.mark_read(room_id, user_id, Utc::now());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::models::USERS;
    use crate::rooms::ensure_dm_room;
    use crate::store::memory::MemoryStore;
    use crate::testutil::user;

    #[tokio::test]
    async fn read_marks_require_room_membership() {
        let store = MemoryStore::new();
        let ledger = MemoryLedger::new();
        let alice = user("alice");
        let bob = user("bob");
        for u in [&alice, &bob] {
            store
                .create(USERS, &u.id, store::to_doc(u).unwrap())
                .await
                .unwrap();
        }
        let room = ensure_dm_room(&store, &alice, &bob).await.unwrap();
        ledger.record_message(&room.id, Utc::now(), "alice");

        let err = mark_read_checked(&store, &ledger, &room.id, "mallory")
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::PermissionDenied(_)));
        assert!(ledger.last_read(&room.id, "mallory").is_none());

        mark_read_checked(&store, &ledger, &room.id, "bob")
            .await
            .unwrap();
        assert!(ledger.last_read(&room.id, "bob").is_some());
        assert!(!ledger.has_unread(&room.id, "bob"));
    }
}
