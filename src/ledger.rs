// src/ledger.rs
//
// Per-process read-state service: per-room last-message and last-read
// bookkeeping plus the per-user pending-join-request flag. Advisory
// only — losing it loses unread indicators, never server-side state.
// The broadcast channel keeps concurrent views (open sockets, polling
// handlers) in sync, standing in for a cross-tab storage event.

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum LedgerEvent {
    MessageRecorded { room_id: String, sender_id: String },
    MarkedRead { room_id: String, user_id: String },
    JoinRequestsFlagged { user_id: String },
    JoinRequestsCleared { user_id: String },
}

pub trait ReadStateLedger: Send + Sync {
    fn record_message(&self, room_id: &str, at: DateTime<Utc>, sender_id: &str);
    fn last_message(&self, room_id: &str) -> Option<(DateTime<Utc>, String)>;

    fn mark_read(&self, room_id: &str, user_id: &str, at: DateTime<Utc>);
    fn last_read(&self, room_id: &str, user_id: &str) -> Option<DateTime<Utc>>;

    /// True when the room holds a message newer than the user's last-read
    /// mark and that message came from someone else.
    fn has_unread(&self, room_id: &str, user_id: &str) -> bool;

    fn flag_join_requests(&self, user_id: &str);
    fn clear_join_requests(&self, user_id: &str);
    fn has_new_join_requests(&self, user_id: &str) -> bool;

    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent>;
}

pub struct MemoryLedger {
    last_message: RwLock<HashMap<String, (DateTime<Utc>, String)>>,
    last_read: RwLock<HashMap<(String, String), DateTime<Utc>>>,
    request_flags: RwLock<HashSet<String>>,
    events: broadcast::Sender<LedgerEvent>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        MemoryLedger {
            last_message: RwLock::new(HashMap::new()),
            last_read: RwLock::new(HashMap::new()),
            request_flags: RwLock::new(HashSet::new()),
            events,
        }
    }

    fn emit(&self, event: LedgerEvent) {
        // No receivers is fine; the send result only reports that.
        let _ = self.events.send(event);
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ReadStateLedger for MemoryLedger {
    fn record_message(&self, room_id: &str, at: DateTime<Utc>, sender_id: &str) {
        if let Ok(mut map) = self.last_message.write() {
            map.insert(room_id.to_string(), (at, sender_id.to_string()));
        }
        self.emit(LedgerEvent::MessageRecorded {
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
        });
    }

    fn last_message(&self, room_id: &str) -> Option<(DateTime<Utc>, String)> {
        self.last_message.read().ok()?.get(room_id).cloned()
    }

    fn mark_read(&self, room_id: &str, user_id: &str, at: DateTime<Utc>) {
        if let Ok(mut map) = self.last_read.write() {
            map.insert((room_id.to_string(), user_id.to_string()), at);
        }
        self.emit(LedgerEvent::MarkedRead {
            room_id: room_id.to_string(),
            user_id: user_id.to_string(),
        });
    }

    fn last_read(&self, room_id: &str, user_id: &str) -> Option<DateTime<Utc>> {
        self.last_read
            .read()
            .ok()?
            .get(&(room_id.to_string(), user_id.to_string()))
            .copied()
    }

    fn has_unread(&self, room_id: &str, user_id: &str) -> bool {
        let Some((at, sender_id)) = self.last_message(room_id) else {
            return false;
        };
        if sender_id == user_id {
            return false;
        }
        match self.last_read(room_id, user_id) {
            Some(read_at) => read_at < at,
            None => true,
        }
    }

    fn flag_join_requests(&self, user_id: &str) {
        if let Ok(mut flags) = self.request_flags.write() {
            flags.insert(user_id.to_string());
        }
        self.emit(LedgerEvent::JoinRequestsFlagged {
            user_id: user_id.to_string(),
        });
    }

    fn clear_join_requests(&self, user_id: &str) {
        if let Ok(mut flags) = self.request_flags.write() {
            flags.remove(user_id);
        }
        self.emit(LedgerEvent::JoinRequestsCleared {
            user_id: user_id.to_string(),
        });
    }

    fn has_new_join_requests(&self, user_id: &str) -> bool {
        self.request_flags
            .read()
            .map(|flags| flags.contains(user_id))
            .unwrap_or(false)
    }

    fn subscribe(&self) -> broadcast::Receiver<LedgerEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn unread_clears_per_reader_only() {
        let ledger = MemoryLedger::new();
        let t1 = Utc::now();
        ledger.record_message("r1", t1, "alice");

        assert!(ledger.has_unread("r1", "bob"));
        assert!(ledger.has_unread("r1", "carol"));
        // The sender never sees their own message as unread.
        assert!(!ledger.has_unread("r1", "alice"));

        let t2 = t1 + Duration::seconds(5);
        ledger.mark_read("r1", "bob", t2);
        assert!(ledger.last_read("r1", "bob").unwrap() >= t2);
        assert!(!ledger.has_unread("r1", "bob"));
        assert!(ledger.has_unread("r1", "carol"));
    }

    #[test]
    fn stale_read_mark_stays_unread() {
        let ledger = MemoryLedger::new();
        let t1 = Utc::now();
        ledger.mark_read("r1", "bob", t1 - Duration::seconds(10));
        ledger.record_message("r1", t1, "alice");
        assert!(ledger.has_unread("r1", "bob"));
    }

    #[test]
    fn join_request_flag_lifecycle() {
        let ledger = MemoryLedger::new();
        assert!(!ledger.has_new_join_requests("admin"));
        ledger.flag_join_requests("admin");
        assert!(ledger.has_new_join_requests("admin"));
        ledger.clear_join_requests("admin");
        assert!(!ledger.has_new_join_requests("admin"));
    }

    #[tokio::test]
    async fn changes_reach_subscribers() {
        let ledger = MemoryLedger::new();
        let mut events = ledger.subscribe();
        ledger.record_message("r1", Utc::now(), "alice");
        match events.recv().await.unwrap() {
            LedgerEvent::MessageRecorded { room_id, sender_id } => {
                assert_eq!(room_id, "r1");
                assert_eq!(sender_id, "alice");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
