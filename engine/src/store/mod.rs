//! Conversation Store
//!
//! Process-wide, in-memory history of chat conversations. Each conversation is
//! an ordered sequence of [`Exchange`]s capped at a fixed length; appending past
//! the cap drops the oldest exchanges first.
//!
//! Nothing is persisted. Callers depend on the [`ConversationStore`] trait so a
//! persistent backend can replace [`InMemoryConversationStore`] without changes
//! elsewhere.
//!
//! # Concurrency
//!
//! A single `RwLock` guards the whole map. Appends and deletes take the write
//! lock, so appends to the same conversation serialize and the cap is enforced
//! inside the same critical section as the push. Reads clone out a snapshot
//! under the read lock and never observe a half-applied append.

use sdk::errors::EngineError;
use sdk::types::{preview, ConversationSummary, Exchange};
use std::collections::{HashMap, VecDeque};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Default number of exchanges kept per conversation
pub const DEFAULT_MAX_EXCHANGES: usize = 20;

/// Default preview length in listings
pub const DEFAULT_PREVIEW_CHARS: usize = 50;

/// Storage capability used by the orchestrator and the HTTP layer
pub trait ConversationStore: Send + Sync {
    /// Return `id` if it names a known conversation, otherwise create an empty
    /// conversation under a fresh id and return that.
    fn create_or_get(&self, id: Option<&str>) -> String;

    /// Append an exchange, creating the conversation if needed, then trim the
    /// oldest exchanges until the cap holds.
    fn append(&self, id: &str, exchange: Exchange);

    /// Chronological history of a conversation
    fn get(&self, id: &str) -> Result<Vec<Exchange>, EngineError>;

    /// Non-empty conversations, most recently active first
    fn list(&self) -> Vec<ConversationSummary>;

    /// Remove a conversation entirely
    fn delete(&self, id: &str) -> Result<(), EngineError>;

    /// Remove a conversation only if it holds no exchanges. Returns whether
    /// it was removed.
    fn discard_if_empty(&self, id: &str) -> bool;
}

#[derive(Debug)]
struct Conversation {
    exchanges: VecDeque<Exchange>,
    /// Creation order, used to break ties in listings
    seq: u64,
}

#[derive(Debug, Default)]
struct StoreState {
    conversations: HashMap<String, Conversation>,
    next_seq: u64,
}

impl StoreState {
    fn insert_empty(&mut self, id: String) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.conversations.insert(
            id,
            Conversation {
                exchanges: VecDeque::new(),
                seq,
            },
        );
    }

    fn fresh_id(&self) -> String {
        loop {
            let id = Uuid::new_v4().to_string();
            if !self.conversations.contains_key(&id) {
                return id;
            }
        }
    }
}

/// In-memory [`ConversationStore`] behind one coarse lock
#[derive(Debug)]
pub struct InMemoryConversationStore {
    state: RwLock<StoreState>,
    max_exchanges: usize,
    preview_chars: usize,
}

impl InMemoryConversationStore {
    /// Create a store with the default cap (20) and preview length (50)
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_MAX_EXCHANGES, DEFAULT_PREVIEW_CHARS)
    }

    /// Create a store with explicit limits. A cap of 0 is raised to 1.
    pub fn with_limits(max_exchanges: usize, preview_chars: usize) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            max_exchanges: max_exchanges.max(1),
            preview_chars,
        }
    }

    pub fn max_exchanges(&self) -> usize {
        self.max_exchanges
    }

    /// Number of conversations, including empty ones
    pub fn len(&self) -> usize {
        self.read().conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // Every mutation finishes inside its critical section, so a poisoned lock
    // still guards a consistent map.
    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryConversationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationStore for InMemoryConversationStore {
    fn create_or_get(&self, id: Option<&str>) -> String {
        let requested = id.map(str::trim).filter(|id| !id.is_empty());

        if let Some(id) = requested {
            if self.read().conversations.contains_key(id) {
                return id.to_string();
            }
        }

        let mut state = self.write();

        // Another request may have created it between the two locks
        if let Some(id) = requested {
            if state.conversations.contains_key(id) {
                return id.to_string();
            }
        }

        let id = state.fresh_id();
        state.insert_empty(id.clone());
        tracing::debug!(conversation_id = %id, "Created conversation");
        id
    }

    fn append(&self, id: &str, exchange: Exchange) {
        let mut state = self.write();

        if !state.conversations.contains_key(id) {
            state.insert_empty(id.to_string());
        }

        if let Some(conversation) = state.conversations.get_mut(id) {
            conversation.exchanges.push_back(exchange);
            while conversation.exchanges.len() > self.max_exchanges {
                conversation.exchanges.pop_front();
            }
        }
    }

    fn get(&self, id: &str) -> Result<Vec<Exchange>, EngineError> {
        self.read()
            .conversations
            .get(id)
            .map(|c| c.exchanges.iter().cloned().collect())
            .ok_or_else(|| EngineError::NotFound(id.to_string()))
    }

    fn list(&self) -> Vec<ConversationSummary> {
        let state = self.read();

        let mut summaries: Vec<(u64, ConversationSummary)> = state
            .conversations
            .iter()
            .filter_map(|(id, conversation)| {
                let last = conversation.exchanges.back()?;
                Some((
                    conversation.seq,
                    ConversationSummary {
                        id: id.clone(),
                        preview: preview(&last.user_text, self.preview_chars),
                        timestamp: last.timestamp,
                        message_count: conversation.exchanges.len(),
                    },
                ))
            })
            .collect();

        summaries.sort_by(|(seq_a, a), (seq_b, b)| {
            b.timestamp.cmp(&a.timestamp).then(seq_a.cmp(seq_b))
        });

        summaries.into_iter().map(|(_, summary)| summary).collect()
    }

    fn delete(&self, id: &str) -> Result<(), EngineError> {
        match self.write().conversations.remove(id) {
            Some(_) => {
                tracing::debug!(conversation_id = %id, "Deleted conversation");
                Ok(())
            }
            None => Err(EngineError::NotFound(id.to_string())),
        }
    }

    fn discard_if_empty(&self, id: &str) -> bool {
        let mut state = self.write();
        let empty = state
            .conversations
            .get(id)
            .is_some_and(|c| c.exchanges.is_empty());
        if empty {
            state.conversations.remove(id);
            tracing::debug!(conversation_id = %id, "Discarded empty conversation");
        }
        empty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn exchange(n: usize) -> Exchange {
        Exchange::new(format!("user {}", n), format!("ai {}", n), "default")
    }

    #[test]
    fn test_create_or_get_without_id_creates_empty_conversation() {
        let store = InMemoryConversationStore::new();
        let id = store.create_or_get(None);

        assert!(!id.is_empty());
        assert_eq!(store.get(&id).unwrap(), Vec::new());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_create_or_get_known_id_is_stable() {
        let store = InMemoryConversationStore::new();
        let id = store.create_or_get(None);

        assert_eq!(store.create_or_get(Some(&id)), id);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_create_or_get_unknown_id_generates_new_one() {
        let store = InMemoryConversationStore::new();
        let id = store.create_or_get(Some("does-not-exist"));

        assert_ne!(id, "does-not-exist");
        assert!(store.get("does-not-exist").is_err());
        assert!(store.get(&id).is_ok());
    }

    #[test]
    fn test_append_trims_oldest_beyond_cap() {
        let store = InMemoryConversationStore::new();
        let id = store.create_or_get(None);

        for n in 0..25 {
            store.append(&id, exchange(n));
        }

        let history = store.get(&id).unwrap();
        assert_eq!(history.len(), 20);
        assert_eq!(history.first().unwrap().user_text, "user 5");
        assert_eq!(history.last().unwrap().user_text, "user 24");
    }

    #[test]
    fn test_append_creates_missing_conversation() {
        let store = InMemoryConversationStore::new();
        store.append("manual-id", exchange(1));

        assert_eq!(store.get("manual-id").unwrap().len(), 1);
    }

    #[test]
    fn test_get_unknown_is_not_found() {
        let store = InMemoryConversationStore::new();
        assert!(matches!(store.get("nope"), Err(EngineError::NotFound(_))));
    }

    #[test]
    fn test_delete_twice_reports_not_found() {
        let store = InMemoryConversationStore::new();
        let id = store.create_or_get(None);
        store.append(&id, exchange(1));

        assert!(store.delete(&id).is_ok());
        assert!(matches!(store.delete(&id), Err(EngineError::NotFound(_))));
        assert!(matches!(store.get(&id), Err(EngineError::NotFound(_))));
        assert!(store.list().is_empty());
    }

    #[test]
    fn test_discard_if_empty_keeps_used_conversations() {
        let store = InMemoryConversationStore::new();
        let empty = store.create_or_get(None);
        let used = store.create_or_get(None);
        store.append(&used, exchange(1));

        assert!(store.discard_if_empty(&empty));
        assert!(!store.discard_if_empty(&used));
        assert!(!store.discard_if_empty("unknown"));
        assert_eq!(store.len(), 1);
        assert!(store.get(&used).is_ok());
    }

    #[test]
    fn test_list_excludes_empty_conversations() {
        let store = InMemoryConversationStore::new();
        let empty = store.create_or_get(None);
        let used = store.create_or_get(None);
        store.append(&used, exchange(1));

        let ids: Vec<String> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![used]);
        assert!(!ids.contains(&empty));
    }

    #[test]
    fn test_list_orders_by_last_exchange_then_creation() {
        let store = InMemoryConversationStore::new();
        let base = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();

        let a = store.create_or_get(None);
        let b = store.create_or_get(None);
        let c = store.create_or_get(None);

        store.append(&a, Exchange::at("a", "x", "default", base));
        store.append(&b, Exchange::at("b", "x", "default", base + Duration::seconds(10)));
        // Same timestamp as `a`; `a` was created first so it sorts first
        store.append(&c, Exchange::at("c", "x", "default", base));

        let ids: Vec<String> = store.list().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![b, a, c]);
    }

    #[test]
    fn test_list_summary_preview_and_count() {
        let store = InMemoryConversationStore::with_limits(20, 10);
        let id = store.create_or_get(None);
        store.append(&id, Exchange::new("short", "x", "default"));
        store.append(&id, Exchange::new("a much longer message", "x", "default"));

        let summary = store.list().pop().unwrap();
        assert_eq!(summary.preview, "a much lon...");
        assert_eq!(summary.message_count, 2);
    }
}
