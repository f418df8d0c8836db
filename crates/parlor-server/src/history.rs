//! Bounded per-conversation message history.
//!
//! Each conversation keeps at most `limit` messages; appending past the
//! bound drops the oldest first. Appends hold the owning shard's entry lock
//! across push and trim, so concurrent writers to one conversation cannot
//! overshoot the bound.

use std::collections::VecDeque;

use dashmap::DashMap;
use tracing::debug;

use parlor_shared::{ChatMessage, ConversationKey};

#[derive(Debug)]
pub struct ChatHistory {
    conversations: DashMap<ConversationKey, VecDeque<ChatMessage>>,
    limit: usize,
}

impl ChatHistory {
    /// `limit` is clamped to at least one message.
    pub fn new(limit: usize) -> Self {
        Self {
            conversations: DashMap::new(),
            limit: limit.max(1),
        }
    }

    /// Append a message, evicting from the front past the bound.
    /// Returns the conversation length afterwards.
    pub fn append(&self, key: &ConversationKey, message: ChatMessage) -> usize {
        let mut entry = self.conversations.entry(key.clone()).or_default();
        entry.push_back(message);

        let mut evicted = 0usize;
        while entry.len() > self.limit {
            entry.pop_front();
            evicted += 1;
        }

        if evicted > 0 {
            debug!(conversation = %key, evicted, "Evicted oldest history entries");
        }
        entry.len()
    }

    /// Messages for a conversation in insertion order. Empty if unknown.
    pub fn get(&self, key: &ConversationKey) -> Vec<ChatMessage> {
        self.conversations
            .get(key)
            .map(|entry| entry.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Drop a conversation entirely. Returns whether it existed.
    pub fn clear(&self, key: &ConversationKey) -> bool {
        self.conversations.remove(key).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn msg(i: usize) -> ChatMessage {
        ChatMessage::text("alice", Some("bob"), format!("m{i}"))
    }

    #[test]
    fn test_fifo_eviction_keeps_most_recent() {
        let history = ChatHistory::new(100);
        let key = ConversationKey::between("alice", "bob");

        for i in 0..150 {
            history.append(&key, msg(i));
        }

        let kept = history.get(&key);
        assert_eq!(kept.len(), 100);
        assert_eq!(kept.first().unwrap().content, "m50");
        assert_eq!(kept.last().unwrap().content, "m149");
        assert!(kept
            .windows(2)
            .all(|w| w[0].content[1..].parse::<usize>().unwrap()
                < w[1].content[1..].parse::<usize>().unwrap()));
    }

    #[test]
    fn test_unknown_conversation_is_empty() {
        let history = ChatHistory::new(10);
        assert!(history
            .get(&ConversationKey::between("x", "y"))
            .is_empty());
    }

    #[test]
    fn test_clear_removes_and_is_idempotent() {
        let history = ChatHistory::new(10);
        let key = ConversationKey::between("alice", "bob");
        history.append(&key, msg(0));
        history.append(&key, msg(1));

        assert!(history.clear(&key));
        assert!(history.get(&key).is_empty());
        assert!(history.conversations.is_empty());
        assert!(!history.clear(&key));

        assert_eq!(history.append(&key, msg(2)), 1);
    }

    #[test]
    fn test_conversations_are_independent() {
        let history = ChatHistory::new(2);
        let ab = ConversationKey::between("a", "b");
        let ac = ConversationKey::between("a", "c");

        for i in 0..5 {
            history.append(&ab, msg(i));
        }
        history.append(&ac, msg(9));

        assert_eq!(history.get(&ab).len(), 2);
        assert_eq!(history.get(&ac).len(), 1);
    }

    #[test]
    fn test_concurrent_appends_respect_bound() {
        let history = Arc::new(ChatHistory::new(100));
        let key = ConversationKey::between("alice", "bob");

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let history = Arc::clone(&history);
                let key = key.clone();
                std::thread::spawn(move || {
                    for i in 0..100 {
                        let len = history.append(&key, msg(t * 1000 + i));
                        assert!(len <= 100);
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(history.get(&key).len(), 100);
    }

    #[test]
    fn test_zero_limit_clamped() {
        let history = ChatHistory::new(0);
        let key = ConversationKey::between("a", "b");
        history.append(&key, msg(0));
        assert_eq!(history.append(&key, msg(1)), 1);
    }
}
