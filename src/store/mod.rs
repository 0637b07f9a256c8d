//! Message persistence collaborator.
//!
//! The durable system of record lives outside this service; this trait is
//! the create/query interface the relay consumes. Fan-out always runs after
//! `create` has returned, so persistence is authoritative regardless of what
//! happens on the real-time channel. The in-memory implementation backs
//! tests and single-process deploys.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::Result;
use crate::relay::{MessageRecord, NewMessage};

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Persist a message, assigning its id and creation timestamp.
    async fn create(&self, new: NewMessage) -> Result<MessageRecord>;

    /// Full history between two users, both directions, oldest first.
    async fn conversation(&self, a: &str, b: &str) -> Result<Vec<MessageRecord>>;
}

pub struct MemoryMessageStore {
    messages: RwLock<Vec<MessageRecord>>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self {
            messages: RwLock::new(Vec::new()),
        }
    }

    pub fn shared() -> Arc<dyn MessageStore> {
        Arc::new(Self::new())
    }
}

impl Default for MemoryMessageStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn create(&self, new: NewMessage) -> Result<MessageRecord> {
        let record = MessageRecord {
            id: Uuid::new_v4(),
            sender_id: new.sender_id,
            receiver_id: new.receiver_id,
            text: new.text,
            media_url: new.media_url,
            created_at: Utc::now(),
        };

        self.messages.write().await.push(record.clone());

        tracing::debug!(
            message_id = %record.id,
            sender_id = %record.sender_id,
            receiver_id = %record.receiver_id,
            "Message persisted"
        );

        Ok(record)
    }

    async fn conversation(&self, a: &str, b: &str) -> Result<Vec<MessageRecord>> {
        // Insertion order is creation order, so this is already oldest-first
        let messages = self.messages.read().await;
        Ok(messages
            .iter()
            .filter(|m| {
                (m.sender_id == a && m.receiver_id == b)
                    || (m.sender_id == b && m.receiver_id == a)
            })
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    fn new_message(sender: &str, receiver: &str, text: &str) -> NewMessage {
        NewMessage {
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            text: Some(text.to_string()),
            media_url: None,
        }
    }

    #[tokio::test]
    async fn test_create_assigns_id_and_timestamp() {
        let store = MemoryMessageStore::new();

        let before = Utc::now();
        let record = assert_ok!(store.create(new_message("alice", "bob", "hi")).await);

        assert!(!record.id.is_nil());
        assert!(record.created_at >= before);
        assert_eq!(record.text.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn test_conversation_covers_both_directions() {
        let store = MemoryMessageStore::new();

        store.create(new_message("alice", "bob", "one")).await.unwrap();
        store.create(new_message("bob", "alice", "two")).await.unwrap();
        store.create(new_message("alice", "carol", "other")).await.unwrap();

        let conversation = store.conversation("alice", "bob").await.unwrap();
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation[0].text.as_deref(), Some("one"));
        assert_eq!(conversation[1].text.as_deref(), Some("two"));

        // Symmetric regardless of argument order
        let reversed = store.conversation("bob", "alice").await.unwrap();
        assert_eq!(reversed.len(), 2);
    }

    #[tokio::test]
    async fn test_conversation_empty_for_strangers() {
        let store = MemoryMessageStore::new();
        assert!(store.conversation("x", "y").await.unwrap().is_empty());
    }
}
