//! In-process store, used by tests and `DATABASE_URL=memory`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;

use super::{next_timestamp, RelayStore};
use crate::core::error::Result;
use crate::core::models::{
    Conversation, ConversationKey, Identity, Message, NewMessage, StoreCounts,
};

#[derive(Default)]
struct Inner {
    identities: HashMap<String, Identity>,
    conversations: HashMap<ConversationKey, Conversation>,
    /// Append-only, ordered by `seq`.
    messages: Vec<Message>,
    next_seq: i64,
    last_created_at: Option<DateTime<Utc>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelayStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn upsert_identity(&self, identity: &Identity) -> Result<()> {
        self.inner
            .write()
            .identities
            .insert(identity.id.clone(), identity.clone());
        Ok(())
    }

    async fn find_identity(&self, id: &str) -> Result<Option<Identity>> {
        Ok(self.inner.read().identities.get(id).cloned())
    }

    async fn list_identities(&self) -> Result<Vec<Identity>> {
        let mut all: Vec<Identity> = self.inner.read().identities.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn touch_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        if let Some(identity) = self.inner.write().identities.get_mut(id) {
            identity.last_seen = at;
        }
        Ok(())
    }

    async fn record_message(&self, message: NewMessage) -> Result<Message> {
        let mut inner = self.inner.write();

        let created_at = match inner.last_created_at {
            Some(last) => next_timestamp(last),
            None => Utc::now(),
        };
        inner.last_created_at = Some(created_at);
        inner.next_seq += 1;

        let stored = Message {
            id: Message::new_id(),
            seq: inner.next_seq,
            conversation_key: message.conversation_key(),
            from: message.from,
            to: message.to,
            ciphertext: message.ciphertext,
            created_at,
            delivered: false,
        };
        inner.conversations.insert(
            stored.conversation_key.clone(),
            Conversation {
                key: stored.conversation_key.clone(),
                last_message_at: created_at,
            },
        );
        inner.messages.push(stored.clone());
        Ok(stored)
    }

    async fn find_conversation(&self, key: &ConversationKey) -> Result<Option<Conversation>> {
        Ok(self.inner.read().conversations.get(key).cloned())
    }

    async fn count_conversations(&self) -> Result<u64> {
        Ok(self.inner.read().conversations.len() as u64)
    }

    async fn messages_between(&self, a: &str, b: &str, limit: usize) -> Result<Vec<Message>> {
        let inner = self.inner.read();
        Ok(inner
            .messages
            .iter()
            .rev()
            .filter(|m| (m.from == a && m.to == b) || (m.from == b && m.to == a))
            .take(limit)
            .cloned()
            .collect())
    }

    async fn recent_messages(&self, limit: usize) -> Result<Vec<Message>> {
        let inner = self.inner.read();
        Ok(inner.messages.iter().rev().take(limit).cloned().collect())
    }

    async fn mark_delivered(&self, message_id: &str) -> Result<()> {
        let mut inner = self.inner.write();
        if let Some(message) = inner.messages.iter_mut().find(|m| m.id == message_id) {
            message.delivered = true;
        }
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let inner = self.inner.read();
        Ok(StoreCounts {
            total_messages: inner.messages.len() as u64,
            total_users: inner.identities.len() as u64,
        })
    }
}
