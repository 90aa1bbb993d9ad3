//! Conversation reader
//!
//! History is "most recent N, then oldest first": the store hands back the
//! newest rows and they are reversed for display.

use std::sync::Arc;

use super::protocol::check_identity;
use crate::core::error::Result;
use crate::core::models::Message;
use crate::core::store::RelayStore;

#[derive(Clone)]
pub struct ConversationReader {
    store: Arc<dyn RelayStore>,
    /// Upper bound and default for `limit`.
    cap: usize,
}

impl ConversationReader {
    pub fn new(store: Arc<dyn RelayStore>, cap: usize) -> Self {
        Self { store, cap }
    }

    /// Messages between `a` and `b` in either direction, ascending by
    /// creation time. `limit` is clamped to the cap; `Some(0)` yields nothing.
    pub async fn history(&self, a: &str, b: &str, limit: Option<usize>) -> Result<Vec<Message>> {
        check_identity("id1", a)?;
        check_identity("id2", b)?;

        let limit = limit.unwrap_or(self.cap).min(self.cap);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut messages = self.store.messages_between(a, b, limit).await?;
        messages.reverse();
        Ok(messages)
    }

    /// Newest messages across every conversation, newest first.
    pub async fn recent(&self, limit: usize) -> Result<Vec<Message>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.store.recent_messages(limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::Error;
    use crate::core::models::{Ciphertext, NewMessage};
    use crate::core::store::MemoryStore;

    async fn seed(store: &MemoryStore, count: u8) {
        for i in 0..count {
            let (from, to) = if i % 2 == 0 { ("a", "b") } else { ("b", "a") };
            store
                .record_message(NewMessage {
                    from: from.into(),
                    to: to.into(),
                    ciphertext: Ciphertext::new(vec![i]),
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_history_caps_to_most_recent_ascending() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 60).await;
        let reader = ConversationReader::new(store, 50);

        let history = reader.history("a", "b", Some(50)).await.unwrap();
        assert_eq!(history.len(), 50);

        let bytes: Vec<u8> = history.iter().map(|m| m.ciphertext.as_bytes()[0]).collect();
        assert_eq!(bytes, (10..60).collect::<Vec<u8>>());
        assert!(history.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    }

    #[tokio::test]
    async fn test_limit_is_clamped_to_cap() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 20).await;
        let reader = ConversationReader::new(store, 5);

        assert_eq!(reader.history("a", "b", Some(500)).await.unwrap().len(), 5);
        assert_eq!(reader.history("a", "b", None).await.unwrap().len(), 5);
        assert_eq!(reader.history("a", "b", Some(2)).await.unwrap().len(), 2);
        assert!(reader.history("a", "b", Some(0)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_history_is_symmetric_and_repeatable() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 4).await;
        let reader = ConversationReader::new(store, 50);

        let ab = reader.history("a", "b", None).await.unwrap();
        let ba = reader.history("b", "a", None).await.unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab, reader.history("a", "b", None).await.unwrap());
    }

    #[tokio::test]
    async fn test_history_rejects_empty_ids() {
        let reader = ConversationReader::new(Arc::new(MemoryStore::new()), 50);
        let err = reader.history("", "b", None).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_recent_spans_conversations() {
        let store = Arc::new(MemoryStore::new());
        seed(&store, 3).await;
        store
            .record_message(NewMessage {
                from: "c".into(),
                to: "d".into(),
                ciphertext: Ciphertext::new(vec![99]),
            })
            .await
            .unwrap();
        let reader = ConversationReader::new(store, 50);

        let recent = reader.recent(2).await.unwrap();
        let bytes: Vec<u8> = recent.iter().map(|m| m.ciphertext.as_bytes()[0]).collect();
        assert_eq!(bytes, vec![99, 2]);
        assert!(reader.recent(0).await.unwrap().is_empty());
    }
}
