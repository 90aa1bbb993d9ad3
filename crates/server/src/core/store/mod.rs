//! Persistence adapter
//!
//! Durable storage for identities, conversations and messages sits behind
//! [`RelayStore`]. Every call is a single attempt; callers decide what a
//! failure means for them.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::core::error::Result;
use crate::core::models::{
    Conversation, ConversationKey, Identity, Message, NewMessage, StoreCounts,
};

#[async_trait]
pub trait RelayStore: Send + Sync {
    /// Cheap round trip used at startup to refuse serving without storage.
    async fn ping(&self) -> Result<()>;

    /// Insert or overwrite the identity with the same id.
    async fn upsert_identity(&self, identity: &Identity) -> Result<()>;

    async fn find_identity(&self, id: &str) -> Result<Option<Identity>>;

    /// All identities, ordered by id.
    async fn list_identities(&self) -> Result<Vec<Identity>>;

    /// Set `last_seen`. Unknown ids are ignored.
    async fn touch_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Persist a new message and upsert its conversation with
    /// `last_message_at = created_at`, as one atomic step.
    ///
    /// Assigns the message id, the store sequence and a `created_at` that
    /// never goes backwards within this store.
    async fn record_message(&self, message: NewMessage) -> Result<Message>;

    async fn find_conversation(&self, key: &ConversationKey) -> Result<Option<Conversation>>;

    async fn count_conversations(&self) -> Result<u64>;

    /// Messages where `(from, to)` is `(a, b)` or `(b, a)`: the newest `limit`,
    /// newest first.
    async fn messages_between(&self, a: &str, b: &str, limit: usize) -> Result<Vec<Message>>;

    /// Newest `limit` messages across all conversations, newest first.
    async fn recent_messages(&self, limit: usize) -> Result<Vec<Message>>;

    async fn mark_delivered(&self, message_id: &str) -> Result<()>;

    async fn counts(&self) -> Result<StoreCounts>;
}

/// Open the store named by a `DATABASE_URL` value.
pub async fn open_store(database_url: &str) -> anyhow::Result<Arc<dyn RelayStore>> {
    if database_url == "memory" {
        return Ok(Arc::new(MemoryStore::new()));
    }
    let store = SqliteStore::connect(database_url).await?;
    Ok(Arc::new(store))
}

/// Returns `now`, or `last` if the wall clock stepped backwards.
pub(crate) fn next_timestamp(last: DateTime<Utc>) -> DateTime<Utc> {
    let now = Utc::now();
    if now < last {
        last
    } else {
        now
    }
}
