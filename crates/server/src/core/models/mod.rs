use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;
use uuid::Uuid;

/// Stable id of a registered participant.
pub type IdentityId = String;

/// Ephemeral id of a live transport session. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl Serialize for ConnectionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

/// Opaque public key bytes supplied by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicKey(Vec<u8>);

impl PublicKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Opaque encrypted payload. Only its length is ever looked at.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ciphertext(Vec<u8>);

impl Ciphertext {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ciphertext({} bytes)", self.0.len())
    }
}

/// Registered participant record, keyed uniquely by `id`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: IdentityId,
    pub public_key: PublicKey,
    pub display_name: String,
    pub contact_info: String,
    pub last_seen: DateTime<Utc>,
}

impl Identity {
    pub fn profile(&self) -> Profile {
        Profile {
            display_name: self.display_name.clone(),
            contact_info: self.contact_info.clone(),
            last_seen: self.last_seen,
        }
    }
}

/// Public profile fields of an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub display_name: String,
    pub contact_info: String,
    pub last_seen: DateTime<Utc>,
}

/// Order-normalized pair of participants.
///
/// `ConversationKey::new(a, b) == ConversationKey::new(b, a)` for all `a`, `b`,
/// which is what keeps exactly one conversation record per unordered pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConversationKey {
    low: IdentityId,
    high: IdentityId,
}

impl ConversationKey {
    pub fn new(a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            low: low.to_string(),
            high: high.to_string(),
        }
    }

    pub fn low(&self) -> &str {
        &self.low
    }

    pub fn high(&self) -> &str {
        &self.high
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.low, self.high)
    }
}

impl Serialize for ConversationKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub key: ConversationKey,
    pub last_message_at: DateTime<Utc>,
}

/// Message as handed to the store; id, sequence and timestamp are assigned there.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub from: IdentityId,
    pub to: IdentityId,
    pub ciphertext: Ciphertext,
}

impl NewMessage {
    pub fn conversation_key(&self) -> ConversationKey {
        ConversationKey::new(&self.from, &self.to)
    }
}

/// A stored message. Only `delivered` is ever updated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    /// Store-assigned insertion sequence, strictly increasing per store.
    #[serde(skip)]
    pub seq: i64,
    pub conversation_key: ConversationKey,
    pub from: IdentityId,
    pub to: IdentityId,
    pub ciphertext: Ciphertext,
    pub created_at: DateTime<Utc>,
    pub delivered: bool,
}

impl Message {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreCounts {
    pub total_messages: u64,
    pub total_users: u64,
}
