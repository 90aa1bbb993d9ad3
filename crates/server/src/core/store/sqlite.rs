//! SQLite-backed store
//!
//! Tables:
//! - `identities`: one row per identity id
//! - `messages`: append-only, `seq` is the insertion order
//! - `conversations`: one row per normalized participant pair

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::PathBuf;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::info;

use super::{next_timestamp, RelayStore};
use crate::core::error::{Error, Result};
use crate::core::models::{
    Ciphertext, Conversation, ConversationKey, Identity, Message, NewMessage, PublicKey,
    StoreCounts,
};

type IdentityRow = (String, Vec<u8>, String, String, String);
type MessageRow = (i64, String, String, String, Vec<u8>, String, bool);

const MESSAGE_COLUMNS: &str = "seq, id, sender, recipient, ciphertext, created_at, delivered";

pub struct SqliteStore {
    pool: SqlitePool,
    /// Serializes appends and remembers the last assigned `created_at`,
    /// so timestamps follow `seq` order.
    append_clock: Mutex<Option<DateTime<Utc>>>,
}

impl SqliteStore {
    /// Connect (creating the database file if needed) and ensure the schema.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        if let Some(path) = sqlite_file_path(database_url) {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {:?}", parent))?;
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database url {}", database_url))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open {}", database_url))?;

        let store = Self {
            pool,
            append_clock: Mutex::new(None),
        };
        store.init_db().await?;

        let last: Option<(String,)> =
            sqlx::query_as("SELECT created_at FROM messages ORDER BY seq DESC LIMIT 1")
                .fetch_optional(&store.pool)
                .await?;
        if let Some((raw,)) = last {
            *store.append_clock.lock().await = Some(parse_time(&raw)?);
        }

        info!("[Store] SQLite store ready at {}", database_url);
        Ok(store)
    }

    async fn init_db(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS identities (
                id TEXT PRIMARY KEY,
                public_key BLOB NOT NULL,
                display_name TEXT NOT NULL,
                contact_info TEXT NOT NULL,
                last_seen TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS messages (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT UNIQUE NOT NULL,
                conversation_low TEXT NOT NULL,
                conversation_high TEXT NOT NULL,
                sender TEXT NOT NULL,
                recipient TEXT NOT NULL,
                ciphertext BLOB NOT NULL,
                created_at TEXT NOT NULL,
                delivered INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        for index in [
            "CREATE INDEX IF NOT EXISTS idx_messages_sender ON messages(sender)",
            "CREATE INDEX IF NOT EXISTS idx_messages_recipient ON messages(recipient)",
            "CREATE INDEX IF NOT EXISTS idx_messages_conversation \
             ON messages(conversation_low, conversation_high, seq)",
        ] {
            sqlx::query(index).execute(&self.pool).await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                participant_low TEXT NOT NULL,
                participant_high TEXT NOT NULL,
                last_message_at TEXT NOT NULL,
                PRIMARY KEY (participant_low, participant_high)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Close the pool, flushing pending writes.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Filesystem path of a `sqlite:` URL, or `None` for in-memory databases.
fn sqlite_file_path(url: &str) -> Option<PathBuf> {
    let rest = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))?;
    let path = rest.split('?').next().unwrap_or(rest);
    if path.is_empty() || path.starts_with(":memory:") {
        return None;
    }
    Some(PathBuf::from(path))
}

fn format_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_time(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| Error::Persistence(format!("bad timestamp '{}': {}", raw, e)))
}

fn identity_from_row(row: IdentityRow) -> Result<Identity> {
    let (id, public_key, display_name, contact_info, last_seen) = row;
    Ok(Identity {
        id,
        public_key: PublicKey::new(public_key),
        display_name,
        contact_info,
        last_seen: parse_time(&last_seen)?,
    })
}

fn message_from_row(row: MessageRow) -> Result<Message> {
    let (seq, id, sender, recipient, ciphertext, created_at, delivered) = row;
    Ok(Message {
        id,
        seq,
        conversation_key: ConversationKey::new(&sender, &recipient),
        from: sender,
        to: recipient,
        ciphertext: Ciphertext::new(ciphertext),
        created_at: parse_time(&created_at)?,
        delivered,
    })
}

#[async_trait]
impl RelayStore for SqliteStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn upsert_identity(&self, identity: &Identity) -> Result<()> {
        sqlx::query(
            "INSERT INTO identities (id, public_key, display_name, contact_info, last_seen)
             VALUES (?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                public_key = excluded.public_key,
                display_name = excluded.display_name,
                contact_info = excluded.contact_info,
                last_seen = excluded.last_seen",
        )
        .bind(&identity.id)
        .bind(identity.public_key.as_bytes())
        .bind(&identity.display_name)
        .bind(&identity.contact_info)
        .bind(format_time(identity.last_seen))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_identity(&self, id: &str) -> Result<Option<Identity>> {
        let row: Option<IdentityRow> = sqlx::query_as(
            "SELECT id, public_key, display_name, contact_info, last_seen
             FROM identities WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(identity_from_row).transpose()
    }

    async fn list_identities(&self) -> Result<Vec<Identity>> {
        let rows: Vec<IdentityRow> = sqlx::query_as(
            "SELECT id, public_key, display_name, contact_info, last_seen
             FROM identities ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(identity_from_row).collect()
    }

    async fn touch_last_seen(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE identities SET last_seen = ? WHERE id = ?")
            .bind(format_time(at))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn record_message(&self, message: NewMessage) -> Result<Message> {
        let mut clock = self.append_clock.lock().await;
        let created_at = match *clock {
            Some(last) => next_timestamp(last),
            None => Utc::now(),
        }
        .trunc_subsecs(6);
        let stamp = format_time(created_at);

        let id = Message::new_id();
        let key = message.conversation_key();

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(
            "INSERT INTO messages
                (id, conversation_low, conversation_high, sender, recipient, ciphertext, created_at, delivered)
             VALUES (?, ?, ?, ?, ?, ?, ?, 0)",
        )
        .bind(&id)
        .bind(key.low())
        .bind(key.high())
        .bind(&message.from)
        .bind(&message.to)
        .bind(message.ciphertext.as_bytes())
        .bind(&stamp)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO conversations (participant_low, participant_high, last_message_at)
             VALUES (?, ?, ?)
             ON CONFLICT(participant_low, participant_high)
             DO UPDATE SET last_message_at = excluded.last_message_at",
        )
        .bind(key.low())
        .bind(key.high())
        .bind(&stamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        *clock = Some(created_at);

        Ok(Message {
            id,
            seq: result.last_insert_rowid(),
            conversation_key: key,
            from: message.from,
            to: message.to,
            ciphertext: message.ciphertext,
            created_at,
            delivered: false,
        })
    }

    async fn find_conversation(&self, key: &ConversationKey) -> Result<Option<Conversation>> {
        let row: Option<(String,)> = sqlx::query_as(
            "SELECT last_message_at FROM conversations
             WHERE participant_low = ? AND participant_high = ?",
        )
        .bind(key.low())
        .bind(key.high())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|(raw,)| {
            Ok(Conversation {
                key: key.clone(),
                last_message_at: parse_time(&raw)?,
            })
        })
        .transpose()
    }

    async fn count_conversations(&self) -> Result<u64> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM conversations")
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    async fn messages_between(&self, a: &str, b: &str, limit: usize) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages
             WHERE (sender = ? AND recipient = ?) OR (sender = ? AND recipient = ?)
             ORDER BY seq DESC LIMIT ?",
            MESSAGE_COLUMNS
        );
        let rows: Vec<MessageRow> = sqlx::query_as(&sql)
            .bind(a)
            .bind(b)
            .bind(b)
            .bind(a)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(message_from_row).collect()
    }

    async fn recent_messages(&self, limit: usize) -> Result<Vec<Message>> {
        let sql = format!(
            "SELECT {} FROM messages ORDER BY seq DESC LIMIT ?",
            MESSAGE_COLUMNS
        );
        let rows: Vec<MessageRow> = sqlx::query_as(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(message_from_row).collect()
    }

    async fn mark_delivered(&self, message_id: &str) -> Result<()> {
        sqlx::query("UPDATE messages SET delivered = 1 WHERE id = ?")
            .bind(message_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn counts(&self) -> Result<StoreCounts> {
        let (messages,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await?;
        let (users,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM identities")
            .fetch_one(&self.pool)
            .await?;
        Ok(StoreCounts {
            total_messages: messages as u64,
            total_users: users as u64,
        })
    }
}
