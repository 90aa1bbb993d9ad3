//! Key directory
//!
//! Identity to public key lookups, backed by the store. Registration is
//! last-write-wins per identity.

use chrono::Utc;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::protocol::{check_identity, ProfileSummary, Registration};
use crate::core::error::{Error, Result};
use crate::core::models::{Identity, IdentityId, Profile, PublicKey};
use crate::core::store::RelayStore;

#[derive(Clone)]
pub struct KeyDirectory {
    store: Arc<dyn RelayStore>,
    /// Shortest public key accepted, in bytes.
    min_key_len: usize,
}

impl KeyDirectory {
    pub fn new(store: Arc<dyn RelayStore>, min_key_len: usize) -> Self {
        Self { store, min_key_len }
    }

    /// Upsert the identity with `last_seen = now`.
    ///
    /// Keys shorter than the configured minimum are refused before the store
    /// is touched. This is a sanity check, not key validation.
    pub async fn register_key(&self, registration: &Registration) -> Result<Identity> {
        check_identity("id", &registration.id)?;
        if registration.public_key.len() < self.min_key_len {
            return Err(Error::validation(format!(
                "publicKey must be at least {} bytes",
                self.min_key_len
            )));
        }

        let identity = Identity {
            id: registration.id.clone(),
            public_key: registration.public_key.clone(),
            display_name: registration.display_name.clone(),
            contact_info: registration.contact_info.clone(),
            last_seen: Utc::now(),
        };
        self.store.upsert_identity(&identity).await?;
        info!(
            "[Directory] Registered key for {} ({} bytes)",
            identity.id,
            identity.public_key.len()
        );
        Ok(identity)
    }

    /// `Ok(None)` is the not-found result, not an error.
    pub async fn lookup_key(&self, id: &str) -> Result<Option<PublicKey>> {
        check_identity("id", id)?;
        let identity = self.store.find_identity(id).await?;
        if identity.is_none() {
            debug!("[Directory] No key registered for {}", id);
        }
        Ok(identity.map(|i| i.public_key))
    }

    pub async fn profile(&self, id: &str) -> Result<Option<Profile>> {
        check_identity("id", id)?;
        Ok(self.store.find_identity(id).await?.map(|i| i.profile()))
    }

    pub async fn profiles(&self) -> Result<BTreeMap<IdentityId, ProfileSummary>> {
        Ok(self
            .store
            .list_identities()
            .await?
            .into_iter()
            .map(|i| {
                (
                    i.id,
                    ProfileSummary {
                        display_name: i.display_name,
                        contact_info: i.contact_info,
                    },
                )
            })
            .collect())
    }

    /// Every registered identity, ordered by id.
    pub async fn all_ids(&self) -> Result<Vec<IdentityId>> {
        Ok(self
            .store
            .list_identities()
            .await?
            .into_iter()
            .map(|i| i.id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::store::testing::FaultyStore;
    use crate::core::store::MemoryStore;

    fn registration(id: &str, key_byte: u8) -> Registration {
        Registration {
            id: id.into(),
            public_key: PublicKey::new(vec![key_byte; 32]),
            display_name: format!("User {}", id),
            contact_info: format!("{}@example.com", id),
        }
    }

    #[tokio::test]
    async fn test_register_then_lookup() {
        let directory = KeyDirectory::new(Arc::new(MemoryStore::new()), 32);
        directory.register_key(&registration("0xA11CE", 1)).await.unwrap();

        let key = directory.lookup_key("0xA11CE").await.unwrap();
        assert_eq!(key, Some(PublicKey::new(vec![1; 32])));
    }

    #[tokio::test]
    async fn test_reregistration_overwrites_key() {
        let directory = KeyDirectory::new(Arc::new(MemoryStore::new()), 32);
        directory.register_key(&registration("alice", 1)).await.unwrap();
        directory.register_key(&registration("alice", 2)).await.unwrap();

        assert_eq!(
            directory.lookup_key("alice").await.unwrap(),
            Some(PublicKey::new(vec![2; 32]))
        );
        assert_eq!(directory.all_ids().await.unwrap(), vec!["alice".to_string()]);
    }

    #[tokio::test]
    async fn test_register_rejects_short_key() {
        let store = Arc::new(MemoryStore::new());
        let directory = KeyDirectory::new(store.clone(), 32);

        let mut empty = registration("alice", 1);
        empty.public_key = PublicKey::new(vec![]);
        let err = directory.register_key(&empty).await.unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("publicKey")));

        let mut short = registration("alice", 1);
        short.public_key = PublicKey::new(vec![1; 31]);
        assert!(directory.register_key(&short).await.is_err());

        assert!(store.find_identity("alice").await.unwrap().is_none());
        assert!(directory.register_key(&registration("alice", 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_lookup_unknown_is_none() {
        let directory = KeyDirectory::new(Arc::new(MemoryStore::new()), 32);
        assert_eq!(directory.lookup_key("0xZED").await.unwrap(), None);
        assert_eq!(directory.profile("0xZED").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_lookup_rejects_bad_identity() {
        let directory = KeyDirectory::new(Arc::new(MemoryStore::new()), 32);
        let err = directory.lookup_key("").await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_profiles_are_keyed_by_id() {
        let directory = KeyDirectory::new(Arc::new(MemoryStore::new()), 32);
        directory.register_key(&registration("bob", 1)).await.unwrap();
        directory.register_key(&registration("alice", 1)).await.unwrap();

        let profiles = directory.profiles().await.unwrap();
        let ids: Vec<_> = profiles.keys().cloned().collect();
        assert_eq!(ids, vec!["alice".to_string(), "bob".to_string()]);
        assert_eq!(profiles["bob"].contact_info, "bob@example.com");
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        let store = Arc::new(FaultyStore::new());
        let directory = KeyDirectory::new(store.clone(), 32);
        store.set_fail_writes(true);

        let err = directory.register_key(&registration("alice", 1)).await.unwrap_err();
        assert!(matches!(err, Error::Persistence(_)));
    }
}
