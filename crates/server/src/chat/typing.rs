//! Typing signal. Never stored, never queued.

use std::sync::Arc;
use tracing::debug;

use super::presence::PresenceRegistry;
use super::protocol::{ServerEvent, TypingPayload};

#[derive(Clone)]
pub struct TypingSignal {
    presence: Arc<PresenceRegistry>,
}

impl TypingSignal {
    pub fn new(presence: Arc<PresenceRegistry>) -> Self {
        Self { presence }
    }

    /// Returns true if the push reached `to`'s live connection.
    pub fn notify_typing(&self, from: &str, to: &str) -> bool {
        let event = ServerEvent::Typing(TypingPayload {
            from: from.to_string(),
        });
        match self.presence.push_to_identity(to, event) {
            Some(Ok(())) => true,
            Some(Err(e)) => {
                debug!("[Typing] Dropped {} -> {}: {}", from, to, e);
                false
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::directory::KeyDirectory;
    use crate::chat::protocol::Registration;
    use crate::chat::role::Role;
    use crate::core::models::PublicKey;
    use crate::core::store::{MemoryStore, RelayStore};
    use tokio::sync::mpsc;

    fn registration(id: &str) -> Registration {
        Registration {
            id: id.into(),
            public_key: PublicKey::new(vec![1; 32]),
            display_name: format!("User {}", id),
            contact_info: format!("{}@example.com", id),
        }
    }

    #[tokio::test]
    async fn test_typing_reaches_only_recipient() {
        let store: Arc<dyn RelayStore> = Arc::new(MemoryStore::new());
        let presence = Arc::new(PresenceRegistry::new(
            KeyDirectory::new(store.clone(), 32),
            store,
        ));
        let typing = TypingSignal::new(presence.clone());

        let (tx_b, mut rx_b) = mpsc::channel(8);
        let (tx_c, mut rx_c) = mpsc::channel(8);
        let b = presence.accept(Role::User, tx_b);
        let c = presence.accept(Role::User, tx_c);
        presence.bind(b, &registration("b")).await.unwrap();
        presence.bind(c, &registration("c")).await.unwrap();

        assert!(typing.notify_typing("a", "b"));
        assert_eq!(
            rx_b.try_recv().ok(),
            Some(ServerEvent::Typing(TypingPayload { from: "a".into() }))
        );
        assert!(rx_c.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_typing_to_offline_is_dropped() {
        let store: Arc<dyn RelayStore> = Arc::new(MemoryStore::new());
        let presence = Arc::new(PresenceRegistry::new(
            KeyDirectory::new(store.clone(), 32),
            store,
        ));
        let typing = TypingSignal::new(presence);
        assert!(!typing.notify_typing("a", "nobody"));
    }
}
