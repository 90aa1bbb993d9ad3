//! Presence registry
//!
//! Tracks every live connection, which identity (if any) it is bound to, and
//! the reverse mapping used to find the delivery connection for an identity.
//!
//! One live connection per identity: a later bind of the same identity takes
//! over delivery and the earlier connection falls back to anonymous.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use super::directory::KeyDirectory;
use super::protocol::{Registration, ServerEvent};
use super::role::Role;
use crate::core::error::{Error, Result};
use crate::core::models::{ConnectionId, Identity, IdentityId};
use crate::core::store::RelayStore;

/// Outbound half of a connection's queue.
pub type EventSender = mpsc::Sender<ServerEvent>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PushError {
    #[error("connection {0} is not registered")]
    UnknownConnection(ConnectionId),
    #[error("outbound queue for {0} is full")]
    Full(ConnectionId),
    #[error("connection {0} is closed")]
    Closed(ConnectionId),
}

struct ConnectionEntry {
    sender: EventSender,
    role: Role,
    bound: Option<IdentityId>,
    connected_at: DateTime<Utc>,
}

#[derive(Default)]
struct Maps {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    live: HashMap<IdentityId, ConnectionId>,
}

pub struct PresenceRegistry {
    maps: RwLock<Maps>,
    directory: KeyDirectory,
    store: Arc<dyn RelayStore>,
}

impl PresenceRegistry {
    pub fn new(directory: KeyDirectory, store: Arc<dyn RelayStore>) -> Self {
        Self {
            maps: RwLock::new(Maps::default()),
            directory,
            store,
        }
    }

    /// Create an anonymous entry for a freshly accepted transport session.
    pub fn accept(&self, role: Role, sender: EventSender) -> ConnectionId {
        let id = ConnectionId::new();
        self.maps.write().connections.insert(
            id,
            ConnectionEntry {
                sender,
                role,
                bound: None,
                connected_at: Utc::now(),
            },
        );
        debug!("[Presence] Accepted {} connection {}", role.as_str(), id);
        id
    }

    /// Register the identity's key, then bind it to `conn`.
    ///
    /// The identity record is written before the maps change, so an identity
    /// is never online without a stored key.
    pub async fn bind(&self, conn: ConnectionId, registration: &Registration) -> Result<Identity> {
        if !self.maps.read().connections.contains_key(&conn) {
            return Err(Error::NotFound(format!("connection {}", conn)));
        }

        let identity = self.directory.register_key(registration).await?;

        let mut maps = self.maps.write();
        let Maps { connections, live } = &mut *maps;

        let Some(entry) = connections.get_mut(&conn) else {
            // Closed while the upsert was in flight.
            return Err(Error::NotFound(format!("connection {}", conn)));
        };

        if let Some(previous) = entry.bound.replace(identity.id.clone()) {
            if previous != identity.id && live.get(&previous) == Some(&conn) {
                live.remove(&previous);
            }
        }

        if let Some(superseded) = live.insert(identity.id.clone(), conn) {
            if superseded != conn {
                if let Some(old) = connections.get_mut(&superseded) {
                    old.bound = None;
                }
                info!(
                    "[Presence] {} rebound from {} to {}",
                    identity.id, superseded, conn
                );
            }
        }

        info!("[Presence] {} bound to {}", identity.id, conn);
        Ok(identity)
    }

    /// Drop the connection. Returns the identity that went offline, if any.
    ///
    /// `last_seen` is written after the maps are updated; a failed write is
    /// logged and otherwise ignored.
    pub async fn unbind(&self, conn: ConnectionId) -> Option<IdentityId> {
        let released = {
            let mut maps = self.maps.write();
            let entry = maps.connections.remove(&conn)?;
            debug!(
                "[Presence] Closing {} after {}s",
                conn,
                (Utc::now() - entry.connected_at).num_seconds()
            );
            match entry.bound {
                Some(id) if maps.live.get(&id) == Some(&conn) => {
                    maps.live.remove(&id);
                    Some(id)
                }
                _ => None,
            }
        };

        let id = released?;
        if let Err(e) = self.store.touch_last_seen(&id, Utc::now()).await {
            warn!("[Presence] Failed to persist lastSeen for {}: {}", id, e);
        }
        info!("[Presence] {} went offline", id);
        Some(id)
    }

    pub fn is_online(&self, id: &str) -> bool {
        self.maps.read().live.contains_key(id)
    }

    pub fn online_identities(&self) -> BTreeSet<IdentityId> {
        self.maps.read().live.keys().cloned().collect()
    }

    pub fn connection_for(&self, id: &str) -> Option<ConnectionId> {
        self.maps.read().live.get(id).copied()
    }

    pub fn bound_identity(&self, conn: ConnectionId) -> Option<IdentityId> {
        self.maps
            .read()
            .connections
            .get(&conn)
            .and_then(|e| e.bound.clone())
    }

    pub fn role_of(&self, conn: ConnectionId) -> Option<Role> {
        self.maps.read().connections.get(&conn).map(|e| e.role)
    }

    pub fn connection_count(&self) -> usize {
        self.maps.read().connections.len()
    }

    /// Queue an event without waiting. A full or closed queue is reported,
    /// never retried.
    pub fn push(&self, conn: ConnectionId, event: ServerEvent) -> std::result::Result<(), PushError> {
        let sender = self
            .maps
            .read()
            .connections
            .get(&conn)
            .map(|e| e.sender.clone())
            .ok_or(PushError::UnknownConnection(conn))?;

        sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => PushError::Full(conn),
            TrySendError::Closed(_) => PushError::Closed(conn),
        })
    }

    /// Push to the live connection of `id`. `None` when the identity is offline.
    pub fn push_to_identity(
        &self,
        id: &str,
        event: ServerEvent,
    ) -> Option<std::result::Result<(), PushError>> {
        let conn = self.connection_for(id)?;
        Some(self.push(conn, event))
    }

    /// Push to every open connection. Returns how many accepted it.
    pub fn broadcast(&self, event: &ServerEvent) -> usize {
        let senders: Vec<(ConnectionId, EventSender)> = self
            .maps
            .read()
            .connections
            .iter()
            .map(|(id, e)| (*id, e.sender.clone()))
            .collect();

        let mut delivered = 0;
        for (conn, sender) in senders {
            match sender.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => debug!("[Presence] Broadcast to {} dropped: {}", conn, e),
            }
        }
        delivered
    }
}
