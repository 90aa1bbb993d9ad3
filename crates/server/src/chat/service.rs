//! Relay service
//!
//! One service instance for every role. A connection's role decides which
//! events it may send; the routing below is shared.

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::directory::KeyDirectory;
use super::history::ConversationReader;
use super::presence::{EventSender, PresenceRegistry};
use super::protocol::{
    check_identity, ClientEvent, ProfilePayload, PublicKeyPayload, SendMessageRequest,
    ServerEvent, StatsPayload, StoredPayload,
};
use super::relay::{Delivery, MessageRouter};
use super::role::{Capability, Role};
use super::typing::TypingSignal;
use crate::core::config::RelayConfig;
use crate::core::error::{Error, Result};
use crate::core::models::ConnectionId;
use crate::core::store::RelayStore;

pub struct RelayService {
    store: Arc<dyn RelayStore>,
    directory: KeyDirectory,
    presence: Arc<PresenceRegistry>,
    router: MessageRouter,
    reader: ConversationReader,
    typing: TypingSignal,
    min_public_key_len: usize,
    recent_messages_limit: usize,
}

impl RelayService {
    pub fn new(store: Arc<dyn RelayStore>, config: &RelayConfig) -> Self {
        let directory = KeyDirectory::new(store.clone(), config.min_public_key_len);
        let presence = Arc::new(PresenceRegistry::new(directory.clone(), store.clone()));

        Self {
            router: MessageRouter::new(store.clone(), presence.clone()),
            reader: ConversationReader::new(store.clone(), config.history_limit),
            typing: TypingSignal::new(presence.clone()),
            directory,
            presence,
            store,
            min_public_key_len: config.min_public_key_len,
            recent_messages_limit: config.recent_messages_limit,
        }
    }

    pub fn presence(&self) -> &PresenceRegistry {
        &self.presence
    }

    /// Accept a transport session and tell it its connection id.
    pub fn connect(&self, role: Role, sender: EventSender) -> ConnectionId {
        let conn = self.presence.accept(role, sender);
        self.reply(conn, ServerEvent::YourId(conn));
        conn
    }

    /// Tear down a session. Everyone learns the new online set if an identity
    /// went offline.
    pub async fn disconnect(&self, conn: ConnectionId) {
        if self.presence.unbind(conn).await.is_some() {
            self.broadcast_online();
        }
        debug!("[Relay] Connection {} closed", conn);
    }

    /// Parse one text frame, run it, and queue the reply (or error) for the
    /// same connection.
    pub async fn handle_frame(&self, conn: ConnectionId, frame: &str) {
        let outcome = match ClientEvent::parse(frame) {
            Ok(event) => self.handle(conn, event).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(Some(reply)) => self.reply(conn, reply),
            Ok(None) => {}
            Err(e) => {
                match &e {
                    Error::Persistence(_) | Error::Internal(_) => {
                        error!("[Relay] {} failed: {}", conn, e)
                    }
                    _ => debug!("[Relay] Rejected frame from {}: {}", conn, e),
                }
                self.reply(conn, e.to_event());
            }
        }
    }

    /// Run one parsed event. `Ok(None)` means nothing goes back to the caller.
    pub async fn handle(&self, conn: ConnectionId, event: ClientEvent) -> Result<Option<ServerEvent>> {
        let role = self
            .presence
            .role_of(conn)
            .ok_or_else(|| Error::NotFound(format!("connection {}", conn)))?;
        if !role.allows(Capability::required_for(&event)) {
            warn!("[Relay] {} ({}) tried '{}'", conn, role.as_str(), event.name());
            return Err(Error::Forbidden(event.name()));
        }

        match event {
            ClientEvent::RegisterIdentity(request) => {
                let registration = request.validate(self.min_public_key_len)?;
                self.presence.bind(conn, &registration).await?;
                self.broadcast_online();
                Ok(None)
            }

            ClientEvent::GetOnline => Ok(Some(ServerEvent::OnlineIds(self.online_ids()))),

            ClientEvent::GetAll => Ok(Some(ServerEvent::AllIds(self.directory.all_ids().await?))),

            ClientEvent::GetPublicKey(id) => {
                let public_key = self.directory.lookup_key(&id).await?;
                Ok(Some(ServerEvent::PublicKey(PublicKeyPayload { id, public_key })))
            }

            ClientEvent::GetProfiles => {
                Ok(Some(ServerEvent::Profiles(self.directory.profiles().await?)))
            }

            ClientEvent::GetProfile(id) => {
                let profile = self.directory.profile(&id).await?;
                Ok(Some(ServerEvent::Profile(ProfilePayload { id, profile })))
            }

            ClientEvent::GetConversation(request) => {
                let history = self
                    .reader
                    .history(&request.id1, &request.id2, request.limit)
                    .await?;
                Ok(Some(ServerEvent::ConversationHistory(history)))
            }

            ClientEvent::SendMessage(request) => self.send_message(conn, request).await.map(Some),

            ClientEvent::Typing(request) => {
                check_identity("to", &request.to)?;
                match self.presence.bound_identity(conn) {
                    Some(from) => {
                        self.typing.notify_typing(&from, &request.to);
                    }
                    None => debug!("[Relay] Typing from anonymous {} ignored", conn),
                }
                Ok(None)
            }

            ClientEvent::GetAllMessages(request) => {
                let limit = request
                    .limit
                    .unwrap_or(self.recent_messages_limit)
                    .min(self.recent_messages_limit);
                Ok(Some(ServerEvent::AllMessages(self.reader.recent(limit).await?)))
            }

            ClientEvent::GetStats => {
                let counts = self.store.counts().await?;
                Ok(Some(ServerEvent::Stats(StatsPayload {
                    total_messages: counts.total_messages,
                    total_users: counts.total_users,
                    online_users: self.presence.online_identities().len() as u64,
                })))
            }
        }
    }

    async fn send_message(&self, conn: ConnectionId, request: SendMessageRequest) -> Result<ServerEvent> {
        match self.presence.bound_identity(conn) {
            Some(bound) if bound == request.from => {}
            Some(_) => return Err(Error::validation("from does not match the registered identity")),
            None => return Err(Error::validation("register an identity before sending")),
        }

        let receipt = self
            .router
            .send(&request.from, &request.to, request.ciphertext)
            .await?;

        if let Delivery::Failed(e) = &receipt.delivery {
            info!("[Relay] {} stored but not pushed: {}", receipt.message.id, e);
        }

        Ok(ServerEvent::MessageStored(StoredPayload {
            id: receipt.message.id,
            to: receipt.message.to,
            created_at: receipt.message.created_at,
        }))
    }

    fn online_ids(&self) -> Vec<String> {
        self.presence.online_identities().into_iter().collect()
    }

    fn broadcast_online(&self) {
        let reached = self.presence.broadcast(&ServerEvent::OnlineIds(self.online_ids()));
        debug!("[Relay] Online set sent to {} connections", reached);
    }

    fn reply(&self, conn: ConnectionId, event: ServerEvent) {
        if let Err(e) = self.presence.push(conn, event) {
            warn!("[Relay] Reply to {} dropped: {}", conn, e);
        }
    }
}
