//! Message router
//!
//! `send` validates, writes the message and its conversation in one store
//! call, and only then tries live delivery. Delivery takes a stored
//! [`Message`], so there is no path that pushes an unrecorded message.

use std::sync::Arc;
use tracing::{debug, info, warn};

use super::presence::{PresenceRegistry, PushError};
use super::protocol::{check_identity, DeliveryPayload, ServerEvent};
use crate::core::error::{Error, Result};
use crate::core::models::{Ciphertext, Message, NewMessage};
use crate::core::store::RelayStore;

/// What happened to the live push after the message was stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    Pushed,
    /// Recipient had no live connection.
    Offline,
    /// Recipient was online but the push was refused.
    Failed(PushError),
}

#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message: Message,
    pub delivery: Delivery,
}

#[derive(Clone)]
pub struct MessageRouter {
    store: Arc<dyn RelayStore>,
    presence: Arc<PresenceRegistry>,
}

impl MessageRouter {
    pub fn new(store: Arc<dyn RelayStore>, presence: Arc<PresenceRegistry>) -> Self {
        Self { store, presence }
    }

    pub async fn send(&self, from: &str, to: &str, ciphertext: Ciphertext) -> Result<SendReceipt> {
        check_identity("from", from)?;
        check_identity("to", to)?;
        if from == to {
            return Err(Error::validation("from and to must be different identities"));
        }
        if ciphertext.is_empty() {
            return Err(Error::validation("ciphertext must not be empty"));
        }

        let message = self
            .store
            .record_message(NewMessage {
                from: from.to_string(),
                to: to.to_string(),
                ciphertext,
            })
            .await
            .map_err(|e| {
                warn!("[Relay] Failed to store message {} -> {}: {}", from, to, e);
                e
            })?;

        debug!(
            "[Relay] Stored {} ({} -> {}, {} bytes)",
            message.id,
            from,
            to,
            message.ciphertext.len()
        );

        let delivery = self.deliver(&message).await;
        Ok(SendReceipt { message, delivery })
    }

    /// Best-effort push of a stored message. Never fails the send.
    async fn deliver(&self, message: &Message) -> Delivery {
        let event = ServerEvent::ReceiveMessage(DeliveryPayload::from(message));

        match self.presence.push_to_identity(&message.to, event) {
            None => {
                debug!("[Relay] {} offline, {} kept for history", message.to, message.id);
                Delivery::Offline
            }
            Some(Err(e)) => {
                warn!("[Relay] Live delivery of {} failed: {}", message.id, e);
                Delivery::Failed(e)
            }
            Some(Ok(())) => {
                if let Err(e) = self.store.mark_delivered(&message.id).await {
                    warn!("[Relay] Could not flag {} as delivered: {}", message.id, e);
                }
                info!("[Relay] Delivered {} to {}", message.id, message.to);
                Delivery::Pushed
            }
        }
    }
}
