//! Wire protocol
//!
//! Every frame is a JSON object `{"event": "<name>", "data": <payload>}`.
//! Incoming frames are parsed into [`ClientEvent`] with an explicit schema per
//! event; anything that does not fit becomes a validation error instead of
//! reaching a handler.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::core::error::{Error, Result};
use crate::core::models::{
    Ciphertext, ConnectionId, IdentityId, Message, Profile, PublicKey,
};

/// Longest accepted identity string, in characters.
pub const MAX_IDENTITY_LEN: usize = 256;
pub const DISPLAY_NAME_MIN: usize = 3;
pub const DISPLAY_NAME_MAX: usize = 30;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterIdentity {
    pub id: String,
    pub public_key: PublicKey,
    pub display_name: String,
    pub contact_info: String,
}

/// A registration that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub id: IdentityId,
    pub public_key: PublicKey,
    pub display_name: String,
    pub contact_info: String,
}

impl RegisterIdentity {
    pub fn validate(self, min_public_key_len: usize) -> Result<Registration> {
        check_identity("id", &self.id)?;

        if self.public_key.len() < min_public_key_len {
            return Err(Error::validation(format!(
                "publicKey must be at least {} bytes",
                min_public_key_len
            )));
        }

        let display_name = sanitize(&self.display_name);
        let name_len = display_name.chars().count();
        if !(DISPLAY_NAME_MIN..=DISPLAY_NAME_MAX).contains(&name_len) {
            return Err(Error::validation(format!(
                "displayName must be {}-{} characters",
                DISPLAY_NAME_MIN, DISPLAY_NAME_MAX
            )));
        }

        let contact_info = sanitize(&self.contact_info);
        if !looks_like_email(&contact_info) {
            return Err(Error::validation("contactInfo must be an email address"));
        }

        Ok(Registration {
            id: self.id,
            public_key: self.public_key,
            display_name,
            contact_info,
        })
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConversationRequest {
    pub id1: String,
    pub id2: String,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SendMessageRequest {
    pub from: String,
    pub to: String,
    pub ciphertext: Ciphertext,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TypingRequest {
    pub to: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RecentMessagesRequest {
    #[serde(default)]
    pub limit: Option<usize>,
}

/// Events a client may send
#[derive(Debug, Clone)]
pub enum ClientEvent {
    RegisterIdentity(RegisterIdentity),
    GetOnline,
    GetAll,
    GetPublicKey(String),
    GetProfiles,
    GetProfile(String),
    GetConversation(ConversationRequest),
    SendMessage(SendMessageRequest),
    Typing(TypingRequest),
    GetAllMessages(RecentMessagesRequest),
    GetStats,
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

fn payload<T: DeserializeOwned>(event: &str, data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| Error::validation(format!("invalid payload for '{}': {}", event, e)))
}

impl ClientEvent {
    /// Parse one text frame.
    pub fn parse(frame: &str) -> Result<Self> {
        let Envelope { event, data } = serde_json::from_str(frame)?;

        let parsed = match event.as_str() {
            "register-identity" => ClientEvent::RegisterIdentity(payload(&event, data)?),
            "get-online" => ClientEvent::GetOnline,
            "get-all" => ClientEvent::GetAll,
            "get-public-key" => ClientEvent::GetPublicKey(payload(&event, data)?),
            "get-profiles" => ClientEvent::GetProfiles,
            "get-profile" => ClientEvent::GetProfile(payload(&event, data)?),
            "get-conversation" => ClientEvent::GetConversation(payload(&event, data)?),
            "send-message" => ClientEvent::SendMessage(payload(&event, data)?),
            "typing" => ClientEvent::Typing(payload(&event, data)?),
            "get-all-messages" => ClientEvent::GetAllMessages(
                payload::<Option<RecentMessagesRequest>>(&event, data)?.unwrap_or_default(),
            ),
            "get-stats" => ClientEvent::GetStats,
            other => return Err(Error::validation(format!("unknown event '{}'", other))),
        };
        Ok(parsed)
    }

    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::RegisterIdentity(_) => "register-identity",
            ClientEvent::GetOnline => "get-online",
            ClientEvent::GetAll => "get-all",
            ClientEvent::GetPublicKey(_) => "get-public-key",
            ClientEvent::GetProfiles => "get-profiles",
            ClientEvent::GetProfile(_) => "get-profile",
            ClientEvent::GetConversation(_) => "get-conversation",
            ClientEvent::SendMessage(_) => "send-message",
            ClientEvent::Typing(_) => "typing",
            ClientEvent::GetAllMessages(_) => "get-all-messages",
            ClientEvent::GetStats => "get-stats",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKeyPayload {
    pub id: IdentityId,
    /// `None` is the not-found result; clients must refuse to send.
    pub public_key: Option<PublicKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSummary {
    pub display_name: String,
    pub contact_info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfilePayload {
    pub id: IdentityId,
    pub profile: Option<Profile>,
}

/// Live push to the recipient of a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliveryPayload {
    pub id: String,
    pub from: IdentityId,
    pub ciphertext: Ciphertext,
    pub timestamp: DateTime<Utc>,
}

impl From<&Message> for DeliveryPayload {
    fn from(message: &Message) -> Self {
        Self {
            id: message.id.clone(),
            from: message.from.clone(),
            ciphertext: message.ciphertext.clone(),
            timestamp: message.created_at,
        }
    }
}

/// Acknowledgement to the sender once the message is durable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredPayload {
    pub id: String,
    pub to: IdentityId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TypingPayload {
    pub from: IdentityId,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsPayload {
    pub total_messages: u64,
    pub total_users: u64,
    pub online_users: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub status_code: u16,
}

/// Events the server sends, as replies or pushes
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    YourId(ConnectionId),
    OnlineIds(Vec<IdentityId>),
    AllIds(Vec<IdentityId>),
    PublicKey(PublicKeyPayload),
    Profiles(BTreeMap<IdentityId, ProfileSummary>),
    Profile(ProfilePayload),
    ConversationHistory(Vec<Message>),
    ReceiveMessage(DeliveryPayload),
    MessageStored(StoredPayload),
    Typing(TypingPayload),
    AllMessages(Vec<Message>),
    Stats(StatsPayload),
    Error(ErrorPayload),
}

/// Identity strings: non-empty, bounded, no whitespace or control characters.
pub fn check_identity(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(Error::validation(format!("{} is required", field)));
    }
    if value.chars().count() > MAX_IDENTITY_LEN {
        return Err(Error::validation(format!(
            "{} must be at most {} characters",
            field, MAX_IDENTITY_LEN
        )));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(Error::validation(format!(
            "{} must not contain whitespace",
            field
        )));
    }
    Ok(())
}

/// Trim and drop angle brackets from free-text profile fields.
pub fn sanitize(input: &str) -> String {
    input.trim().chars().filter(|c| *c != '<' && *c != '>').collect()
}

fn looks_like_email(value: &str) -> bool {
    if value.chars().any(char::is_whitespace) {
        return false;
    }
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    if local.is_empty() || domain.contains('@') {
        return false;
    }
    match domain.rsplit_once('.') {
        Some((host, tld)) => !host.is_empty() && !tld.is_empty(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registration(public_key_len: usize) -> RegisterIdentity {
        RegisterIdentity {
            id: "0xA11CE".into(),
            public_key: PublicKey::new(vec![4; public_key_len]),
            display_name: "  <Alice>  ".into(),
            contact_info: " alice@example.com ".into(),
        }
    }

    #[test]
    fn test_parse_send_message() {
        let frame = json!({
            "event": "send-message",
            "data": {"from": "a", "to": "b", "ciphertext": [1, 2, 3]}
        })
        .to_string();

        match ClientEvent::parse(&frame).unwrap() {
            ClientEvent::SendMessage(req) => {
                assert_eq!(req.from, "a");
                assert_eq!(req.to, "b");
                assert_eq!(req.ciphertext.as_bytes(), &[1, 2, 3]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_events_without_data() {
        assert!(matches!(
            ClientEvent::parse(r#"{"event":"get-online"}"#).unwrap(),
            ClientEvent::GetOnline
        ));
        match ClientEvent::parse(r#"{"event":"get-all-messages"}"#).unwrap() {
            ClientEvent::GetAllMessages(req) => assert_eq!(req.limit, None),
            other => panic!("unexpected event: {:?}", other),
        }
        match ClientEvent::parse(r#"{"event":"get-all-messages","data":{"limit":5}}"#).unwrap() {
            ClientEvent::GetAllMessages(req) => assert_eq!(req.limit, Some(5)),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_unknown_and_malformed() {
        let err = ClientEvent::parse(r#"{"event":"explode"}"#).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("explode")));

        let err = ClientEvent::parse("not json").unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = ClientEvent::parse(r#"{"event":"send-message","data":{"from":"a"}}"#)
            .unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("send-message")));

        let err = ClientEvent::parse(r#"{"event":"get-public-key"}"#).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_registration_is_sanitized() {
        let reg = registration(32).validate(32).unwrap();
        assert_eq!(reg.display_name, "Alice");
        assert_eq!(reg.contact_info, "alice@example.com");
        assert_eq!(reg.id, "0xA11CE");
    }

    #[test]
    fn test_registration_rejects_short_key() {
        let err = registration(31).validate(32).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("publicKey")));
    }

    #[test]
    fn test_display_name_length_counts_sanitized_text() {
        let mut reg = registration(32);
        reg.display_name = "<<ab>>".into();
        let err = reg.validate(32).unwrap_err();
        assert!(matches!(err, Error::Validation(ref m) if m.contains("displayName")));

        let mut reg = registration(32);
        reg.display_name = "<abc>".into();
        assert_eq!(reg.validate(32).unwrap().display_name, "abc");
    }

    #[test]
    fn test_registration_rejects_bad_fields() {
        let mut reg = registration(32);
        reg.display_name = "ab".into();
        assert!(reg.validate(32).is_err());

        let mut reg = registration(32);
        reg.contact_info = "not-an-email".into();
        assert!(reg.validate(32).is_err());

        let mut reg = registration(32);
        reg.id = "has space".into();
        assert!(reg.validate(32).is_err());

        let mut reg = registration(32);
        reg.id = String::new();
        assert!(reg.validate(32).is_err());
    }

    #[test]
    fn test_email_shapes() {
        assert!(looks_like_email("a@b.co"));
        assert!(!looks_like_email("a@b"));
        assert!(!looks_like_email("@b.co"));
        assert!(!looks_like_email("a@@b.co"));
        assert!(!looks_like_email("a b@c.de"));
        assert!(!looks_like_email("a@.de"));
    }

    #[test]
    fn test_server_event_shape() {
        let event = ServerEvent::Typing(TypingPayload { from: "alice".into() });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "typing", "data": {"from": "alice"}})
        );

        let event = ServerEvent::PublicKey(PublicKeyPayload {
            id: "zed".into(),
            public_key: None,
        });
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "public-key", "data": {"id": "zed", "publicKey": null}})
        );

        let event = ServerEvent::OnlineIds(vec!["a".into(), "b".into()]);
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"event": "online-ids", "data": ["a", "b"]})
        );
    }
}
