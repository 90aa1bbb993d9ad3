//! Connection roles and the events each one may send.

use super::protocol::ClientEvent;

/// Which endpoint a connection came in on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    User,
    Developer,
}

/// Event families gated by role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Registration, lookups, history, sending and typing.
    Messaging,
    /// Cross-conversation reads and aggregate counts.
    Inspect,
}

impl Capability {
    pub fn required_for(event: &ClientEvent) -> Self {
        match event {
            ClientEvent::GetAllMessages(_) | ClientEvent::GetStats => Capability::Inspect,
            _ => Capability::Messaging,
        }
    }
}

impl Role {
    pub fn allows(self, capability: Capability) -> bool {
        match (self, capability) {
            (_, Capability::Messaging) => true,
            (Role::Developer, Capability::Inspect) => true,
            (Role::User, Capability::Inspect) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Developer => "developer",
        }
    }
}
