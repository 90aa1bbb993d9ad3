//! Chat Service Layer
//!
//! Presence, key directory, message relay, history and typing, plus the
//! WebSocket transport that carries them.

pub mod directory;
pub mod handlers;
pub mod history;
pub mod presence;
pub mod protocol;
pub mod relay;
pub mod role;
pub mod service;
pub mod typing;

pub use handlers::router;
pub use role::Role;
pub use service::RelayService;
