use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::chat::protocol::{ErrorPayload, ServerEvent};

/// Errors surfaced by the relay core.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// Malformed or missing fields, empty ciphertext, bad identity strings.
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// The connection's role does not grant the requested event.
    #[error("'{0}' is not permitted for this connection")]
    Forbidden(&'static str),

    /// Storage unreachable or a write failed. Single attempt, never retried.
    #[error("storage error: {0}")]
    Persistence(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Forbidden(_) => StatusCode::FORBIDDEN,
            Error::Persistence(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show a client. Storage and internal details stay in the logs.
    pub fn public_message(&self) -> String {
        match self {
            Error::Persistence(_) => "Storage unavailable, operation failed".to_string(),
            Error::Internal(_) => "Something went wrong".to_string(),
            other => other.to_string(),
        }
    }

    /// Structured `error` event for the originating connection.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error(ErrorPayload {
            message: self.public_message(),
            status_code: self.status_code().as_u16(),
        })
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({
            "error": {
                "message": self.public_message()
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Validation(format!("malformed event: {}", err))
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::NotFound("identity".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::Forbidden("get-stats").status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            Error::Persistence("db down".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_persistence_detail_not_exposed() {
        let err = Error::Persistence("disk I/O error at /var/lib/relay".into());
        match err.to_event() {
            ServerEvent::Error(payload) => {
                assert_eq!(payload.status_code, 500);
                assert!(!payload.message.contains("/var/lib"));
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_validation_message_passed_through() {
        let err = Error::validation("ciphertext must not be empty");
        match err.to_event() {
            ServerEvent::Error(payload) => {
                assert_eq!(payload.status_code, 400);
                assert_eq!(payload.message, "ciphertext must not be empty");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
