use std::fmt::Display;

use thiserror::Error;

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Failure taxonomy shared by every component of the client.
///
/// `AuthExpired` is terminal: the transport has already torn the session
/// down by the time a caller sees it, so it must never be retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClientError {
    #[error("{0}")]
    Validation(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("session expired")]
    AuthExpired,

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn storage(err: impl Display) -> Self {
        Self::Storage(err.to_string())
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }

    /// Message suitable for an inline error banner.
    pub fn user_message(&self) -> String {
        match self {
            Self::Http { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_displays_backend_message() {
        let err = ClientError::Http {
            status: 404,
            message: "File not found".to_string(),
        };
        assert_eq!(err.to_string(), "File not found");
        assert_eq!(err.user_message(), "File not found");
    }

    #[test]
    fn only_auth_expired_reports_expiry() {
        assert!(ClientError::AuthExpired.is_auth_expired());
        assert!(!ClientError::Network("refused".into()).is_auth_expired());
    }
}
