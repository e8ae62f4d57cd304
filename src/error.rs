//! Error taxonomy for session operations
//!
//! Every failure a caller can observe from the session manager is a
//! [`SessionError`]. Transport-level failures are converted at the boundary,
//! and error text that ends up in logs or events is passed through
//! [`sanitize_error_message`] first.

use crate::session::ConnectionState;
use crate::transport::TransportError;
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Errors returned by [`SessionManager`](crate::session::SessionManager) operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    #[error("Authentication rejected by broker: {message}")]
    Auth { message: String },

    #[error("Network error: {message}")]
    Network { message: String },

    #[error("Operation timed out after {millis}ms")]
    Timeout { millis: u64 },

    #[error("Not connected - current state: {state}")]
    NotConnected { state: ConnectionState },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("Operation cancelled by session stop")]
    Cancelled,

    #[error("Session already active - current state: {state}")]
    AlreadyActive { state: ConnectionState },

    #[error("Invalid topic '{topic}': {reason}")]
    InvalidTopic { topic: String, reason: String },
}

impl SessionError {
    pub fn network<S: Into<String>>(message: S) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout {
            millis: duration.as_millis() as u64,
        }
    }

    pub fn invalid_topic<T: Into<String>, R: Into<String>>(topic: T, reason: R) -> Self {
        Self::InvalidTopic {
            topic: topic.into(),
            reason: reason.into(),
        }
    }

    /// Sanitized text suitable for logs and [`SessionEvent`](crate::session::SessionEvent)s
    pub fn sanitized(&self) -> String {
        sanitize_error_message(&self.to_string())
    }
}

impl From<TransportError> for SessionError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Auth(message) => SessionError::Auth { message },
            TransportError::Network(message) => SessionError::Network { message },
            TransportError::Protocol(message) => SessionError::Protocol { message },
            TransportError::Timeout(duration) => SessionError::timeout(duration),
            TransportError::Closed => SessionError::network("transport closed"),
        }
    }
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

const MAX_MESSAGE_LEN: usize = 500;

static SECRET_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(password|passwd|token|key|secret)[=:]\s*\S+").expect("secret pattern")
});

/// Redact credential-looking values and cap length
pub fn sanitize_error_message(message: &str) -> String {
    let mut sanitized = SECRET_PATTERN
        .replace_all(message, "${1}=***")
        .to_string();

    if sanitized.len() > MAX_MESSAGE_LEN {
        let suffix = "...[truncated]";
        let mut cut = MAX_MESSAGE_LEN - suffix.len();
        while !sanitized.is_char_boundary(cut) {
            cut -= 1;
        }
        sanitized = format!("{}{}", &sanitized[..cut], suffix);
    }

    sanitized
}
