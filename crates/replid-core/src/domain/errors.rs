//! Domain error type and the shared wire error payload

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by domain-level validation, independent of any engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A peer id was empty or malformed.
    #[error("invalid peer id: {0}")]
    InvalidPeerId(String),
}

/// The JSON body of every non-2xx API response.
///
/// Carrying the status inside the body lets clients distinguish error
/// kinds programmatically instead of string-matching prose.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Human-readable description of what went wrong.
    pub message: String,
    /// The HTTP status, repeated in the body.
    pub status: u16,
}

impl ErrorPayload {
    /// Creates a payload for `status`.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_payload_roundtrip() {
        let payload = ErrorPayload::new(401, "unknown peer id");
        let json = serde_json::to_string(&payload).unwrap();
        let back: ErrorPayload = serde_json::from_str(&json).unwrap();
        assert_eq!(payload, back);
    }

    #[test]
    fn test_display() {
        let err = DomainError::InvalidPeerId("".to_string());
        assert_eq!(err.to_string(), "invalid peer id: ");
    }
}
