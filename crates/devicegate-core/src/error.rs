//! Error types for Devicegate

use thiserror::Error;

use crate::protocol::ProtocolError;

/// Result type alias using Devicegate's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse error classification used by callers (HTTP handlers, CLI)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown session identifier or name
    NotFound,
    /// Operation is not valid in the session's current state
    Conflict,
    /// Malformed or duplicate input
    Validation,
    /// The protocol engine failed a connect/send call
    Protocol,
    /// Store read/write failure
    Persistence,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// HTTP status code for this kind of error
    pub fn http_status(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Validation => 400,
            Self::Protocol | Self::Persistence | Self::Internal => 500,
        }
    }
}

/// Devicegate error types with helpful messages and suggestions
#[derive(Error, Debug)]
pub enum Error {
    // Lookup errors (E001-E099)
    #[error("Session '{0}' not found. Run `devicegate sessions list` to see all sessions.")]
    SessionNotFound(String),

    // State conflicts (E100-E199)
    #[error("Session '{0}' is already connected")]
    AlreadyConnected(String),

    #[error("Session '{0}' is not connected")]
    NotConnected(String),

    #[error("Session '{0}' is already authenticated; no pairing code is needed")]
    AlreadyAuthenticated(String),

    // Validation errors (E200-E299)
    #[error("Invalid session name: {0}")]
    InvalidName(String),

    #[error("Session name '{0}' is already in use")]
    DuplicateName(String),

    #[error("Session limit reached ({0} sessions)")]
    SessionLimitReached(usize),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    // Protocol errors (E300-E399)
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    // Database errors (E400-E499)
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Failed to parse stored record: {0}")]
    Parse(String),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::SessionNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyConnected(_) | Self::NotConnected(_) | Self::AlreadyAuthenticated(_) => {
                ErrorKind::Conflict
            }
            Self::InvalidName(_)
            | Self::DuplicateName(_)
            | Self::SessionLimitReached(_)
            | Self::InvalidInput(_) => ErrorKind::Validation,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::DatabaseError(_) | Self::Parse(_) => ErrorKind::Persistence,
            Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Get error code for this error type
    pub fn code(&self) -> &'static str {
        match self {
            Self::SessionNotFound(_) => "E001",
            Self::AlreadyConnected(_) => "E100",
            Self::NotConnected(_) => "E101",
            Self::AlreadyAuthenticated(_) => "E102",
            Self::InvalidName(_) => "E200",
            Self::DuplicateName(_) => "E201",
            Self::SessionLimitReached(_) => "E202",
            Self::InvalidInput(_) => "E203",
            Self::Protocol(_) => "E300",
            Self::DatabaseError(_) => "E400",
            Self::Parse(_) => "E401",
            Self::Other(_) => "E9999",
        }
    }

    /// Get suggestion for how to fix this error
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::SessionNotFound(_) => Some("devicegate sessions list".to_string()),
            Self::NotConnected(key) => Some(format!("POST /sessions/{}/connect", key)),
            Self::DuplicateName(_) => Some("Choose a different session name".to_string()),
            Self::SessionLimitReached(_) => {
                Some("devicegate config set sessions.max_sessions <n>".to_string())
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds_map_to_http_status() {
        assert_eq!(Error::SessionNotFound("x".into()).kind().http_status(), 404);
        assert_eq!(Error::AlreadyConnected("x".into()).kind().http_status(), 409);
        assert_eq!(Error::NotConnected("x".into()).kind().http_status(), 409);
        assert_eq!(Error::AlreadyAuthenticated("x".into()).kind().http_status(), 409);
        assert_eq!(Error::DuplicateName("x".into()).kind().http_status(), 400);
        assert_eq!(
            Error::Protocol(ProtocolError::Connect("boom".into())).kind().http_status(),
            500
        );
        assert_eq!(Error::Parse("bad".into()).kind(), ErrorKind::Persistence);
    }

    #[test]
    fn test_error_codes_are_distinct_per_variant() {
        let errors = [
            Error::SessionNotFound("a".into()),
            Error::AlreadyConnected("a".into()),
            Error::NotConnected("a".into()),
            Error::AlreadyAuthenticated("a".into()),
            Error::InvalidName("a".into()),
            Error::DuplicateName("a".into()),
            Error::SessionLimitReached(1),
        ];
        let mut codes: Vec<_> = errors.iter().map(|e| e.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
    }

    #[test]
    fn test_not_found_message_has_hint() {
        let err = Error::SessionNotFound("sales".into());
        assert!(err.to_string().contains("devicegate sessions list"));
        assert_eq!(err.suggestion().as_deref(), Some("devicegate sessions list"));
    }
}
