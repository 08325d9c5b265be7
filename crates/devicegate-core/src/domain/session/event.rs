//! Session event types for the lifecycle audit trail
//!
//! Events record every observed transition for debugging and post-mortems.
//! They are written best-effort and never drive state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Type of session event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEventType {
    /// Session was created
    Created,
    /// Session was rebuilt from the store at startup
    Restored,
    /// A connect attempt started
    Connecting,
    /// Connection established
    Connected,
    /// Connection closed
    Disconnected,
    /// Pairing succeeded and an identity was linked
    Paired,
    /// The account unlinked the device
    LoggedOut,
    /// A connect attempt failed
    Error,
}

impl SessionEventType {
    /// Create from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "created" => Some(Self::Created),
            "restored" => Some(Self::Restored),
            "connecting" => Some(Self::Connecting),
            "connected" => Some(Self::Connected),
            "disconnected" => Some(Self::Disconnected),
            "paired" => Some(Self::Paired),
            "logged_out" => Some(Self::LoggedOut),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Restored => "restored",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Paired => "paired",
            Self::LoggedOut => "logged_out",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for SessionEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A recorded session event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Unique event identifier
    pub id: Uuid,

    /// Session this event belongs to
    pub session_id: Uuid,

    /// Type of event
    pub event_type: SessionEventType,

    /// Event data (JSON)
    pub data: Option<serde_json::Value>,

    /// When the event occurred
    pub created_at: DateTime<Utc>,
}

impl SessionEvent {
    /// Create a new session event
    pub fn new(session_id: Uuid, event_type: SessionEventType, data: Option<serde_json::Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            event_type,
            data,
            created_at: Utc::now(),
        }
    }

    pub fn created(session_id: Uuid, name: Option<&str>) -> Self {
        let data = name.map(|n| serde_json::json!({ "name": n }));
        Self::new(session_id, SessionEventType::Created, data)
    }

    pub fn restored(session_id: Uuid, fresh_identity: bool) -> Self {
        let data = serde_json::json!({ "fresh_identity": fresh_identity });
        Self::new(session_id, SessionEventType::Restored, Some(data))
    }

    pub fn connecting(session_id: Uuid, pairing: bool) -> Self {
        let data = serde_json::json!({ "pairing": pairing });
        Self::new(session_id, SessionEventType::Connecting, Some(data))
    }

    pub fn connected(session_id: Uuid) -> Self {
        Self::new(session_id, SessionEventType::Connected, None)
    }

    pub fn disconnected(session_id: Uuid) -> Self {
        Self::new(session_id, SessionEventType::Disconnected, None)
    }

    /// Create a paired event
    pub fn paired(session_id: Uuid, address: &str) -> Self {
        let data = serde_json::json!({ "address": address });
        Self::new(session_id, SessionEventType::Paired, Some(data))
    }

    /// Create a logged out event
    pub fn logged_out(session_id: Uuid, reason: Option<&str>) -> Self {
        let data = serde_json::json!({ "reason": reason });
        Self::new(session_id, SessionEventType::LoggedOut, Some(data))
    }

    /// Create an error event
    pub fn error(session_id: Uuid, error_message: &str, error_code: Option<&str>) -> Self {
        let data = serde_json::json!({
            "message": error_message,
            "code": error_code,
        });
        Self::new(session_id, SessionEventType::Error, Some(data))
    }
}
