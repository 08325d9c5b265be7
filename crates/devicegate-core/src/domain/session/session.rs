//! Session entity and related types
//!
//! Defines the core Session type, its lifecycle status, and name rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{Error, Result};

/// Maximum length of a sanitized session name
pub const MAX_NAME_LEN: usize = 64;

/// Session status indicating the current state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// No network connection
    Disconnected,
    /// Connect requested; waiting for authentication
    Connecting,
    /// Connected and authenticated
    Connected,
    /// The account unlinked this device; pairing is required again
    LoggedOut,
    /// The last connect attempt failed
    Error,
}

impl SessionStatus {
    /// All statuses, in lifecycle order
    pub const ALL: [SessionStatus; 5] = [
        Self::Disconnected,
        Self::Connecting,
        Self::Connected,
        Self::LoggedOut,
        Self::Error,
    ];

    /// Create from string representation
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "disconnected" => Some(Self::Disconnected),
            "connecting" => Some(Self::Connecting),
            "connected" => Some(Self::Connected),
            "logged_out" => Some(Self::LoggedOut),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    /// Convert to string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::LoggedOut => "logged_out",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Sanitize a requested session name for use as an HTTP path segment
///
/// Whitespace runs become `-`, anything outside `[A-Za-z0-9_-]` is dropped.
pub fn sanitize_name(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut pending_dash = false;

    for c in raw.trim().chars() {
        if c.is_whitespace() {
            pending_dash = true;
            continue;
        }
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            if pending_dash && !out.is_empty() {
                out.push('-');
            }
            pending_dash = false;
            out.push(c);
        }
    }

    if out.is_empty() {
        return Err(Error::InvalidName(format!(
            "'{}' contains no usable characters (allowed: A-Z a-z 0-9 _ -)",
            raw
        )));
    }
    if out.len() > MAX_NAME_LEN {
        return Err(Error::InvalidName(format!(
            "'{}' is longer than {} characters",
            out, MAX_NAME_LEN
        )));
    }
    Ok(out)
}

/// One addressable connection to the messaging network
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier
    pub id: Uuid,

    /// Optional unique, sanitized label
    pub name: Option<String>,

    /// Current lifecycle status
    pub status: SessionStatus,

    /// Network address of the linked device identity
    pub identity_ref: Option<String>,

    /// When the session was created
    pub created_at: DateTime<Utc>,

    /// When the session last became connected
    pub connected_at: Option<DateTime<Utc>>,

    /// When the status last changed
    pub last_seen_at: DateTime<Utc>,
}

impl Session {
    /// Create a new disconnected session without identity
    pub fn new(name: Option<String>) -> Self {
        Self::with_id(Uuid::new_v4(), name)
    }

    /// Create a new session with a specific ID (for testing or recovery)
    pub fn with_id(id: Uuid, name: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            name,
            status: SessionStatus::Disconnected,
            identity_ref: None,
            created_at: now,
            connected_at: None,
            last_seen_at: now,
        }
    }

    /// Update the last seen timestamp
    pub fn touch(&mut self) {
        self.last_seen_at = Utc::now();
    }

    /// Move to a new status
    pub fn set_status(&mut self, status: SessionStatus) {
        if status == SessionStatus::Connected && self.status != SessionStatus::Connected {
            self.connected_at = Some(Utc::now());
        }
        self.status = status;
        self.touch();
    }

    /// Link an authenticated identity
    pub fn link_identity(&mut self, address: impl Into<String>) {
        self.identity_ref = Some(address.into());
        self.touch();
    }

    /// Drop the identity link
    pub fn unlink_identity(&mut self) {
        self.identity_ref = None;
        self.touch();
    }

    /// Whether an identity has been linked
    pub fn is_authenticated(&self) -> bool {
        self.identity_ref.is_some()
    }

    /// Name if set, otherwise the id; used in messages and logs
    pub fn display_key(&self) -> String {
        self.name.clone().unwrap_or_else(|| self.id.to_string())
    }
}
