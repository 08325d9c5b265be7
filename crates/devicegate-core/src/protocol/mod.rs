//! Protocol client contract
//!
//! The wire-level messaging engine is an external collaborator. The session
//! layer only talks to it through [`ProtocolClient`], one instance per session,
//! built by a [`ClientFactory`] from the session's [`DeviceIdentity`].
//!
//! Events are delivered through a synchronous callback registered with
//! [`ProtocolClient::subscribe`]. Implementations may invoke the callback from
//! any thread and must never block on it.

pub mod sim;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::domain::session::DeviceIdentity;

pub use sim::{SimulatedClient, SimulatedFactory};

/// Errors raised by a protocol engine
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("client is not connected")]
    NotConnected,

    #[error("client is already connected")]
    AlreadyConnected,

    #[error("client is not logged in")]
    NotLoggedIn,

    #[error("pairing channel unavailable: {0}")]
    PairingUnavailable(String),

    #[error("pairing failed: {0}")]
    Pairing(String),

    #[error("connect failed: {0}")]
    Connect(String),

    #[error("send failed: {0}")]
    Send(String),
}

/// Lifecycle events emitted by a protocol client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// The connection is established and the client is ready
    Connected,
    /// The connection was closed
    Disconnected,
    /// The account unlinked this device; its identity is no longer valid
    LoggedOut { reason: Option<String> },
    /// Pairing completed and the network assigned an address
    PairSuccess { address: String },
}

impl ClientEvent {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::LoggedOut { .. } => "logged_out",
            Self::PairSuccess { .. } => "pair_success",
        }
    }
}

/// Items yielded by a pairing channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// A new pairing code; supersedes every earlier code
    Code(String),
    /// The device was paired; the channel closes after this item
    Success { address: String },
    /// The engine ran out of codes without a scan
    Timeout,
    /// The engine aborted pairing
    Error(String),
}

/// Outbound payload handed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessagePayload {
    Text { body: String },
}

impl MessagePayload {
    /// Build a plain text payload
    pub fn text(body: impl Into<String>) -> Self {
        Self::Text { body: body.into() }
    }
}

/// Acknowledgement returned by the engine for an accepted message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReceipt {
    /// Engine-assigned message id
    pub message_id: String,
    /// Recipient address
    pub target: String,
    /// When the server accepted the message
    pub timestamp: DateTime<Utc>,
}

/// Callback registered with a client to receive lifecycle events
pub type EventHandler = Box<dyn Fn(ClientEvent) + Send + Sync>;

/// One connection to the messaging network
#[async_trait]
pub trait ProtocolClient: Send + Sync {
    /// Open the network connection
    async fn connect(&self) -> Result<(), ProtocolError>;

    /// Close the network connection
    async fn disconnect(&self);

    /// Whether the underlying socket is open
    fn is_connected(&self) -> bool;

    /// Whether the client holds a paired identity
    fn is_authenticated(&self) -> bool;

    /// Snapshot of the credential bundle the client currently uses
    fn identity(&self) -> DeviceIdentity;

    /// Open the side-channel of rotating pairing codes.
    ///
    /// Must be called before `connect` on an unpaired client. The channel
    /// closes once pairing succeeds, times out or fails.
    async fn open_pairing_channel(&self) -> Result<mpsc::Receiver<PairingEvent>, ProtocolError>;

    /// Register a lifecycle event callback
    fn subscribe(&self, handler: EventHandler);

    /// Send a payload to a network address
    async fn send(&self, target: &str, payload: MessagePayload) -> Result<SendReceipt, ProtocolError>;
}

/// Builds protocol clients for sessions
pub trait ClientFactory: Send + Sync {
    /// Build an unconnected client for `session_id` using `identity`
    fn build(&self, session_id: Uuid, identity: DeviceIdentity) -> Arc<dyn ProtocolClient>;
}

#[cfg(test)]
mod tests {
    use super::*;

    // Verify traits are object-safe
    fn _assert_client_object_safe(_: &dyn ProtocolClient) {}
    fn _assert_factory_object_safe(_: &dyn ClientFactory) {}

    #[test]
    fn test_client_event_serializes_with_tag() {
        let json = serde_json::to_value(ClientEvent::PairSuccess {
            address: "4915100000000:3@s.example".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "pair_success");
        assert_eq!(ClientEvent::LoggedOut { reason: None }.name(), "logged_out");
    }

    #[test]
    fn test_text_payload_builder() {
        assert_eq!(
            MessagePayload::text("hi"),
            MessagePayload::Text { body: "hi".to_string() }
        );
    }
}
