//! API Module
//!
//! Serializable request and response types for the HTTP surface and the CLI,
//! plus store-level queries that work without a running session manager.

pub mod health;
pub mod sessions;

pub use health::{HealthCheck, HealthReport, HealthStatus, check};
pub use sessions::{
    CreateSessionRequest, EventSummary, QrResponse, SendMessageRequest, SendMessageResponse,
    SessionDetail, SessionSummary, StatusResponse,
};
