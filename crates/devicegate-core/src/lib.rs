//! Devicegate Core Library
//!
//! This crate provides the core functionality for Devicegate, including:
//! - Session lifecycle (create, connect, pair, disconnect, remove)
//! - Per-session event dispatch with bounded queues
//! - Startup recovery and graceful shutdown
//! - Storage (SQLite identity store with versioned migrations)
//! - The protocol client contract and a simulated engine
//! - Configuration and error taxonomy

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod protocol;
pub mod storage;

pub use error::{Error, ErrorKind, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::domain::session::{
        ManagerConfig, Session, SessionManager, SessionRepository, SessionStatus,
    };
    pub use crate::error::{Error, ErrorKind, Result};
    pub use crate::protocol::{ClientFactory, MessagePayload, ProtocolClient};
    pub use crate::storage::Database;
}
