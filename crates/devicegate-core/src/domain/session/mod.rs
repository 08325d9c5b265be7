//! Session domain module
//!
//! Manages many independent connections to the messaging network, one per
//! session, and keeps their lifecycle consistent between memory and the
//! store.
//!
//! # Architecture
//!
//! - **Entities**: `Session`, `SessionEvent`, `DeviceIdentity`
//! - **Repository**: `SessionRepositoryTrait` and its SQLite implementation
//! - **Runtime**: `SessionHandle` per live session, kept in a `SessionRegistry`
//! - **Dispatcher**: one bounded event queue and consumer task per session
//! - **Manager**: `SessionManager` for create/connect/disconnect/remove/status
//! - **Recovery**: `SessionManager::restore` rebuilds the registry at startup
//! - **Shutdown**: `ShutdownHandler` stops tasks and closes connections
//!
//! # Example
//!
//! ```ignore
//! use devicegate_core::domain::session::{ManagerConfig, SessionManager, SessionRepository};
//! use devicegate_core::protocol::SimulatedFactory;
//! use std::sync::Arc;
//!
//! let store = Arc::new(SessionRepository::new(pool.clone()));
//! let manager = SessionManager::new(store, Arc::new(SimulatedFactory::new()), ManagerConfig::default());
//!
//! // Reload sessions from a previous run
//! manager.restore(true).await?;
//!
//! // Create and pair a new session
//! let session = manager.create(Some("sales")).await?;
//! manager.connect("sales").await?;
//! let code = manager.get_qr("sales").await?;
//! ```

pub mod dispatcher;
pub mod event;
pub mod handle;
pub mod identity;
pub mod manager;
pub mod pairing;
pub mod recovery;
pub mod registry;
pub mod repository;
pub mod repository_trait;
pub mod session;
pub mod shutdown;

// Re-export main types
pub use event::{SessionEvent, SessionEventType};
pub use handle::SessionHandle;
pub use identity::DeviceIdentity;
pub use manager::{ManagerConfig, SessionManager, SessionStats, StatusReport};
pub use recovery::{ReconnectSummary, RecoveryReport};
pub use registry::SessionRegistry;
pub use repository::SessionRepository;
pub use repository_trait::SessionRepositoryTrait;
pub use session::{MAX_NAME_LEN, Session, SessionStatus, sanitize_name};
pub use shutdown::{ShutdownConfig, ShutdownHandler, ShutdownResult};
