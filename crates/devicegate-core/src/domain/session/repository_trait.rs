//! Repository trait for session persistence
//!
//! This module defines the trait for session and identity storage operations.
//! The trait abstracts over different storage backends (SQLite, etc.) and is
//! the only view of the store the session layer depends on.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;

use super::event::SessionEvent;
use super::identity::DeviceIdentity;
use super::session::{Session, SessionStatus};

/// Repository trait for session persistence
///
/// Implementations must be safe for concurrent use from many tasks.
#[async_trait]
pub trait SessionRepositoryTrait: Send + Sync {
    // ========== Session CRUD ==========

    /// Insert a new session; fails with `DuplicateName` on a name clash
    async fn save(&self, session: &Session) -> Result<()>;

    /// Overwrite the mutable fields of an existing session
    async fn update(&self, session: &Session) -> Result<()>;

    /// Get a session by ID
    async fn get(&self, session_id: Uuid) -> Result<Option<Session>>;

    /// Get a session by its unique name
    async fn get_by_name(&self, name: &str) -> Result<Option<Session>>;

    /// List all sessions, oldest first
    async fn list(&self) -> Result<Vec<Session>>;

    /// List sessions by status
    async fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Session>>;

    /// Delete a session and its linked identity in one transaction
    async fn delete(&self, session_id: Uuid) -> Result<bool>;

    /// Count sessions by status
    async fn count_by_status(&self, status: SessionStatus) -> Result<i64>;

    // ========== Identity linkage ==========

    /// Point a session at a stored identity
    async fn link_identity(&self, session_id: Uuid, address: &str) -> Result<()>;

    /// Clear a session's identity reference
    async fn unlink_identity(&self, session_id: Uuid) -> Result<()>;

    /// Insert or replace a paired credential bundle (keyed by address)
    async fn save_identity(&self, identity: &DeviceIdentity) -> Result<()>;

    /// Get a credential bundle by address
    async fn get_identity(&self, address: &str) -> Result<Option<DeviceIdentity>>;

    /// Delete a credential bundle by address
    async fn delete_identity(&self, address: &str) -> Result<bool>;

    // ========== Session Events ==========

    /// Save a session event
    async fn save_event(&self, event: &SessionEvent) -> Result<()>;

    /// Get events for a session, newest first
    async fn get_events(&self, session_id: Uuid, limit: Option<i32>) -> Result<Vec<SessionEvent>>;
}
