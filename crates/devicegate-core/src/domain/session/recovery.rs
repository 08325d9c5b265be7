//! Startup recovery
//!
//! Rebuilds the registry from the store when the process starts. Every stored
//! session gets a runtime handle; sessions that were connected when the
//! process stopped get one independent reconnection task each.

use std::sync::Arc;

use futures_util::future::join_all;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dispatcher::{self, audit, persist};
use super::event::SessionEvent;
use super::handle::SessionHandle;
use super::identity::DeviceIdentity;
use super::manager::SessionManager;
use super::session::{Session, SessionStatus};
use crate::error::Result;

/// Outcome of [`SessionManager::restore`]
#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Sessions registered from the store
    pub restored: usize,
    /// Sessions that could not reuse a stored identity and must pair again
    pub fresh_identities: usize,
    /// Reconnection tasks, one per session that was connected
    pub reconnecting: Vec<(Uuid, JoinHandle<Result<Session>>)>,
}

/// Outcome of every reconnection attempt
#[derive(Debug, Default)]
pub struct ReconnectSummary {
    pub succeeded: Vec<Uuid>,
    pub failed: Vec<(Uuid, String)>,
}

impl RecoveryReport {
    /// Number of reconnection attempts issued
    pub fn reconnect_count(&self) -> usize {
        self.reconnecting.len()
    }

    /// Wait for every reconnection attempt. One failure never affects others.
    pub async fn join(self) -> ReconnectSummary {
        let (ids, tasks): (Vec<_>, Vec<_>) = self.reconnecting.into_iter().unzip();
        let results = join_all(tasks).await;

        let mut summary = ReconnectSummary::default();
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(Ok(_)) => summary.succeeded.push(id),
                Ok(Err(e)) => summary.failed.push((id, e.to_string())),
                Err(e) => summary.failed.push((id, format!("reconnect task panicked: {}", e))),
            }
        }
        summary
    }
}

impl SessionManager {
    /// Load every stored session into the registry.
    ///
    /// When `reconnect` is set, sessions persisted as `connected` are
    /// reconnected in the background; the returned report holds those tasks.
    pub async fn restore(&self, reconnect: bool) -> Result<RecoveryReport> {
        let sessions = self.store.list().await?;
        let mut report = RecoveryReport::default();

        info!(count = sessions.len(), "Restoring sessions");

        for session in sessions {
            let id = session.id;
            if self.registry.get(id).await.is_some() {
                debug!(session_id = %id, "Session already registered, skipping");
                continue;
            }

            let was_connected = session.status == SessionStatus::Connected;
            let (handle, fresh) = self.adopt(session).await;

            if let Err(e) = self.registry.register(Arc::clone(&handle)).await {
                warn!(session_id = %id, error = %e, "Could not register restored session");
                continue;
            }
            dispatcher::start(
                Arc::clone(&handle),
                Arc::clone(&self.store),
                self.config.event_queue_capacity,
            );
            audit(self.store.as_ref(), SessionEvent::restored(id, fresh)).await;

            report.restored += 1;
            if fresh {
                report.fresh_identities += 1;
            }

            if reconnect && was_connected {
                let manager = self.clone();
                let key = id.to_string();
                let task = tokio::spawn(async move {
                    let result = manager.connect(&key).await;
                    if let Err(e) = &result {
                        warn!(session_id = %key, error = %e, "Reconnect after restart failed");
                    }
                    result
                });
                report.reconnecting.push((id, task));
            }
        }

        info!(
            restored = report.restored,
            reconnecting = report.reconnect_count(),
            fresh_identities = report.fresh_identities,
            "Session recovery finished"
        );

        Ok(report)
    }

    /// Build a runtime handle for a stored session, resolving its identity
    async fn adopt(&self, mut session: Session) -> (Arc<SessionHandle>, bool) {
        let (identity, fresh) = self.resolve_identity(&session).await;

        let mut dirty = false;
        if fresh && session.identity_ref.is_some() {
            session.unlink_identity();
            dirty = true;
        }
        // Nothing is connecting in a fresh process
        if session.status == SessionStatus::Connecting {
            session.set_status(SessionStatus::Disconnected);
            dirty = true;
        }
        if dirty {
            persist(self.store.as_ref(), &session).await;
        }

        let client = self.factory.build(session.id, identity);
        (Arc::new(SessionHandle::new(session, client)), fresh)
    }

    /// Stored identity for the session, or a fresh unpaired one
    async fn resolve_identity(&self, session: &Session) -> (DeviceIdentity, bool) {
        let Some(address) = session.identity_ref.as_deref() else {
            return (DeviceIdentity::fresh(), true);
        };

        match self.store.get_identity(address).await {
            Ok(Some(identity)) => {
                debug!(
                    session_id = %session.id,
                    fingerprint = %identity.fingerprint(),
                    "Reusing stored identity"
                );
                (identity, false)
            }
            Ok(None) => {
                warn!(session_id = %session.id, address = %address, "Linked identity is missing; session must pair again");
                (DeviceIdentity::fresh(), true)
            }
            Err(e) => {
                warn!(session_id = %session.id, error = %e, "Failed to load identity; session must pair again");
                (DeviceIdentity::fresh(), true)
            }
        }
    }
}
