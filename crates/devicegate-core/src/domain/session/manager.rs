//! Session manager for orchestrating session lifecycle
//!
//! The manager is the only writer of session state outside the per-session
//! dispatchers. It ties together the registry, the protocol clients and the
//! store:
//!
//! ```text
//! disconnected --connect--> connecting --(Connected)--> connected
//! connected --disconnect--> disconnected
//! connected --(LoggedOut)--> logged_out
//! any connect failure --> error (connect may be retried)
//! ```
//!
//! In-memory state is authoritative. Store writes that follow a transition
//! are best-effort and logged on failure.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::dispatcher::{self, DEFAULT_QUEUE_CAPACITY, audit, persist};
use super::event::SessionEvent;
use super::handle::SessionHandle;
use super::identity::DeviceIdentity;
use super::pairing;
use super::registry::SessionRegistry;
use super::repository_trait::SessionRepositoryTrait;
use super::session::{Session, SessionStatus, sanitize_name};
use crate::error::{Error, Result};
use crate::protocol::{ClientFactory, MessagePayload, ProtocolError, SendReceipt};

/// Tunables for the session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Capacity of each session's event queue
    pub event_queue_capacity: usize,
    /// Upper bound on live sessions; unlimited when `None`
    pub max_sessions: Option<usize>,
    /// Render pairing codes to the terminal
    pub print_qr: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            event_queue_capacity: DEFAULT_QUEUE_CAPACITY,
            max_sessions: None,
            print_qr: false,
        }
    }
}

/// Result of a status read, after reconciliation
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub session: Session,
    /// Live connectivity reported by the protocol client
    pub connected: bool,
    /// Whether the client holds a paired identity
    pub authenticated: bool,
    /// Whether a pairing code is waiting to be scanned
    pub has_qr: bool,
    /// Events dropped because the session's queue was full
    pub dropped_events: u64,
}

/// Live session counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub total: usize,
    pub disconnected: usize,
    pub connecting: usize,
    pub connected: usize,
    pub logged_out: usize,
    pub error: usize,
}

/// Manager for session lifecycle operations
#[derive(Clone)]
pub struct SessionManager {
    pub(super) store: Arc<dyn SessionRepositoryTrait>,
    pub(super) factory: Arc<dyn ClientFactory>,
    pub(super) registry: Arc<SessionRegistry>,
    pub(super) config: ManagerConfig,
}

impl SessionManager {
    /// Create a new session manager with an empty registry
    pub fn new(
        store: Arc<dyn SessionRepositoryTrait>,
        factory: Arc<dyn ClientFactory>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            store,
            factory,
            registry: Arc::new(SessionRegistry::new()),
            config,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn store(&self) -> &Arc<dyn SessionRepositoryTrait> {
        &self.store
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    // ========== Session Lifecycle ==========

    /// Create a new disconnected session with a fresh, unpaired client
    pub async fn create(&self, name: Option<&str>) -> Result<Session> {
        let name = name.map(sanitize_name).transpose()?;

        if let Some(max) = self.config.max_sessions {
            if self.registry.len().await >= max {
                return Err(Error::SessionLimitReached(max));
            }
        }
        if let Some(name) = &name {
            if self.registry.name_taken(name).await {
                return Err(Error::DuplicateName(name.clone()));
            }
        }

        let session = Session::new(name);
        self.store.save(&session).await?;

        let client = self.factory.build(session.id, DeviceIdentity::fresh());
        let handle = Arc::new(SessionHandle::new(session.clone(), client));
        if let Err(e) = self
            .registry
            .register_within(Arc::clone(&handle), self.config.max_sessions)
            .await
        {
            // Lost a race against a concurrent create; undo the insert
            if let Err(cleanup) = self.store.delete(session.id).await {
                warn!(session_id = %session.id, error = %cleanup, "Failed to roll back session record");
            }
            return Err(e);
        }

        dispatcher::start(
            Arc::clone(&handle),
            Arc::clone(&self.store),
            self.config.event_queue_capacity,
        );
        audit(self.store.as_ref(), SessionEvent::created(session.id, session.name.as_deref())).await;

        info!(
            session_id = %session.id,
            name = session.name.as_deref().unwrap_or("-"),
            "Created new session"
        );

        Ok(session)
    }

    /// Get a session by id or name
    pub async fn get(&self, key: &str) -> Result<Session> {
        Ok(self.resolve(key).await?.snapshot().await)
    }

    /// List all live sessions, oldest first
    pub async fn list(&self) -> Vec<Session> {
        let mut sessions = Vec::new();
        for handle in self.registry.list().await {
            sessions.push(handle.snapshot().await);
        }
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    /// Open the network connection, pairing first if the session has no identity
    pub async fn connect(&self, key: &str) -> Result<Session> {
        let handle = self.resolve(key).await?;
        let client = Arc::clone(handle.client());
        let _guard = handle.lock_connect().await;

        if client.is_connected() {
            return Err(Error::AlreadyConnected(handle.display_key()));
        }

        let needs_pairing = !client.is_authenticated();
        let codes = if needs_pairing {
            match client.open_pairing_channel().await {
                Ok(codes) => Some(codes),
                Err(e) => return Err(self.fail_connect(&handle, e).await),
            }
        } else {
            None
        };

        let (snapshot, previous) = {
            let mut state = handle.state().write().await;
            let previous = state.status;
            state.set_status(SessionStatus::Connecting);
            (state.clone(), previous)
        };
        persist(self.store.as_ref(), &snapshot).await;
        audit(self.store.as_ref(), SessionEvent::connecting(handle.id(), needs_pairing)).await;

        info!(session_id = %handle.id(), pairing = needs_pairing, "Connecting session");

        match client.connect().await {
            Ok(()) => {
                // Codes stay buffered in the channel until the socket is up
                if let Some(codes) = codes {
                    let token = handle.begin_pairing().await;
                    pairing::spawn(
                        Arc::clone(&handle),
                        Arc::clone(&self.store),
                        codes,
                        token,
                        self.config.print_qr,
                    );
                }
                Ok(handle.snapshot().await)
            }
            // The socket was opened outside this manager; leave it as found
            Err(ProtocolError::AlreadyConnected) => {
                let restored = {
                    let mut state = handle.state().write().await;
                    if state.status == SessionStatus::Connecting {
                        state.set_status(previous);
                        Some(state.clone())
                    } else {
                        None
                    }
                };
                if let Some(restored) = restored {
                    persist(self.store.as_ref(), &restored).await;
                }
                Err(Error::AlreadyConnected(handle.display_key()))
            }
            Err(e) => Err(self.fail_connect(&handle, e).await),
        }
    }

    async fn fail_connect(&self, handle: &SessionHandle, err: ProtocolError) -> Error {
        handle.end_pairing().await;

        let snapshot = {
            let mut state = handle.state().write().await;
            state.set_status(SessionStatus::Error);
            state.clone()
        };
        warn!(session_id = %handle.id(), error = %err, "Connect failed");

        persist(self.store.as_ref(), &snapshot).await;
        let message = err.to_string();
        let error = Error::Protocol(err);
        audit(
            self.store.as_ref(),
            SessionEvent::error(handle.id(), &message, Some(error.code())),
        )
        .await;
        error
    }

    /// Close the network connection
    pub async fn disconnect(&self, key: &str) -> Result<Session> {
        let handle = self.resolve(key).await?;
        let client = handle.client();

        if !client.is_connected() {
            return Err(Error::NotConnected(handle.display_key()));
        }

        handle.end_pairing().await;
        handle.clear_qr().await;
        client.disconnect().await;

        let snapshot = {
            let mut state = handle.state().write().await;
            state.set_status(SessionStatus::Disconnected);
            state.clone()
        };
        persist(self.store.as_ref(), &snapshot).await;
        audit(self.store.as_ref(), SessionEvent::disconnected(handle.id())).await;

        info!(session_id = %handle.id(), "Disconnected session");
        Ok(snapshot)
    }

    /// Tear down a session and delete it with its identity.
    ///
    /// The in-memory registration is always removed. A failed store delete is
    /// returned afterwards and leaves a stale record behind.
    pub async fn remove(&self, key: &str) -> Result<()> {
        let handle = self.resolve(key).await?;
        let id = handle.id();

        handle.end_pairing().await;
        if handle.client().is_connected() {
            handle.client().disconnect().await;
        }
        handle.cancel();
        self.registry.remove(id).await;

        match self.store.delete(id).await {
            Ok(found) => {
                info!(session_id = %id, persisted = found, "Removed session");
                Ok(())
            }
            Err(e) => {
                warn!(session_id = %id, error = %e, "Session removed from memory but not from store");
                Err(e)
            }
        }
    }

    /// Read the status, correcting it against the client's live state first
    pub async fn status(&self, key: &str) -> Result<StatusReport> {
        let handle = self.resolve(key).await?;
        let connected = handle.client().is_connected();
        let authenticated = handle.client().is_authenticated();

        let (snapshot, previous) = {
            let mut state = handle.state().write().await;
            let previous = state.status;
            match state.status {
                SessionStatus::Connected if !connected => {
                    state.set_status(SessionStatus::Disconnected);
                }
                SessionStatus::Connected | SessionStatus::LoggedOut => {}
                _ if connected && authenticated => {
                    state.set_status(SessionStatus::Connected);
                }
                _ => {}
            }
            (state.clone(), previous)
        };

        if snapshot.status != previous {
            info!(
                session_id = %handle.id(),
                from = %previous,
                to = %snapshot.status,
                "Reconciled session status"
            );
            persist(self.store.as_ref(), &snapshot).await;
        }

        Ok(StatusReport {
            session: snapshot,
            connected,
            authenticated,
            has_qr: handle.qr().await.is_some(),
            dropped_events: handle.dropped_events(),
        })
    }

    /// Latest pairing code; `None` until one has been issued
    pub async fn get_qr(&self, key: &str) -> Result<Option<String>> {
        let handle = self.resolve(key).await?;

        if handle.snapshot().await.is_authenticated() {
            return Err(Error::AlreadyAuthenticated(handle.display_key()));
        }

        Ok(handle.qr().await)
    }

    /// Send a payload through a connected, authenticated session
    pub async fn send_message(
        &self,
        key: &str,
        target: &str,
        payload: MessagePayload,
    ) -> Result<SendReceipt> {
        let handle = self.resolve(key).await?;
        let client = handle.client();

        let target = target.trim();
        if target.is_empty() {
            return Err(Error::InvalidInput("recipient address is empty".to_string()));
        }
        if !client.is_connected() || !client.is_authenticated() {
            return Err(Error::NotConnected(handle.display_key()));
        }

        let receipt = client.send(target, payload).await?;
        debug!(
            session_id = %handle.id(),
            message_id = %receipt.message_id,
            "Message accepted"
        );
        Ok(receipt)
    }

    /// Audit trail of a session, newest first
    pub async fn events(&self, key: &str, limit: Option<i32>) -> Result<Vec<SessionEvent>> {
        let handle = self.resolve(key).await?;
        self.store.get_events(handle.id(), limit).await
    }

    /// Count live sessions by status
    pub async fn stats(&self) -> SessionStats {
        let mut stats = SessionStats::default();
        for handle in self.registry.list().await {
            stats.total += 1;
            match handle.status().await {
                SessionStatus::Disconnected => stats.disconnected += 1,
                SessionStatus::Connecting => stats.connecting += 1,
                SessionStatus::Connected => stats.connected += 1,
                SessionStatus::LoggedOut => stats.logged_out += 1,
                SessionStatus::Error => stats.error += 1,
            }
        }
        stats
    }

    pub(super) async fn resolve(&self, key: &str) -> Result<Arc<SessionHandle>> {
        self.registry
            .get_by_name_or_id(key)
            .await
            .ok_or_else(|| Error::SessionNotFound(key.to_string()))
    }

    /// Handle for a session id, if it is live
    pub async fn handle(&self, id: Uuid) -> Option<Arc<SessionHandle>> {
        self.registry.get(id).await
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
