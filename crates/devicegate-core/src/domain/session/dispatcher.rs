//! Per-session event dispatcher
//!
//! Protocol clients deliver lifecycle events through a synchronous callback.
//! The dispatcher turns that callback into a bounded queue with a single
//! consumer task per session, so events for one session are applied in
//! emission order and a slow store never blocks the client.
//!
//! When the queue is full the newest event is dropped and counted. Lifecycle
//! events can be re-derived from the client at the next status read.
//!
//! Every transition is mirrored to the store. Store failures are logged and
//! never roll back the in-memory transition.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::event::SessionEvent;
use super::handle::SessionHandle;
use super::repository_trait::SessionRepositoryTrait;
use super::session::{Session, SessionStatus};
use crate::protocol::ClientEvent;

/// Default capacity of a session's event queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Subscribe to the handle's client and spawn the consumer task.
///
/// The task exits when the handle is cancelled; the queue is closed at that
/// point so later callbacks become no-ops.
pub fn start(
    handle: Arc<SessionHandle>,
    store: Arc<dyn SessionRepositoryTrait>,
    capacity: usize,
) -> JoinHandle<()> {
    let (tx, mut rx) = mpsc::channel::<ClientEvent>(capacity.max(1));

    let session_id = handle.id();
    let dropped = handle.dropped_counter();
    handle.client().subscribe(Box::new(move |event| match tx.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
            if total == 1 || total % 100 == 0 {
                warn!(
                    session_id = %session_id,
                    event = event.name(),
                    dropped = total,
                    "Event queue full, dropping event"
                );
            } else {
                debug!(session_id = %session_id, event = event.name(), "Dropped event");
            }
        }
        Err(TrySendError::Closed(_)) => {}
    }));

    let cancel = handle.cancel_token();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    rx.close();
                    break;
                }
                event = rx.recv() => match event {
                    Some(event) => apply(&handle, store.as_ref(), event).await,
                    None => break,
                },
            }
        }
        debug!(session_id = %handle.id(), "Event dispatcher stopped");
    })
}

/// Apply one client event to the session and mirror it to the store
pub async fn apply(handle: &SessionHandle, store: &dyn SessionRepositoryTrait, event: ClientEvent) {
    debug!(session_id = %handle.id(), event = event.name(), "Applying client event");

    match event {
        ClientEvent::Connected => on_connected(handle, store).await,
        ClientEvent::Disconnected => on_disconnected(handle, store).await,
        ClientEvent::LoggedOut { reason } => on_logged_out(handle, store, reason).await,
        ClientEvent::PairSuccess { address } => on_paired(handle, store, address).await,
    }
}

async fn on_connected(handle: &SessionHandle, store: &dyn SessionRepositoryTrait) {
    link_current_identity(handle, store).await;

    let snapshot = {
        let mut state = handle.state().write().await;
        state.set_status(SessionStatus::Connected);
        state.clone()
    };
    handle.clear_qr().await;

    info!(session_id = %handle.id(), "Session connected");
    persist(store, &snapshot).await;
    audit(store, SessionEvent::connected(handle.id())).await;
}

async fn on_disconnected(handle: &SessionHandle, store: &dyn SessionRepositoryTrait) {
    let snapshot = {
        let mut state = handle.state().write().await;
        // A logout or an abandoned connect already settled the session
        if matches!(
            state.status,
            SessionStatus::LoggedOut | SessionStatus::Disconnected | SessionStatus::Error
        ) {
            return;
        }
        state.set_status(SessionStatus::Disconnected);
        state.clone()
    };

    info!(session_id = %handle.id(), "Session disconnected");
    persist(store, &snapshot).await;
    audit(store, SessionEvent::disconnected(handle.id())).await;
}

async fn on_logged_out(
    handle: &SessionHandle,
    store: &dyn SessionRepositoryTrait,
    reason: Option<String>,
) {
    let (snapshot, previous) = {
        let mut state = handle.state().write().await;
        let previous = state.identity_ref.take();
        state.set_status(SessionStatus::LoggedOut);
        (state.clone(), previous)
    };
    handle.end_pairing().await;
    handle.clear_qr().await;

    info!(
        session_id = %handle.id(),
        reason = reason.as_deref().unwrap_or("unspecified"),
        "Session logged out"
    );

    persist(store, &snapshot).await;
    if let Err(e) = store.unlink_identity(handle.id()).await {
        warn!(session_id = %handle.id(), error = %e, "Failed to unlink identity");
    }
    if let Some(address) = previous {
        if let Err(e) = store.delete_identity(&address).await {
            warn!(session_id = %handle.id(), error = %e, "Failed to delete identity");
        }
    }
    audit(store, SessionEvent::logged_out(handle.id(), reason.as_deref())).await;
}

async fn on_paired(handle: &SessionHandle, store: &dyn SessionRepositoryTrait, address: String) {
    info!(session_id = %handle.id(), address = %address, "Pairing succeeded");
    handle.clear_qr().await;
    link_current_identity(handle, store).await;
    audit(store, SessionEvent::paired(handle.id(), &address)).await;
}

/// Snapshot the client's identity and link it when it changed
async fn link_current_identity(handle: &SessionHandle, store: &dyn SessionRepositoryTrait) {
    let client = handle.client();
    if !client.is_authenticated() {
        return;
    }

    let identity = client.identity();
    let Some(address) = identity.address.clone() else {
        return;
    };

    {
        let mut state = handle.state().write().await;
        if state.identity_ref.as_deref() == Some(address.as_str()) {
            return;
        }
        state.link_identity(address.clone());
    }

    debug!(
        session_id = %handle.id(),
        fingerprint = %identity.fingerprint(),
        "Linking device identity"
    );

    // The identity row must exist before the session can point at it
    if let Err(e) = store.save_identity(&identity).await {
        warn!(session_id = %handle.id(), error = %e, "Failed to persist identity");
        return;
    }
    if let Err(e) = store.link_identity(handle.id(), &address).await {
        warn!(session_id = %handle.id(), error = %e, "Failed to link identity");
    }
}

/// Mirror a session record to the store, logging failures
pub(crate) async fn persist(store: &dyn SessionRepositoryTrait, session: &Session) {
    if let Err(e) = store.update(session).await {
        warn!(
            session_id = %session.id,
            status = %session.status,
            error = %e,
            "Failed to persist session state"
        );
    }
}

/// Append to the audit trail, logging failures
pub(crate) async fn audit(store: &dyn SessionRepositoryTrait, event: SessionEvent) {
    if let Err(e) = store.save_event(&event).await {
        debug!(
            session_id = %event.session_id,
            event_type = %event.event_type,
            error = %e,
            "Failed to record session event"
        );
    }
}
