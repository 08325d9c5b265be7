//! Runtime state of a live session
//!
//! A [`SessionHandle`] exists only while the process is alive. It owns the
//! protocol client, the latest pairing code and the cancellation token of the
//! session's background tasks. Persisted fields live in the inner [`Session`],
//! which is only mutated by the dispatcher and by the session manager.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{Mutex, MutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::session::{Session, SessionStatus};
use crate::protocol::ProtocolClient;

/// Runtime handle of one registered session
pub struct SessionHandle {
    id: Uuid,
    name: Option<String>,
    state: RwLock<Session>,
    client: Arc<dyn ProtocolClient>,
    qr: RwLock<Option<String>>,
    cancel: CancellationToken,
    pairing: Mutex<Option<CancellationToken>>,
    connect_lock: Mutex<()>,
    dropped_events: Arc<AtomicU64>,
}

impl SessionHandle {
    /// Wrap a session and its protocol client
    pub fn new(session: Session, client: Arc<dyn ProtocolClient>) -> Self {
        Self {
            id: session.id,
            name: session.name.clone(),
            state: RwLock::new(session),
            client,
            qr: RwLock::new(None),
            cancel: CancellationToken::new(),
            pairing: Mutex::new(None),
            connect_lock: Mutex::new(()),
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Name if set, otherwise the id
    pub fn display_key(&self) -> String {
        self.name
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn client(&self) -> &Arc<dyn ProtocolClient> {
        &self.client
    }

    /// Copy of the current session record
    pub async fn snapshot(&self) -> Session {
        self.state.read().await.clone()
    }

    pub async fn status(&self) -> SessionStatus {
        self.state.read().await.status
    }

    /// Lock the session record for a transition
    pub(crate) fn state(&self) -> &RwLock<Session> {
        &self.state
    }

    // ========== Pairing code ==========

    /// Latest pairing code, if one has been issued
    pub async fn qr(&self) -> Option<String> {
        self.qr.read().await.clone()
    }

    #[cfg(test)]
    pub(crate) async fn set_qr(&self, code: String) {
        *self.qr.write().await = Some(code);
    }

    /// Cache a code from the pairing task owning `token`.
    ///
    /// The token is checked under the cache lock, so a canceller that clears
    /// the cache after cancelling never sees a late code.
    pub(crate) async fn offer_qr(&self, code: String, token: &CancellationToken) -> bool {
        let mut slot = self.qr.write().await;
        if token.is_cancelled() {
            return false;
        }
        *slot = Some(code);
        true
    }

    pub(crate) async fn clear_qr(&self) {
        self.qr.write().await.take();
    }

    /// Start a new pairing attempt, cancelling any previous one
    pub(crate) async fn begin_pairing(&self) -> CancellationToken {
        let token = self.cancel.child_token();
        if let Some(previous) = self.pairing.lock().await.replace(token.clone()) {
            previous.cancel();
        }
        token
    }

    /// Stop the running pairing task, if any
    pub(crate) async fn end_pairing(&self) {
        if let Some(token) = self.pairing.lock().await.take() {
            token.cancel();
        }
    }

    /// Serialize connect attempts on this session
    pub(crate) async fn lock_connect(&self) -> MutexGuard<'_, ()> {
        self.connect_lock.lock().await
    }

    // ========== Background tasks ==========

    /// Token observed by the dispatcher and pairing tasks
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop every background task of this session
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Events discarded because the queue was full
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    pub(crate) fn dropped_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.dropped_events)
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::DeviceIdentity;
    use crate::protocol::SimulatedClient;

    fn handle() -> SessionHandle {
        let session = Session::new(Some("sales".to_string()));
        let client = Arc::new(SimulatedClient::new(session.id, DeviceIdentity::fresh()));
        SessionHandle::new(session, client)
    }

    #[tokio::test]
    async fn test_qr_cache_keeps_latest() {
        let handle = handle();
        assert!(handle.qr().await.is_none());

        handle.set_qr("first".into()).await;
        handle.set_qr("second".into()).await;
        assert_eq!(handle.qr().await.as_deref(), Some("second"));

        handle.clear_qr().await;
        assert!(handle.qr().await.is_none());
    }

    #[tokio::test]
    async fn test_offer_qr_refused_after_cancel() {
        let handle = handle();
        let token = handle.begin_pairing().await;
        assert!(handle.offer_qr("first".into(), &token).await);

        handle.end_pairing().await;
        handle.clear_qr().await;
        assert!(!handle.offer_qr("late".into(), &token).await);
        assert!(handle.qr().await.is_none());
    }

    #[tokio::test]
    async fn test_new_pairing_cancels_previous() {
        let handle = handle();
        let first = handle.begin_pairing().await;
        let second = handle.begin_pairing().await;
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        handle.end_pairing().await;
        assert!(second.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_reaches_pairing_token() {
        let handle = handle();
        let pairing = handle.begin_pairing().await;
        handle.cancel();
        assert!(handle.is_cancelled());
        assert!(pairing.is_cancelled());
    }
}
