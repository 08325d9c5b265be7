//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use devicegate_core::domain::session::{
    DeviceIdentity, ManagerConfig, Session, SessionEvent, SessionManager, SessionRepository,
    SessionRepositoryTrait, SessionStatus,
};
use devicegate_core::protocol::SimulatedFactory;
use devicegate_core::storage::Database;
use devicegate_core::{Error, Result};

pub struct Harness {
    pub db: Database,
    pub repo: Arc<SessionRepository>,
    pub store: Arc<FlakyStore>,
    pub factory: Arc<SimulatedFactory>,
    pub manager: SessionManager,
}

/// Fresh in-memory store, simulated engine and manager
pub async fn harness() -> Harness {
    let db = Database::in_memory().await.expect("in-memory database");
    harness_on(db).await
}

/// Manager over an existing database, as a restarted process would see it
pub async fn harness_on(db: Database) -> Harness {
    let repo = Arc::new(SessionRepository::new(db.pool().clone()));
    let store = Arc::new(FlakyStore::new(repo.clone()));
    let factory = Arc::new(SimulatedFactory::new());
    let manager = SessionManager::new(store.clone(), factory.clone(), ManagerConfig::default());
    Harness {
        db,
        repo,
        store,
        factory,
        manager,
    }
}

/// Poll until `check` holds or fail after about a second
pub async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {}", what);
}

pub async fn wait_for_status(manager: &SessionManager, key: &str, status: SessionStatus) {
    eventually(&format!("{} to become {}", key, status), || async move {
        manager.get(key).await.map(|s| s.status == status).unwrap_or(false)
    })
    .await;
}

/// A stored session with the given status, as a previous run left it
pub async fn seed(repo: &SessionRepository, name: &str, status: SessionStatus) -> Session {
    let mut session = Session::new(Some(name.to_string()));
    repo.save(&session).await.expect("seed session");
    if status != SessionStatus::Disconnected {
        session.set_status(status);
        repo.update(&session).await.expect("seed status");
    }
    session
}

/// Store and link a paired identity for a stored session
pub async fn seed_identity(repo: &SessionRepository, session: &mut Session, address: &str) {
    let mut identity = DeviceIdentity::fresh();
    identity.address = Some(address.to_string());
    repo.save_identity(&identity).await.expect("seed identity");
    repo.link_identity(session.id, address).await.expect("link identity");
    session.link_identity(address);
}

/// Store wrapper whose operations can be made to fail on demand
pub struct FlakyStore {
    inner: Arc<SessionRepository>,
    fail_writes: AtomicBool,
    fail_delete: AtomicBool,
    fail_identity_reads: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<SessionRepository>) -> Self {
        Self {
            inner,
            fail_writes: AtomicBool::new(false),
            fail_delete: AtomicBool::new(false),
            fail_identity_reads: AtomicBool::new(false),
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn fail_delete(&self, fail: bool) {
        self.fail_delete.store(fail, Ordering::SeqCst);
    }

    pub fn fail_identity_reads(&self, fail: bool) {
        self.fail_identity_reads.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool) -> Result<()> {
        if flag.load(Ordering::SeqCst) {
            Err(Error::DatabaseError(sqlx::Error::PoolClosed))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl SessionRepositoryTrait for FlakyStore {
    async fn save(&self, session: &Session) -> Result<()> {
        self.inner.save(session).await
    }

    async fn update(&self, session: &Session) -> Result<()> {
        Self::check(&self.fail_writes)?;
        self.inner.update(session).await
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
        self.inner.get(session_id).await
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Session>> {
        self.inner.get_by_name(name).await
    }

    async fn list(&self) -> Result<Vec<Session>> {
        self.inner.list().await
    }

    async fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Session>> {
        self.inner.list_by_status(status).await
    }

    async fn delete(&self, session_id: Uuid) -> Result<bool> {
        Self::check(&self.fail_delete)?;
        self.inner.delete(session_id).await
    }

    async fn count_by_status(&self, status: SessionStatus) -> Result<i64> {
        self.inner.count_by_status(status).await
    }

    async fn link_identity(&self, session_id: Uuid, address: &str) -> Result<()> {
        Self::check(&self.fail_writes)?;
        self.inner.link_identity(session_id, address).await
    }

    async fn unlink_identity(&self, session_id: Uuid) -> Result<()> {
        Self::check(&self.fail_writes)?;
        self.inner.unlink_identity(session_id).await
    }

    async fn save_identity(&self, identity: &DeviceIdentity) -> Result<()> {
        Self::check(&self.fail_writes)?;
        self.inner.save_identity(identity).await
    }

    async fn get_identity(&self, address: &str) -> Result<Option<DeviceIdentity>> {
        Self::check(&self.fail_identity_reads)?;
        self.inner.get_identity(address).await
    }

    async fn delete_identity(&self, address: &str) -> Result<bool> {
        Self::check(&self.fail_writes)?;
        self.inner.delete_identity(address).await
    }

    async fn save_event(&self, event: &SessionEvent) -> Result<()> {
        Self::check(&self.fail_writes)?;
        self.inner.save_event(event).await
    }

    async fn get_events(&self, session_id: Uuid, limit: Option<i32>) -> Result<Vec<SessionEvent>> {
        self.inner.get_events(session_id, limit).await
    }
}
