//! In-memory registry of live sessions
//!
//! The registry is the single source of truth for which sessions exist in
//! this process. The map itself is never exposed; all access goes through
//! operation-level methods guarded by one reader/writer lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use uuid::Uuid;

use super::handle::SessionHandle;
use crate::error::{Error, Result};

/// Registry of live session handles keyed by id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a handle; rejects a second entry with the same id or name
    pub async fn register(&self, handle: Arc<SessionHandle>) -> Result<()> {
        self.register_within(handle, None).await
    }

    /// Insert a handle unless the registry already holds `max` sessions
    pub async fn register_within(
        &self,
        handle: Arc<SessionHandle>,
        max: Option<usize>,
    ) -> Result<()> {
        let mut sessions = self.sessions.write().await;

        if let Some(max) = max {
            if sessions.len() >= max {
                return Err(Error::SessionLimitReached(max));
            }
        }

        if sessions.contains_key(&handle.id()) {
            return Err(Error::Other(format!(
                "Session {} is already registered",
                handle.id()
            )));
        }
        if let Some(name) = handle.name() {
            if sessions.values().any(|h| h.name() == Some(name)) {
                return Err(Error::DuplicateName(name.to_string()));
            }
        }

        sessions.insert(handle.id(), handle);
        Ok(())
    }

    pub async fn get(&self, id: Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.read().await.get(&id).cloned()
    }

    /// Look up by id first, then fall back to a scan over names
    pub async fn get_by_name_or_id(&self, key: &str) -> Option<Arc<SessionHandle>> {
        let sessions = self.sessions.read().await;

        if let Ok(id) = Uuid::parse_str(key) {
            if let Some(handle) = sessions.get(&id) {
                return Some(Arc::clone(handle));
            }
        }

        sessions.values().find(|h| h.name() == Some(key)).cloned()
    }

    /// Whether a live session already uses `name`
    pub async fn name_taken(&self, name: &str) -> bool {
        self.sessions
            .read()
            .await
            .values()
            .any(|h| h.name() == Some(name))
    }

    /// All live handles
    pub async fn list(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.read().await.values().cloned().collect()
    }

    pub async fn remove(&self, id: Uuid) -> Option<Arc<SessionHandle>> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::session::{DeviceIdentity, Session};
    use crate::protocol::SimulatedClient;

    fn handle(name: Option<&str>) -> Arc<SessionHandle> {
        let session = Session::new(name.map(str::to_string));
        let client = Arc::new(SimulatedClient::new(session.id, DeviceIdentity::fresh()));
        Arc::new(SessionHandle::new(session, client))
    }

    #[tokio::test]
    async fn test_register_and_lookup() {
        let registry = SessionRegistry::new();
        let sales = handle(Some("sales"));
        registry.register(Arc::clone(&sales)).await.unwrap();

        assert_eq!(registry.get(sales.id()).await.unwrap().id(), sales.id());
        assert_eq!(
            registry.get_by_name_or_id("sales").await.unwrap().id(),
            sales.id()
        );
        assert_eq!(
            registry
                .get_by_name_or_id(&sales.id().to_string())
                .await
                .unwrap()
                .id(),
            sales.id()
        );
        assert!(registry.get_by_name_or_id("support").await.is_none());
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let registry = SessionRegistry::new();
        let sales = handle(Some("sales"));
        registry.register(Arc::clone(&sales)).await.unwrap();

        assert!(registry.register(Arc::clone(&sales)).await.is_err());
        let result = registry.register(handle(Some("sales"))).await;
        assert!(matches!(result, Err(Error::DuplicateName(_))));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_register_within_limit() {
        let registry = SessionRegistry::new();
        registry.register_within(handle(None), Some(1)).await.unwrap();
        let result = registry.register_within(handle(None), Some(1)).await;
        assert!(matches!(result, Err(Error::SessionLimitReached(1))));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_id_lookup_wins_over_name() {
        let registry = SessionRegistry::new();
        let target = handle(None);
        // A session whose name is another session's id
        let impostor = handle(Some(&target.id().to_string()));
        registry.register(Arc::clone(&target)).await.unwrap();
        registry.register(impostor).await.unwrap();

        let found = registry
            .get_by_name_or_id(&target.id().to_string())
            .await
            .unwrap();
        assert_eq!(found.id(), target.id());
    }

    #[tokio::test]
    async fn test_remove() {
        let registry = SessionRegistry::new();
        let sales = handle(Some("sales"));
        registry.register(Arc::clone(&sales)).await.unwrap();

        assert!(registry.remove(sales.id()).await.is_some());
        assert!(registry.remove(sales.id()).await.is_none());
        assert!(registry.is_empty().await);
        assert!(!registry.name_taken("sales").await);
    }
}
