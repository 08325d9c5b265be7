//! Session lifecycle integration tests

mod common;

use std::sync::Arc;

use common::{eventually, harness, wait_for_status};
use devicegate_core::domain::session::{SessionEventType, SessionRepositoryTrait, SessionStatus};
use devicegate_core::protocol::{ClientEvent, ProtocolClient};
use devicegate_core::{Error, ErrorKind};

const ADDRESS: &str = "4915100000000:1@s.example";

#[tokio::test]
async fn test_create_then_get_is_disconnected_without_identity() {
    let h = harness().await;

    for name in ["sales", "support_2", "night-shift"] {
        let created = h.manager.create(Some(name)).await.unwrap();
        let fetched = h.manager.get(name).await.unwrap();

        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.status, SessionStatus::Disconnected);
        assert!(fetched.identity_ref.is_none());

        let stored = h.repo.get(created.id).await.unwrap().unwrap();
        assert_eq!(stored.status, SessionStatus::Disconnected);
        assert!(stored.identity_ref.is_none());
    }

    // Unnamed sessions are addressed by id
    let anonymous = h.manager.create(None).await.unwrap();
    assert_eq!(
        h.manager.get(&anonymous.id.to_string()).await.unwrap().id,
        anonymous.id
    );
}

#[tokio::test]
async fn test_duplicate_name_mutates_nothing() {
    let h = harness().await;
    h.manager.create(Some("sales")).await.unwrap();

    let err = h.manager.create(Some("sales")).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateName(_)));
    assert_eq!(err.kind(), ErrorKind::Validation);

    assert_eq!(h.manager.registry().len().await, 1);
    assert_eq!(h.repo.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_connect_on_connected_session_conflicts() {
    let h = harness().await;
    let session = h.manager.create(Some("sales")).await.unwrap();
    h.factory.client(session.id).unwrap().complete_pairing(ADDRESS);

    h.manager.connect("sales").await.unwrap();
    wait_for_status(&h.manager, "sales", SessionStatus::Connected).await;

    let err = h.manager.connect("sales").await.unwrap_err();
    assert!(matches!(err, Error::AlreadyConnected(_)));
    assert_eq!(err.kind().http_status(), 409);
    assert_eq!(h.manager.get("sales").await.unwrap().status, SessionStatus::Connected);
}

#[tokio::test]
async fn test_disconnect_on_disconnected_session_conflicts() {
    let h = harness().await;
    h.manager.create(Some("sales")).await.unwrap();

    let err = h.manager.disconnect("sales").await.unwrap_err();
    assert!(matches!(err, Error::NotConnected(_)));
    assert_eq!(err.kind(), ErrorKind::Conflict);
}

#[tokio::test]
async fn test_connected_event_is_persisted() {
    let h = harness().await;
    let session = h.manager.create(Some("sales")).await.unwrap();
    let client = h.factory.client(session.id).unwrap();

    h.manager.connect("sales").await.unwrap();
    client.complete_pairing(ADDRESS);
    wait_for_status(&h.manager, "sales", SessionStatus::Connected).await;

    let report = h.manager.status("sales").await.unwrap();
    assert_eq!(report.session.status, SessionStatus::Connected);
    assert!(report.connected);

    let repo = &h.repo;
    eventually("connected status in store", || async move {
        let stored = repo.get(session.id).await.unwrap().unwrap();
        stored.status == SessionStatus::Connected && stored.identity_ref.as_deref() == Some(ADDRESS)
    })
    .await;
    assert!(h.repo.get_identity(ADDRESS).await.unwrap().is_some());

    let events = h.manager.events("sales", None).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == SessionEventType::Paired));
    assert!(events.iter().any(|e| e.event_type == SessionEventType::Connected));
}

#[tokio::test]
async fn test_logged_out_clears_identity_and_unblocks_qr() {
    let h = harness().await;
    let session = h.manager.create(Some("sales")).await.unwrap();
    let client = h.factory.client(session.id).unwrap();
    client.complete_pairing(ADDRESS);
    h.manager.connect("sales").await.unwrap();
    wait_for_status(&h.manager, "sales", SessionStatus::Connected).await;
    assert!(matches!(
        h.manager.get_qr("sales").await,
        Err(Error::AlreadyAuthenticated(_))
    ));

    client.remote_logout(Some("device removed".to_string()));
    wait_for_status(&h.manager, "sales", SessionStatus::LoggedOut).await;

    assert!(h.manager.get("sales").await.unwrap().identity_ref.is_none());
    let repo = &h.repo;
    eventually("identity cleared in store", || async move {
        let stored = repo.get(session.id).await.unwrap().unwrap();
        stored.status == SessionStatus::LoggedOut && stored.identity_ref.is_none()
    })
    .await;
    assert!(h.repo.get_identity(ADDRESS).await.unwrap().is_none());

    // No longer blocked; nothing issued until the next connect
    assert_eq!(h.manager.get_qr("sales").await.unwrap(), None);

    h.manager.connect("sales").await.unwrap();
    let manager = &h.manager;
    eventually("a new pairing code", || async move {
        manager.get_qr("sales").await.unwrap().is_some()
    })
    .await;
}

#[tokio::test]
async fn test_remove_connected_session() {
    let h = harness().await;
    let session = h.manager.create(Some("sales")).await.unwrap();
    let client = h.factory.client(session.id).unwrap();
    client.complete_pairing(ADDRESS);
    h.manager.connect("sales").await.unwrap();
    wait_for_status(&h.manager, "sales", SessionStatus::Connected).await;
    let repo = &h.repo;
    eventually("identity stored", || async move {
        repo.get_identity(ADDRESS).await.unwrap().is_some()
    })
    .await;

    h.manager.remove("sales").await.unwrap();

    assert!(!client.is_connected());
    assert!(matches!(h.manager.get("sales").await, Err(Error::SessionNotFound(_))));
    assert!(h.repo.get(session.id).await.unwrap().is_none());
    assert!(h.repo.get_identity(ADDRESS).await.unwrap().is_none());
    assert!(h.manager.handle(session.id).await.is_none());
}

#[tokio::test]
async fn test_remove_survives_store_failure() {
    let h = harness().await;
    let session = h.manager.create(Some("sales")).await.unwrap();
    h.store.fail_delete(true);

    let err = h.manager.remove("sales").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Persistence);

    // Gone from memory even though the record is still stored
    assert!(matches!(h.manager.get("sales").await, Err(Error::SessionNotFound(_))));
    assert!(h.repo.get(session.id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_store_failure_does_not_roll_back_memory() {
    let h = harness().await;
    let session = h.manager.create(Some("sales")).await.unwrap();
    let client = h.factory.client(session.id).unwrap();
    client.complete_pairing(ADDRESS);
    h.store.fail_writes(true);

    h.manager.connect("sales").await.unwrap();
    wait_for_status(&h.manager, "sales", SessionStatus::Connected).await;

    let report = h.manager.status("sales").await.unwrap();
    assert_eq!(report.session.status, SessionStatus::Connected);
    let stored = h.repo.get(session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Disconnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_never_lose_entries() {
    let h = harness().await;
    let manager = Arc::new(h.manager.clone());

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.create(Some(&format!("session-{}", i))).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(h.manager.registry().len().await, 32);
    assert_eq!(h.manager.list().await.len(), 32);
    assert_eq!(h.repo.list().await.unwrap().len(), 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_with_same_name_admit_one() {
    let h = harness().await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let manager = h.manager.clone();
            tokio::spawn(async move { manager.create(Some("sales")).await })
        })
        .collect();

    let mut created = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert!(matches!(e, Error::DuplicateName(_))),
        }
    }

    assert_eq!(created, 1);
    assert_eq!(h.manager.registry().len().await, 1);
    assert_eq!(h.repo.list().await.unwrap().len(), 1);
}

#[tokio::test(flavor = "current_thread")]
async fn test_event_burst_is_dropped_not_blocked() {
    let h = harness().await;
    let session = h.manager.create(Some("sales")).await.unwrap();
    let client = h.factory.client(session.id).unwrap();

    // Synchronous emits: the consumer cannot drain in between
    for _ in 0..1_000 {
        client.emit(ClientEvent::Disconnected);
    }

    let report = h.manager.status("sales").await.unwrap();
    assert_eq!(report.dropped_events, 900);

    // The session still works afterwards
    client.complete_pairing(ADDRESS);
    client.connect().await.unwrap();
    wait_for_status(&h.manager, "sales", SessionStatus::Connected).await;
}

#[tokio::test]
async fn test_status_heals_stale_connected_state() {
    let h = harness().await;
    let session = h.manager.create(Some("sales")).await.unwrap();
    let client = h.factory.client(session.id).unwrap();
    client.complete_pairing(ADDRESS);
    h.manager.connect("sales").await.unwrap();
    wait_for_status(&h.manager, "sales", SessionStatus::Connected).await;

    // Silence the dispatcher, then lose the socket
    h.manager.handle(session.id).await.unwrap().cancel();
    client.disconnect().await;
    assert_eq!(h.manager.get("sales").await.unwrap().status, SessionStatus::Connected);

    let report = h.manager.status("sales").await.unwrap();
    assert_eq!(report.session.status, SessionStatus::Disconnected);
    assert_eq!(
        h.repo.get(session.id).await.unwrap().unwrap().status,
        SessionStatus::Disconnected
    );
}

#[tokio::test]
async fn test_connect_failure_is_recorded() {
    let h = harness().await;
    let session = h.manager.create(Some("sales")).await.unwrap();
    h.factory.fail_connect_for(session.id);

    let err = h.manager.connect("sales").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Protocol);
    assert_eq!(h.manager.get("sales").await.unwrap().status, SessionStatus::Error);

    let stored = h.repo.get(session.id).await.unwrap().unwrap();
    assert_eq!(stored.status, SessionStatus::Error);
    let events = h.manager.events("sales", Some(1)).await.unwrap();
    assert_eq!(events[0].event_type, SessionEventType::Error);
}
