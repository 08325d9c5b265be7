//! Startup recovery integration tests

mod common;

use common::{eventually, harness, harness_on, seed, seed_identity, wait_for_status};
use devicegate_core::domain::session::{
    SessionEventType, SessionRepositoryTrait, SessionStatus, ShutdownConfig, ShutdownHandler,
};
use devicegate_core::protocol::ProtocolClient;

const ADDRESS: &str = "4915100000000:1@s.example";

#[tokio::test]
async fn test_restore_reconnects_only_connected_sessions() {
    let h = harness().await;
    let mut connected = Vec::new();
    let mut idle = Vec::new();
    for i in 0..3 {
        connected.push(seed(&h.repo, &format!("live-{}", i), SessionStatus::Connected).await);
    }
    idle.push(seed(&h.repo, "idle", SessionStatus::Disconnected).await);
    idle.push(seed(&h.repo, "gone", SessionStatus::LoggedOut).await);

    let failing = connected[1].id;
    h.factory.fail_connect_for(failing);

    let report = h.manager.restore(true).await.unwrap();
    assert_eq!(report.restored, 5);
    assert_eq!(report.reconnect_count(), 3);
    assert_eq!(h.manager.registry().len().await, 5);

    let summary = report.join().await;
    assert_eq!(summary.succeeded.len(), 2);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].0, failing);

    for session in &connected {
        assert_eq!(h.factory.client(session.id).unwrap().connect_calls(), 1);
    }
    for session in &idle {
        assert_eq!(h.factory.client(session.id).unwrap().connect_calls(), 0);
    }
    assert_eq!(h.factory.total_connect_calls(), 3);

    // The failure stays local to its session
    assert_eq!(
        h.manager.get(&failing.to_string()).await.unwrap().status,
        SessionStatus::Error
    );
    assert_eq!(h.manager.get("live-0").await.unwrap().status, SessionStatus::Connecting);
    assert_eq!(h.manager.get("gone").await.unwrap().status, SessionStatus::LoggedOut);
}

#[tokio::test]
async fn test_restore_reuses_stored_identity() {
    let h = harness().await;
    let mut session = seed(&h.repo, "sales", SessionStatus::Connected).await;
    seed_identity(&h.repo, &mut session, ADDRESS).await;

    let report = h.manager.restore(true).await.unwrap();
    assert_eq!(report.fresh_identities, 0);
    let summary = report.join().await;
    assert_eq!(summary.succeeded, vec![session.id]);

    wait_for_status(&h.manager, "sales", SessionStatus::Connected).await;
    let client = h.factory.client(session.id).unwrap();
    assert!(client.is_authenticated());
    assert_eq!(client.identity().address.as_deref(), Some(ADDRESS));
    assert!(!client.is_pairing());

    let restored = h.manager.get("sales").await.unwrap();
    assert_eq!(restored.identity_ref.as_deref(), Some(ADDRESS));

    let events = h.manager.events("sales", None).await.unwrap();
    assert!(events.iter().any(|e| e.event_type == SessionEventType::Restored));
}

#[tokio::test]
async fn test_unreadable_identity_falls_back_to_pairing() {
    let h = harness().await;
    let mut session = seed(&h.repo, "sales", SessionStatus::Connected).await;
    seed_identity(&h.repo, &mut session, ADDRESS).await;
    h.store.fail_identity_reads(true);

    let report = h.manager.restore(true).await.unwrap();
    assert_eq!(report.restored, 1);
    assert_eq!(report.fresh_identities, 1);
    report.join().await;

    let client = h.factory.client(session.id).unwrap();
    assert!(!client.is_authenticated());
    assert!(h.manager.get("sales").await.unwrap().identity_ref.is_none());
    assert!(h.repo.get(session.id).await.unwrap().unwrap().identity_ref.is_none());

    let manager = &h.manager;
    eventually("a pairing code", || async move {
        manager.get_qr("sales").await.unwrap().is_some()
    })
    .await;
}

#[tokio::test]
async fn test_restore_without_reconnect() {
    let h = harness().await;
    seed(&h.repo, "sales", SessionStatus::Connected).await;
    seed(&h.repo, "support", SessionStatus::Connecting).await;

    let report = h.manager.restore(false).await.unwrap();
    assert_eq!(report.restored, 2);
    assert_eq!(report.reconnect_count(), 0);
    assert_eq!(h.factory.total_connect_calls(), 0);

    assert_eq!(h.manager.get("support").await.unwrap().status, SessionStatus::Disconnected);

    // Nothing is actually connected, so the first status read corrects it
    let report = h.manager.status("sales").await.unwrap();
    assert!(!report.connected);
    assert_eq!(report.session.status, SessionStatus::Disconnected);
}

#[tokio::test]
async fn test_paired_session_survives_restart() {
    let first = harness().await;
    let session = first.manager.create(Some("sales")).await.unwrap();
    let client = first.factory.client(session.id).unwrap();
    first.manager.connect("sales").await.unwrap();
    client.complete_pairing(ADDRESS);
    wait_for_status(&first.manager, "sales", SessionStatus::Connected).await;

    let repo = &first.repo;
    eventually("paired session in store", || async move {
        let stored = repo.get(session.id).await.unwrap().unwrap();
        stored.status == SessionStatus::Connected && stored.identity_ref.is_some()
    })
    .await;

    let result = ShutdownHandler::new(
        first.manager.clone(),
        first.db.clone(),
        ShutdownConfig::quick().keep_database(),
    )
    .shutdown_gracefully()
    .await;
    assert_eq!(result.sessions_disconnected, 1);
    assert!(!result.has_warnings());
    assert!(!client.is_connected());
    assert_eq!(
        first.repo.get(session.id).await.unwrap().unwrap().status,
        SessionStatus::Connected
    );

    // Same database, new process
    let second = harness_on(first.db.clone()).await;
    let report = second.manager.restore(true).await.unwrap();
    assert_eq!(report.fresh_identities, 0);
    assert_eq!(report.join().await.succeeded, vec![session.id]);

    wait_for_status(&second.manager, "sales", SessionStatus::Connected).await;
    let reborn = second.factory.client(session.id).unwrap();
    assert_eq!(reborn.connect_calls(), 1);
    assert_eq!(reborn.identity().address.as_deref(), Some(ADDRESS));
    assert!(matches!(
        second.manager.get_qr("sales").await,
        Err(devicegate_core::Error::AlreadyAuthenticated(_))
    ));
}
