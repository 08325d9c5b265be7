//! Sessions API
//!
//! Request/response shapes for session operations, and read-only store
//! queries used by the CLI when no server is running.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::session::{
    Session, SessionEvent, SessionRepository, SessionRepositoryTrait, SessionStatus, StatusReport,
};
use crate::error::{Error, Result};
use crate::protocol::SendReceipt;
use crate::storage::Database;

/// Body of `POST /sessions`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    #[serde(default)]
    pub name: Option<String>,
}

/// Body of `POST /sessions/{key}/messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageRequest {
    pub to: String,
    pub text: String,
}

/// Session summary for display
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: String,
    pub name: Option<String>,
    pub status: String,
    pub authenticated: bool,
    pub identity: Option<String>,
    pub created_at: String,
    pub connected_at: Option<String>,
    pub last_seen_at: String,
}

impl From<Session> for SessionSummary {
    fn from(s: Session) -> Self {
        Self {
            id: s.id.to_string(),
            authenticated: s.is_authenticated(),
            name: s.name,
            status: s.status.as_str().to_string(),
            identity: s.identity_ref,
            created_at: s.created_at.to_rfc3339(),
            connected_at: s.connected_at.map(|t| t.to_rfc3339()),
            last_seen_at: s.last_seen_at.to_rfc3339(),
        }
    }
}

/// Response of `GET /sessions/{key}/status`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub session: SessionSummary,
    pub connected: bool,
    pub has_qr: bool,
    pub dropped_events: u64,
}

impl From<StatusReport> for StatusResponse {
    fn from(report: StatusReport) -> Self {
        let mut session = SessionSummary::from(report.session);
        // The client is the authority on authentication
        session.authenticated = report.authenticated;
        Self {
            session,
            connected: report.connected,
            has_qr: report.has_qr,
            dropped_events: report.dropped_events,
        }
    }
}

/// Response of `GET /sessions/{key}/qr`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrResponse {
    /// Latest pairing code; absent until `connect` has been called
    pub code: Option<String>,
    /// Retry hint for callers that polled too early
    pub message: Option<String>,
}

impl QrResponse {
    pub fn new(code: Option<String>) -> Self {
        let message = code
            .is_none()
            .then(|| "No pairing code issued yet; connect the session and retry".to_string());
        Self { code, message }
    }
}

/// Response of `POST /sessions/{key}/messages`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendMessageResponse {
    pub message_id: String,
    pub to: String,
    pub timestamp: String,
}

impl From<SendReceipt> for SendMessageResponse {
    fn from(r: SendReceipt) -> Self {
        Self {
            message_id: r.message_id,
            to: r.target,
            timestamp: r.timestamp.to_rfc3339(),
        }
    }
}

/// Audit trail entry for display
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSummary {
    pub event_type: String,
    pub data: Option<serde_json::Value>,
    pub created_at: String,
}

impl From<SessionEvent> for EventSummary {
    fn from(e: SessionEvent) -> Self {
        Self {
            event_type: e.event_type.as_str().to_string(),
            data: e.data,
            created_at: e.created_at.to_rfc3339(),
        }
    }
}

/// A stored session with its recent history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: SessionSummary,
    pub events: Vec<EventSummary>,
}

/// List stored sessions, optionally filtered by status
pub async fn list(db: &Database, status: Option<&str>) -> Result<Vec<SessionSummary>> {
    let repo = SessionRepository::new(db.pool().clone());

    let sessions = if let Some(status_str) = status {
        let status_filter = SessionStatus::parse(status_str)
            .ok_or_else(|| Error::InvalidInput(format!("Invalid status: {}", status_str)))?;
        repo.list_by_status(status_filter).await?
    } else {
        repo.list().await?
    };

    Ok(sessions.into_iter().map(SessionSummary::from).collect())
}

/// Get a stored session by id or name, with its latest events
pub async fn show(db: &Database, key: &str, events: i32) -> Result<SessionDetail> {
    let repo = SessionRepository::new(db.pool().clone());

    let by_id = match Uuid::parse_str(key) {
        Ok(id) => repo.get(id).await?,
        Err(_) => None,
    };
    let session = match by_id {
        Some(session) => session,
        None => repo
            .get_by_name(key)
            .await?
            .ok_or_else(|| Error::SessionNotFound(key.to_string()))?,
    };

    let events = repo
        .get_events(session.id, Some(events))
        .await?
        .into_iter()
        .map(EventSummary::from)
        .collect();

    Ok(SessionDetail {
        session: session.into(),
        events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> (Database, Session) {
        let db = Database::in_memory().await.unwrap();
        let repo = SessionRepository::new(db.pool().clone());
        let mut session = Session::new(Some("sales".to_string()));
        repo.save(&session).await.unwrap();
        session.set_status(SessionStatus::Error);
        repo.update(&session).await.unwrap();
        repo.save_event(&SessionEvent::created(session.id, Some("sales")))
            .await
            .unwrap();
        (db, session)
    }

    #[tokio::test]
    async fn test_list_with_filter() {
        let (db, _) = seeded().await;
        assert_eq!(list(&db, None).await.unwrap().len(), 1);
        assert_eq!(list(&db, Some("error")).await.unwrap().len(), 1);
        assert!(list(&db, Some("connected")).await.unwrap().is_empty());
        assert!(matches!(
            list(&db, Some("sleeping")).await,
            Err(Error::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_show_by_name_and_id() {
        let (db, session) = seeded().await;
        let by_name = show(&db, "sales", 10).await.unwrap();
        assert_eq!(by_name.session.id, session.id.to_string());
        assert_eq!(by_name.events.len(), 1);

        let by_id = show(&db, &session.id.to_string(), 10).await.unwrap();
        assert_eq!(by_id.session.name.as_deref(), Some("sales"));

        assert!(matches!(
            show(&db, "support", 10).await,
            Err(Error::SessionNotFound(_))
        ));
    }

    #[test]
    fn test_qr_response_hint() {
        assert!(QrResponse::new(None).message.is_some());
        assert!(QrResponse::new(Some("2@x".into())).message.is_none());
    }

    #[test]
    fn test_summary_from_session() {
        let mut session = Session::new(None);
        session.link_identity("1@s.example");
        let summary = SessionSummary::from(session);
        assert!(summary.authenticated);
        assert_eq!(summary.status, "disconnected");
        assert_eq!(summary.identity.as_deref(), Some("1@s.example"));
    }
}
