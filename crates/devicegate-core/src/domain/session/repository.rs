//! Session repository for database operations
//!
//! Handles all database interactions for sessions, device identities and
//! session events.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::event::{SessionEvent, SessionEventType};
use super::identity::DeviceIdentity;
use super::repository_trait::SessionRepositoryTrait;
use super::session::{Session, SessionStatus};
use crate::error::{Error, Result};

const SESSION_COLUMNS: &str =
    "id, name, status, identity_ref, created_at, connected_at, last_seen_at";

/// Repository for session database operations
#[derive(Debug, Clone)]
pub struct SessionRepository {
    pool: SqlitePool,
}

impl SessionRepository {
    /// Create a new repository with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Get a reference to the underlying connection pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn fetch_sessions(&self, filter: Option<SessionStatus>) -> Result<Vec<Session>> {
        let rows: Vec<SessionRow> = match filter {
            Some(status) => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM sessions WHERE status = ? ORDER BY created_at ASC",
                    SESSION_COLUMNS
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as(&format!(
                    "SELECT {} FROM sessions ORDER BY created_at ASC",
                    SESSION_COLUMNS
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(Error::DatabaseError)?;

        rows.into_iter().map(|row| row.into_session()).collect()
    }
}

/// Map a unique-constraint violation on `sessions.name` to `DuplicateName`
fn map_insert_error(err: sqlx::Error, name: Option<&str>) -> Error {
    if let sqlx::Error::Database(db_err) = &err {
        if db_err.is_unique_violation() {
            if let Some(name) = name {
                return Error::DuplicateName(name.to_string());
            }
        }
    }
    Error::DatabaseError(err)
}

#[async_trait]
impl SessionRepositoryTrait for SessionRepository {
    // ========== Session CRUD ==========

    async fn save(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sessions (
                id, name, status, identity_ref,
                created_at, connected_at, last_seen_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(session.id.to_string())
        .bind(&session.name)
        .bind(session.status.as_str())
        .bind(&session.identity_ref)
        .bind(session.created_at)
        .bind(session.connected_at)
        .bind(session.last_seen_at)
        .execute(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, session.name.as_deref()))?;

        Ok(())
    }

    async fn update(&self, session: &Session) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sessions SET
                status = ?,
                identity_ref = ?,
                connected_at = ?,
                last_seen_at = ?
            WHERE id = ?
            "#,
        )
        .bind(session.status.as_str())
        .bind(&session.identity_ref)
        .bind(session.connected_at)
        .bind(session.last_seen_at)
        .bind(session.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        Ok(())
    }

    async fn get(&self, session_id: Uuid) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sessions WHERE id = ?",
            SESSION_COLUMNS
        ))
        .bind(session_id.to_string())
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        row.map(|row| row.into_session()).transpose()
    }

    async fn get_by_name(&self, name: &str) -> Result<Option<Session>> {
        let row: Option<SessionRow> = sqlx::query_as(&format!(
            "SELECT {} FROM sessions WHERE name = ?",
            SESSION_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        row.map(|row| row.into_session()).transpose()
    }

    async fn list(&self) -> Result<Vec<Session>> {
        self.fetch_sessions(None).await
    }

    async fn list_by_status(&self, status: SessionStatus) -> Result<Vec<Session>> {
        self.fetch_sessions(Some(status)).await
    }

    async fn delete(&self, session_id: Uuid) -> Result<bool> {
        let id = session_id.to_string();
        let mut tx = self.pool.begin().await.map_err(Error::DatabaseError)?;

        let linked: Option<(Option<String>,)> =
            sqlx::query_as("SELECT identity_ref FROM sessions WHERE id = ?")
                .bind(&id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(Error::DatabaseError)?;

        let result = sqlx::query("DELETE FROM sessions WHERE id = ?")
            .bind(&id)
            .execute(&mut *tx)
            .await
            .map_err(Error::DatabaseError)?;

        if let Some((Some(address),)) = linked {
            sqlx::query("DELETE FROM device_identities WHERE address = ?")
                .bind(&address)
                .execute(&mut *tx)
                .await
                .map_err(Error::DatabaseError)?;
        }

        tx.commit().await.map_err(Error::DatabaseError)?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_by_status(&self, status: SessionStatus) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM sessions WHERE status = ?
            "#,
        )
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        Ok(count)
    }

    // ========== Identity linkage ==========

    async fn link_identity(&self, session_id: Uuid, address: &str) -> Result<()> {
        sqlx::query("UPDATE sessions SET identity_ref = ?, last_seen_at = ? WHERE id = ?")
            .bind(address)
            .bind(Utc::now())
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        Ok(())
    }

    async fn unlink_identity(&self, session_id: Uuid) -> Result<()> {
        sqlx::query("UPDATE sessions SET identity_ref = NULL, last_seen_at = ? WHERE id = ?")
            .bind(Utc::now())
            .bind(session_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        Ok(())
    }

    async fn save_identity(&self, identity: &DeviceIdentity) -> Result<()> {
        let address = identity.address.as_deref().ok_or_else(|| {
            Error::InvalidInput("cannot store an identity that has not been paired".to_string())
        })?;

        sqlx::query(
            r#"
            INSERT INTO device_identities (
                address, registration_id, noise_key, identity_key, adv_secret,
                platform, push_name, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(address) DO UPDATE SET
                registration_id = excluded.registration_id,
                noise_key = excluded.noise_key,
                identity_key = excluded.identity_key,
                adv_secret = excluded.adv_secret,
                platform = excluded.platform,
                push_name = excluded.push_name,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(address)
        .bind(i64::from(identity.registration_id))
        .bind(&identity.noise_key)
        .bind(&identity.identity_key)
        .bind(&identity.adv_secret)
        .bind(&identity.platform)
        .bind(&identity.push_name)
        .bind(identity.created_at)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        Ok(())
    }

    async fn get_identity(&self, address: &str) -> Result<Option<DeviceIdentity>> {
        let row: Option<IdentityRow> = sqlx::query_as(
            r#"
            SELECT address, registration_id, noise_key, identity_key, adv_secret,
                   platform, push_name, created_at
            FROM device_identities
            WHERE address = ?
            "#,
        )
        .bind(address)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        row.map(|row| row.into_identity()).transpose()
    }

    async fn delete_identity(&self, address: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM device_identities WHERE address = ?")
            .bind(address)
            .execute(&self.pool)
            .await
            .map_err(Error::DatabaseError)?;

        Ok(result.rows_affected() > 0)
    }

    // ========== Session Events ==========

    async fn save_event(&self, event: &SessionEvent) -> Result<()> {
        let data = event.data.as_ref().map(|d| d.to_string());

        sqlx::query(
            r#"
            INSERT INTO session_events (id, session_id, event_type, data, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.id.to_string())
        .bind(event.session_id.to_string())
        .bind(event.event_type.as_str())
        .bind(&data)
        .bind(event.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        Ok(())
    }

    async fn get_events(&self, session_id: Uuid, limit: Option<i32>) -> Result<Vec<SessionEvent>> {
        let limit = limit.unwrap_or(100);

        let rows: Vec<SessionEventRow> = sqlx::query_as(
            r#"
            SELECT id, session_id, event_type, data, created_at
            FROM session_events
            WHERE session_id = ?
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?
            "#,
        )
        .bind(session_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::DatabaseError)?;

        rows.into_iter().map(|row| row.into_event()).collect()
    }
}

// ========== Database Row Types ==========

/// Database row for a session
#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    name: Option<String>,
    status: String,
    identity_ref: Option<String>,
    created_at: DateTime<Utc>,
    connected_at: Option<DateTime<Utc>>,
    last_seen_at: DateTime<Utc>,
}

impl SessionRow {
    fn into_session(self) -> Result<Session> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::Parse(format!("Invalid session ID: {}", e)))?;
        let status = SessionStatus::parse(&self.status)
            .ok_or_else(|| Error::Parse(format!("Invalid session status: {}", self.status)))?;

        Ok(Session {
            id,
            name: self.name,
            status,
            identity_ref: self.identity_ref,
            created_at: self.created_at,
            connected_at: self.connected_at,
            last_seen_at: self.last_seen_at,
        })
    }
}

/// Database row for a device identity
#[derive(sqlx::FromRow)]
struct IdentityRow {
    address: String,
    registration_id: i64,
    noise_key: Vec<u8>,
    identity_key: Vec<u8>,
    adv_secret: Vec<u8>,
    platform: String,
    push_name: Option<String>,
    created_at: DateTime<Utc>,
}

impl IdentityRow {
    fn into_identity(self) -> Result<DeviceIdentity> {
        let registration_id = u32::try_from(self.registration_id).map_err(|_| {
            Error::Parse(format!("Invalid registration id: {}", self.registration_id))
        })?;

        Ok(DeviceIdentity {
            address: Some(self.address),
            registration_id,
            noise_key: self.noise_key,
            identity_key: self.identity_key,
            adv_secret: self.adv_secret,
            platform: self.platform,
            push_name: self.push_name,
            created_at: self.created_at,
        })
    }
}

/// Database row for session event
#[derive(sqlx::FromRow)]
struct SessionEventRow {
    id: String,
    session_id: String,
    event_type: String,
    data: Option<String>,
    created_at: DateTime<Utc>,
}

impl SessionEventRow {
    fn into_event(self) -> Result<SessionEvent> {
        let id = Uuid::parse_str(&self.id)
            .map_err(|e| Error::Parse(format!("Invalid event ID: {}", e)))?;
        let session_id = Uuid::parse_str(&self.session_id)
            .map_err(|e| Error::Parse(format!("Invalid session ID: {}", e)))?;
        let event_type = SessionEventType::parse(&self.event_type)
            .ok_or_else(|| Error::Parse(format!("Invalid event type: {}", self.event_type)))?;
        let data = self
            .data
            .map(|d| serde_json::from_str(&d))
            .transpose()
            .map_err(|e| Error::Parse(format!("Invalid event data JSON: {}", e)))?;

        Ok(SessionEvent {
            id,
            session_id,
            event_type,
            data,
            created_at: self.created_at,
        })
    }
}
