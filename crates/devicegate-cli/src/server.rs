//! HTTP surface over the session manager

use axum::body::Bytes;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use devicegate_core::Error;
use devicegate_core::api::{
    self, CreateSessionRequest, EventSummary, HealthReport, QrResponse, SendMessageRequest,
    SendMessageResponse, SessionSummary, StatusResponse,
};
use devicegate_core::domain::session::SessionManager;
use devicegate_core::protocol::MessagePayload;
use devicegate_core::storage::Database;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error};

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub db: Database,
}

/// Build the router for every session route plus `/health`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/{key}", get(get_session).delete(remove_session))
        .route("/sessions/{key}/connect", post(connect_session))
        .route("/sessions/{key}/disconnect", post(disconnect_session))
        .route("/sessions/{key}/status", get(session_status))
        .route("/sessions/{key}/qr", get(session_qr))
        .route("/sessions/{key}/messages", post(send_message))
        .route("/sessions/{key}/events", get(session_events))
        .with_state(state)
}

/// Domain error rendered as `{ "error", "code" }`
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::InvalidInput(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.kind().http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            error!(code = self.0.code(), error = %self.0, "Request failed");
        } else {
            debug!(code = self.0.code(), error = %self.0, "Request rejected");
        }

        let mut body = json!({
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        if let Some(suggestion) = self.0.suggestion() {
            body["suggestion"] = json!(suggestion);
        }
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Deserialize)]
struct EventsQuery {
    limit: Option<i32>,
}

async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthReport>) {
    let report = api::check(&state.db, Some(&state.manager)).await;
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

/// An empty body creates an unnamed session
async fn create_session(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<SessionSummary>)> {
    let request = if body.trim_ascii().is_empty() {
        CreateSessionRequest::default()
    } else {
        serde_json::from_slice::<CreateSessionRequest>(&body)
            .map_err(|e| Error::InvalidInput(format!("invalid request body: {}", e)))?
    };
    let session = state.manager.create(request.name.as_deref()).await?;
    Ok((StatusCode::CREATED, Json(session.into())))
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionSummary>> {
    let sessions = state.manager.list().await;
    Json(sessions.into_iter().map(SessionSummary::from).collect())
}

async fn get_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<SessionSummary>> {
    Ok(Json(state.manager.get(&key).await?.into()))
}

async fn remove_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<StatusCode> {
    state.manager.remove(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn connect_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<(StatusCode, Json<SessionSummary>)> {
    let session = state.manager.connect(&key).await?;
    Ok((StatusCode::ACCEPTED, Json(session.into())))
}

async fn disconnect_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<SessionSummary>> {
    Ok(Json(state.manager.disconnect(&key).await?.into()))
}

async fn session_status(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<StatusResponse>> {
    Ok(Json(state.manager.status(&key).await?.into()))
}

async fn session_qr(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> ApiResult<Json<QrResponse>> {
    let code = state.manager.get_qr(&key).await?;
    Ok(Json(QrResponse::new(code)))
}

async fn send_message(
    State(state): State<AppState>,
    Path(key): Path<String>,
    payload: Result<Json<SendMessageRequest>, JsonRejection>,
) -> ApiResult<Json<SendMessageResponse>> {
    let Json(request) = payload?;
    let receipt = state
        .manager
        .send_message(&key, &request.to, MessagePayload::text(request.text))
        .await?;
    Ok(Json(receipt.into()))
}

async fn session_events(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(query): Query<EventsQuery>,
) -> ApiResult<Json<Vec<EventSummary>>> {
    let events = state.manager.events(&key, query.limit).await?;
    Ok(Json(events.into_iter().map(EventSummary::from).collect()))
}
