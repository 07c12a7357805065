//! HTTP handlers for the dashboard read API.

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use relay_core::events::AgenticEvent;
use relay_core::ids::SessionId;
use relay_core::messages::{AgentNote, Message};
use relay_core::session::AgenticSession;
use relay_store::{MessageRepo, NoteRepo, SessionRepo, SessionStats, StoreError};

use crate::server::AppState;

/// Error body is always `{"error": "..."}`.
#[derive(Debug)]
pub enum ApiError {
    NotFound(String),
    Store(StoreError),
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Store(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::NotFound(what) => (StatusCode::NOT_FOUND, format!("not found: {what}")),
            Self::Store(e) => {
                tracing::error!(error = %e, "store error in API handler");
                (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
            }
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

/// One session with its transcript and notes.
#[derive(Debug, Serialize)]
pub struct SessionDetail {
    #[serde(flatten)]
    pub session: AgenticSession,
    pub messages: Vec<Message>,
    pub notes: Vec<AgentNote>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsResponse {
    #[serde(flatten)]
    pub stats: SessionStats,
    pub sse_clients: usize,
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub session: Option<String>,
}

pub async fn list_sessions(
    State(state): State<AppState>,
) -> Result<Json<Vec<AgenticSession>>, ApiError> {
    Ok(Json(SessionRepo::new(state.db.clone()).list()?))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<SessionDetail>, ApiError> {
    let id = SessionId::from_raw(id);
    let session = SessionRepo::new(state.db.clone()).get(&id)?;
    let messages = MessageRepo::new(state.db.clone()).transcript(&id)?;
    let notes = NoteRepo::new(state.db.clone()).list(&id)?;
    Ok(Json(SessionDetail {
        session,
        messages,
        notes,
    }))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session_id = SessionId::from_raw(id.as_str());
    if !SessionRepo::new(state.db.clone()).delete(&session_id)? {
        return Err(ApiError::NotFound(format!("session {id}")));
    }
    tracing::info!(session_id = %id, "session deleted");
    Ok(Json(serde_json::json!({ "deleted": id })))
}

pub async fn stats(State(state): State<AppState>) -> Result<Json<StatsResponse>, ApiError> {
    Ok(Json(StatsResponse {
        stats: SessionRepo::new(state.db.clone()).stats()?,
        sse_clients: state.broadcaster.client_count(),
    }))
}

/// Live event stream, optionally filtered to one session.
pub async fn events(State(state): State<AppState>, Query(query): Query<EventsQuery>) -> Response {
    let filter = query.session.filter(|s| !s.is_empty()).map(SessionId::from_raw);
    let stream = state
        .broadcaster
        .subscribe(filter, state.heartbeat, state.shutdown.clone());
    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// Events forwarded by a remote run (see `DashboardEventSink`).
pub async fn ingest(
    State(state): State<AppState>,
    Json(events): Json<Vec<AgenticEvent>>,
) -> Json<serde_json::Value> {
    let delivered: usize = events.iter().map(|e| state.broadcaster.broadcast(e)).sum();
    tracing::debug!(accepted = events.len(), delivered, "ingested events");
    Json(serde_json::json!({ "accepted": events.len() }))
}

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    match state.db.with_conn(|conn| Ok(conn.execute_batch("SELECT 1")?)) {
        Ok(()) => (StatusCode::OK, Json(serde_json::json!({ "status": "healthy" }))),
        Err(e) => {
            tracing::warn!(error = %e, "health check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({ "status": "unhealthy", "error": e.to_string() })),
            )
        }
    }
}
