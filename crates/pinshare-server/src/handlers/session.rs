//! REST surface for session and participant management (§6), grounded in
//! the shape of the teacher's `handlers::v1::session` but backed by the
//! full store + registry/actor split instead of a single session map.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};

use pinshare_core::data::{ParticipantRecord, SessionRecord};
use pinshare_core::errors::StoreError;
use pinshare_core::id::UserId;
use pinshare_core::log;

use crate::state::AppState;

const DEFAULT_EXPIRY_MINUTES: i64 = 1440;
const MAX_EXPIRY_MINUTES: i64 = 10080;
const MAX_NAME_LEN: usize = 255;
const MAX_DISPLAY_NAME_LEN: usize = 100;

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    pub name: Option<String>,
    pub expires_in_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct CreateSessionResponse {
    pub session_id: String,
    pub join_link: String,
    pub expires_at: String,
    pub name: Option<String>,
}

/// `POST /sessions`
pub async fn create(State(state): State<Arc<AppState>>, Json(payload): Json<CreateSessionRequest>) -> Response {
    if payload.name.as_ref().is_some_and(|name| name.len() > MAX_NAME_LEN) {
        return (StatusCode::UNPROCESSABLE_ENTITY, "name exceeds 255 characters").into_response();
    }
    let expiry_minutes = payload
        .expires_in_minutes
        .unwrap_or(DEFAULT_EXPIRY_MINUTES)
        .clamp(1, MAX_EXPIRY_MINUTES);

    let expires_at = Utc::now() + ChronoDuration::minutes(expiry_minutes);
    let record = SessionRecord::new(payload.name.clone(), String::new(), expires_at);
    let session_id = record.id;

    if let Err(err) = state.store.create_session(record).await {
        log::error!(%err, "failed to create session");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to create session").into_response();
    }

    let response = CreateSessionResponse {
        session_id: session_id.to_string(),
        join_link: format!("{}/sessions/{session_id}", state.public_base_url),
        expires_at: expires_at.to_rfc3339(),
        name: payload.name,
    };
    (StatusCode::CREATED, Json(response)).into_response()
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub id: String,
    pub name: Option<String>,
    pub created_at: String,
    pub expires_at: String,
    pub participant_count: usize,
    pub is_active: bool,
}

/// `GET /sessions/{id}`
pub async fn get(State(state): State<Arc<AppState>>, Path(session_id): Path<String>) -> Response {
    let Ok(session_id) = session_id.parse::<pinshare_core::id::SessionId>() else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    let record = match state.store.get_session(&session_id).await {
        Ok(record) => record,
        Err(StoreError::NotFound) => return (StatusCode::NOT_FOUND, "session not found").into_response(),
        Err(err) => {
            log::error!(%err, "failed to load session");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to load session").into_response();
        }
    };

    let participant_count = match state.registry.lookup(&session_id) {
        Some(handle) => handle.snapshot().await.map(|s| s.participants.len()).unwrap_or(0),
        None => 0,
    };

    let response = SessionResponse {
        id: record.id.to_string(),
        name: record.name,
        created_at: record.created_at.to_rfc3339(),
        expires_at: record.expires_at.to_rfc3339(),
        participant_count,
        is_active: record.active,
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[derive(Debug, Deserialize)]
pub struct JoinSessionRequest {
    pub display_name: String,
    pub avatar_color: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JoinSessionResponse {
    pub user_id: String,
    pub websocket_token: String,
    pub websocket_url: String,
}

fn is_valid_avatar_color(color: &str) -> bool {
    color.len() == 7 && color.starts_with('#') && color[1..].chars().all(|c| c.is_ascii_hexdigit())
}

/// `POST /sessions/{id}/join`
pub async fn join(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<JoinSessionRequest>,
) -> Response {
    let Ok(session_id) = session_id.parse::<pinshare_core::id::SessionId>() else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    if payload.display_name.is_empty() || payload.display_name.len() > MAX_DISPLAY_NAME_LEN {
        return (StatusCode::UNPROCESSABLE_ENTITY, "display_name must be 1..100 characters").into_response();
    }
    let avatar_color = payload.avatar_color.unwrap_or_else(|| "#888888".to_string());
    if !is_valid_avatar_color(&avatar_color) {
        return (StatusCode::UNPROCESSABLE_ENTITY, "avatar_color must be #RRGGBB").into_response();
    }

    let session = match state.store.get_session(&session_id).await {
        Ok(session) if session.active => session,
        Ok(_) => return (StatusCode::NOT_FOUND, "session has ended").into_response(),
        Err(StoreError::NotFound) => return (StatusCode::NOT_FOUND, "session not found").into_response(),
        Err(err) => {
            log::error!(%err, "failed to load session for join");
            return (StatusCode::INTERNAL_SERVER_ERROR, "failed to load session").into_response();
        }
    };
    if session.is_expired(Utc::now()) {
        return (StatusCode::NOT_FOUND, "session has ended").into_response();
    }

    let user_id = UserId::new();
    let now = Utc::now();
    let record = ParticipantRecord {
        session_id,
        user_id: user_id.clone(),
        display_name: payload.display_name.clone(),
        avatar_color: avatar_color.clone(),
        joined_at: now,
        last_seen: now,
        active: true,
    };

    if let Err(err) = state.store.create_participant(record).await {
        return match err {
            StoreError::Conflict(_) => (StatusCode::CONFLICT, "duplicate_name").into_response(),
            StoreError::Capacity => (StatusCode::UNPROCESSABLE_ENTITY, "session_full").into_response(),
            other => {
                log::error!(err = %other, "failed to record participant");
                (StatusCode::INTERNAL_SERVER_ERROR, "failed to join session").into_response()
            }
        };
    }

    let token = match state
        .token_validator
        .issue(session_id, user_id.clone(), payload.display_name, avatar_color)
    {
        Ok(token) => token,
        Err(_) => return (StatusCode::INTERNAL_SERVER_ERROR, "failed to issue token").into_response(),
    };

    let response = JoinSessionResponse {
        user_id: user_id.to_string(),
        websocket_url: format!("{}/ws?token={token}", state.public_ws_base_url),
        websocket_token: token,
    };
    (StatusCode::CREATED, Json(response)).into_response()
}

#[derive(Debug, Serialize)]
pub struct ParticipantView {
    pub user_id: String,
    pub display_name: String,
    pub avatar_color: String,
    pub last_seen: String,
    pub is_active: bool,
}

#[derive(Debug, Serialize)]
pub struct ParticipantsResponse {
    pub participants: Vec<ParticipantView>,
}

/// `GET /sessions/{id}/participants` — reflects the live actor's view
/// (the only module permitted to hold participant state, §3), not the
/// durable store's provisional join rows.
pub async fn list_participants(State(state): State<Arc<AppState>>, Path(session_id): Path<String>) -> Response {
    let Ok(session_id) = session_id.parse::<pinshare_core::id::SessionId>() else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    let participants = match state.registry.lookup(&session_id) {
        Some(handle) => match handle.snapshot().await {
            Ok(snapshot) => snapshot
                .participants
                .into_iter()
                .map(|p| ParticipantView {
                    user_id: p.user_id.to_string(),
                    display_name: p.display_name,
                    avatar_color: p.avatar_color,
                    last_seen: p.last_seen.to_rfc3339(),
                    is_active: true,
                })
                .collect(),
            Err(_) => Vec::new(),
        },
        None => Vec::new(),
    };

    Json(ParticipantsResponse { participants }).into_response()
}

#[derive(Debug, Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

/// `DELETE /sessions/{id}/participants/{user_id}` — idempotent.
pub async fn remove_participant(
    State(state): State<Arc<AppState>>,
    Path((session_id, user_id)): Path<(String, String)>,
) -> Response {
    let Ok(session_id) = session_id.parse::<pinshare_core::id::SessionId>() else {
        return Json(SuccessResponse { success: true }).into_response();
    };
    let user_id = UserId::from(user_id);

    if let Some(handle) = state.registry.lookup(&session_id) {
        let _ = handle.remove_participant(user_id.clone()).await;
    }
    let _ = state.store.mark_participant_inactive(&session_id, &user_id).await;

    Json(SuccessResponse { success: true }).into_response()
}

/// `DELETE /sessions/{id}` — creator-only enforcement is delegated to the
/// router (§9 Open Question), so the core accepts the request unchecked.
pub async fn end(State(state): State<Arc<AppState>>, Path(session_id): Path<String>) -> Response {
    let Ok(session_id) = session_id.parse::<pinshare_core::id::SessionId>() else {
        return (StatusCode::NOT_FOUND, "session not found").into_response();
    };

    if let Err(err) = state.store.end_session(&session_id).await {
        log::error!(%err, "failed to end session");
        return (StatusCode::INTERNAL_SERVER_ERROR, "failed to end session").into_response();
    }
    if let Some(handle) = state.registry.lookup(&session_id) {
        handle.terminate(pinshare_core::data::SessionEndedReason::EndedByCreator).await;
    }

    Json(SuccessResponse { success: true }).into_response()
}
