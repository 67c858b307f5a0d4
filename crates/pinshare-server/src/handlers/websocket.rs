//! `GET /ws` — the Connection Handler (§4.5), one task per connection,
//! structured like the teacher's `handle_socket`: a `tokio::select!`
//! between `socket.recv()` and the bus subscription's outbound channel,
//! generalized to authenticate the handshake token, lazily start the
//! session actor, and enforce rate limiting / idle timeout / bad-frame
//! counting on the way in.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use futures_util::SinkExt;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use pinshare_core::data::SessionEvent;
use pinshare_core::id::UserId;
use pinshare_core::log;

use crate::auth::TokenValidator;
use crate::state::AppState;

/// Three consecutive malformed frames close the socket (§4.5).
const MAX_CONSECUTIVE_BAD_FRAMES: u32 = 3;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum ClientMessage {
    LocationUpdate {
        lat: f64,
        lng: f64,
        accuracy: f64,
        #[serde(default)]
        client_ts: Option<String>,
    },
    Ping,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
enum ErrorFrame {
    Error { code: &'static str },
}

/// `GET /ws?token=...`
pub async fn upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    let claims = match state.token_validator.validate(&query.token) {
        Ok(claims) => claims,
        Err(_) => return (axum::http::StatusCode::UNAUTHORIZED, "invalid or expired token").into_response(),
    };

    ws.on_upgrade(move |socket| handle_socket(socket, state, claims))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>, claims: crate::auth::Claims) {
    let session_id = claims.session_id;
    let user_id = claims.user_id;

    let actor = match state.supervisor.get_or_start(session_id).await {
        Ok(handle) => handle,
        Err(err) => {
            log::warn!(%session_id, %err, "could not start session for websocket join");
            let _ = socket.close().await;
            return;
        }
    };

    if let Err(err) = actor
        .add_participant(user_id.clone(), claims.display_name, claims.avatar_color)
        .await
    {
        log::warn!(%session_id, %user_id, %err, "add_participant rejected websocket join");
        let frame = serde_json::to_string(&ErrorFrame::Error { code: error_code(&err) }).unwrap();
        let _ = socket.send(Message::Text(frame.into())).await;
        let _ = socket.close().await;
        return;
    }

    let (sub_handle, mut events) = state.bus.subscribe(session_id);
    let idle_timeout = state.config.idle_timeout;
    let min_update_interval = state.config.min_update_interval;

    let mut last_update_at: Option<Instant> = None;
    let mut consecutive_bad_frames: u32 = 0;

    loop {
        tokio::select! {
            inbound = tokio::time::timeout(idle_timeout, socket.recv()) => {
                let Ok(inbound) = inbound else {
                    log::debug!(%session_id, %user_id, "websocket idle timeout");
                    break;
                };
                let Some(inbound) = inbound else {
                    break;
                };
                let Ok(message) = inbound else {
                    break;
                };

                match message {
                    Message::Text(text) => {
                        match serde_json::from_str::<ClientMessage>(&text) {
                            Ok(ClientMessage::LocationUpdate { lat, lng, accuracy, client_ts }) => {
                                consecutive_bad_frames = 0;
                                if !lat.is_finite() || !lng.is_finite() || !accuracy.is_finite() || accuracy < 0.0 {
                                    let frame = serde_json::to_string(&ErrorFrame::Error { code: "INVALID_LOCATION" }).unwrap();
                                    let _ = socket.send(Message::Text(frame.into())).await;
                                    continue;
                                }
                                let now = Instant::now();
                                if last_update_at.is_some_and(|last| now.duration_since(last) < min_update_interval) {
                                    actor.record_dropped_location_update();
                                    continue;
                                }
                                last_update_at = Some(now);
                                if let Err(err) = actor.update_location(user_id.clone(), lat, lng, accuracy, client_ts).await {
                                    log::debug!(%session_id, %user_id, %err, "location update dropped");
                                }
                            }
                            Ok(ClientMessage::Ping) => {
                                consecutive_bad_frames = 0;
                                actor.touch(user_id.clone());
                                let _ = socket.send(Message::Text("{\"type\":\"pong\"}".into())).await;
                            }
                            Err(_) => {
                                let code = if text.contains("\"type\"") { "INVALID_TYPE" } else { "BAD_FRAME" };
                                consecutive_bad_frames += 1;
                                let frame = serde_json::to_string(&ErrorFrame::Error { code }).unwrap();
                                let _ = socket.send(Message::Text(frame.into())).await;
                                if consecutive_bad_frames >= MAX_CONSECUTIVE_BAD_FRAMES {
                                    log::debug!(%session_id, %user_id, "too many consecutive bad frames, closing");
                                    break;
                                }
                            }
                        }
                    }
                    Message::Close(_) => break,
                    Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
                }
            }
            outbound = events.recv() => {
                let Some(event) = outbound else { break };
                if matches!(*event, SessionEvent::SubscriptionDropped) {
                    log::warn!(%session_id, %user_id, "subscription dropped, closing socket");
                    break;
                }
                let Ok(frame) = serde_json::to_string(event.as_ref()) else { continue };
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
        }
    }

    cleanup_connection(&state, &sub_handle, session_id, &actor, user_id).await;
}

fn error_code(err: &pinshare_core::errors::SessionError) -> &'static str {
    use pinshare_core::errors::SessionError;
    match err {
        SessionError::SessionFull => "SESSION_FULL",
        SessionError::DuplicateName => "DUPLICATE_NAME",
        SessionError::DuplicateUser => "DUPLICATE_USER",
        SessionError::SessionEnded(_) => "SESSION_ENDED",
        _ => "JOIN_FAILED",
    }
}

/// Idempotent: runs once per connection regardless of which branch of the
/// loop above broke out of it, mirroring the teacher's `cleanup_connection`.
async fn cleanup_connection(
    state: &AppState,
    sub_handle: &pinshare_core::bus::SubscriptionHandle,
    session_id: pinshare_core::id::SessionId,
    actor: &pinshare_core::actor::ActorHandle,
    user_id: UserId,
) {
    state.bus.unsubscribe(sub_handle);
    let _ = actor.remove_participant(user_id.clone()).await;
    let _ = state.store.mark_participant_inactive(&session_id, &user_id).await;
    log::debug!(%session_id, %user_id, "websocket connection cleaned up");
}
