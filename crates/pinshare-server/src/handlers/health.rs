//! `GET /health` — ambient observability endpoint (§6 SUPPLEMENT), carried
//! over in shape unchanged from the teacher's `handlers::health::get`:
//! process uptime plus a live count pulled from the Registry rather than
//! the durable store, since that's the number an operator actually wants.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use chrono::{DateTime, Utc};
use serde::Serialize;

use pinshare_core::log;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub started_at: String,
    pub uptime: UptimeInfo,
    pub active_sessions: usize,
}

#[derive(Debug, Serialize)]
pub struct UptimeInfo {
    pub seconds: i64,
    pub human: String,
}

fn human_readable_uptime(started_at: DateTime<Utc>) -> String {
    let elapsed = Utc::now().signed_duration_since(started_at);
    let secs = elapsed.num_seconds() % 60;
    let minutes = elapsed.num_minutes() % 60;
    let hours = elapsed.num_hours() % 24;
    let days = elapsed.num_days();

    if days > 0 {
        format!("{days}d {hours}h {minutes}m {secs}s")
    } else if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

pub async fn get(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let active_sessions = state.registry.len();
    let response = HealthResponse {
        status: "healthy",
        timestamp: Utc::now().to_rfc3339(),
        started_at: state.started_at.to_rfc3339(),
        uptime: UptimeInfo {
            seconds: (Utc::now() - state.started_at).num_seconds(),
            human: human_readable_uptime(state.started_at),
        },
        active_sessions,
    };

    log::debug!(active_sessions, "health check");
    Json(response)
}
