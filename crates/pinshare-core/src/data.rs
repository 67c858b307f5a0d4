//! Data structures for session, participant, and location state, plus the
//! event types published on the pub/sub bus and forwarded verbatim to
//! WebSocket clients as `{"type": ..., "data": ...}` envelopes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::id::{SessionId, UserId};

/// The durable-store-facing session record (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: SessionId,
    pub name: Option<String>,
    pub creator_token: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub active: bool,
    pub last_activity: DateTime<Utc>,
}

impl SessionRecord {
    pub fn new(name: Option<String>, creator_token: String, expires_at: DateTime<Utc>) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            name,
            creator_token,
            created_at: now,
            expires_at,
            active: true,
            last_activity: now,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The durable-store-facing participant record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantRecord {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_color: String,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub active: bool,
}

/// A live participant as tracked by the [`crate::actor::SessionActor`]'s
/// in-memory membership map. Only the actor may construct or mutate one.
#[derive(Debug, Clone, Serialize)]
pub struct Participant {
    pub user_id: UserId,
    pub display_name: String,
    pub avatar_color: String,
    pub joined_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

/// A participant's current location fix, bounded by a TTL deadline. Only
/// the actor may construct or mutate one.
#[derive(Debug, Clone)]
pub struct LocationFix {
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
    pub client_ts: Option<String>,
    pub inserted_at: Instant,
    pub deadline: Instant,
    pub seq: u64,
}

impl LocationFix {
    pub fn is_visible(&self, now: Instant) -> bool {
        now <= self.deadline
    }
}

/// A point-in-time view of a session's participants and currently-visible
/// location fixes, as returned by `Actor::snapshot()`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub participants: Vec<Participant>,
    pub locations: Vec<LocationSnapshot>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationSnapshot {
    pub user_id: UserId,
    pub lat: f64,
    pub lng: f64,
    pub accuracy: f64,
    pub timestamp: Option<String>,
}

/// Why a [`crate::actor::SessionActor`] terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEndedReason {
    Expired,
    EndedByCreator,
    Empty,
    Restart,
}

/// Events published by a [`crate::actor::SessionActor`] to its bus topic.
///
/// Serializes directly as the `{"type": "...", "data": {...}}` wire
/// envelope so the Connection Handler can forward a received event to its
/// socket without re-encoding it (mirroring how the teacher's
/// `SessionMessage` doubles as both the internal pub/sub payload and the
/// wire format).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum SessionEvent {
    ParticipantJoined {
        user_id: UserId,
        display_name: String,
        avatar_color: String,
    },
    ParticipantLeft {
        user_id: UserId,
    },
    LocationUpdate {
        user_id: UserId,
        lat: f64,
        lng: f64,
        accuracy: f64,
        timestamp: Option<String>,
    },
    SessionEnded {
        reason: SessionEndedReason,
    },
    /// Internal sentinel: never actually reaches the wire. Delivered to a
    /// subscription that was evicted for being too slow (§4.4); the
    /// Connection Handler treats receiving it identically to the channel
    /// closing and closes the socket.
    #[serde(skip)]
    SubscriptionDropped,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn participant_joined_serializes_as_tagged_envelope() {
        let event = SessionEvent::ParticipantJoined {
            user_id: UserId::from("u1"),
            display_name: "Alice".into(),
            avatar_color: "#FF5733".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "participant_joined");
        assert_eq!(json["data"]["display_name"], "Alice");
    }

    #[test]
    fn session_ended_reason_is_snake_case() {
        let event = SessionEvent::SessionEnded {
            reason: SessionEndedReason::EndedByCreator,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["reason"], "ended_by_creator");
    }
}
