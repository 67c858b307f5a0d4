//! Dev-grade `StoreGateway` implementation (§4.7 SUPPLEMENT), directly
//! descended from the teacher's `SessionServiceInMemory`: a couple of
//! `DashMap`s standing in for the durable relational store so the
//! workspace runs and is testable without a real database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use pinshare_core::data::{ParticipantRecord, SessionRecord};
use pinshare_core::errors::StoreError;
use pinshare_core::id::{SessionId, UserId};
use pinshare_core::store::StoreGateway;

pub struct InMemoryStore {
    sessions: DashMap<SessionId, SessionRecord>,
    participants: DashMap<SessionId, Vec<ParticipantRecord>>,
    max_participants_per_session: usize,
}

impl InMemoryStore {
    pub fn new(max_participants_per_session: usize) -> Self {
        Self {
            sessions: DashMap::new(),
            participants: DashMap::new(),
            max_participants_per_session,
        }
    }
}

#[async_trait]
impl StoreGateway for InMemoryStore {
    async fn create_session(&self, record: SessionRecord) -> Result<(), StoreError> {
        match self.sessions.entry(record.id) {
            Entry::Occupied(_) => Err(StoreError::Conflict("session already exists".into())),
            Entry::Vacant(slot) => {
                slot.insert(record);
                Ok(())
            }
        }
    }

    async fn get_session(&self, session_id: &SessionId) -> Result<SessionRecord, StoreError> {
        self.sessions
            .get(session_id)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn end_session(&self, session_id: &SessionId) -> Result<(), StoreError> {
        if let Some(mut entry) = self.sessions.get_mut(session_id) {
            entry.active = false;
        }
        Ok(())
    }

    /// Enforces (session-id, user-id) and (session-id, display-name)
    /// uniqueness at the row level, so the actor's own checks (§4.2)
    /// double as correctness guarantees rather than race-sensitive
    /// optimizations, per §4.7.
    async fn create_participant(&self, record: ParticipantRecord) -> Result<(), StoreError> {
        let mut rows = self.participants.entry(record.session_id).or_default();
        let conflict = rows.iter().any(|existing| {
            existing.active
                && (existing.user_id == record.user_id || existing.display_name == record.display_name)
        });
        if conflict {
            return Err(StoreError::Conflict("participant already exists in session".into()));
        }
        if rows.iter().filter(|existing| existing.active).count() >= self.max_participants_per_session {
            return Err(StoreError::Capacity);
        }
        rows.push(record);
        Ok(())
    }

    async fn mark_participant_inactive(&self, session_id: &SessionId, user_id: &UserId) -> Result<(), StoreError> {
        if let Some(mut rows) = self.participants.get_mut(session_id) {
            for row in rows.iter_mut() {
                if &row.user_id == user_id {
                    row.active = false;
                }
            }
        }
        Ok(())
    }

    async fn list_expired_sessions(
        &self,
        now: DateTime<Utc>,
        inactivity_cutoff: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, StoreError> {
        Ok(self
            .sessions
            .iter()
            .filter(|entry| entry.active && (entry.expires_at <= now || entry.last_activity <= inactivity_cutoff))
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn list_inactive_participants(&self, cutoff: DateTime<Utc>) -> Result<Vec<ParticipantRecord>, StoreError> {
        Ok(self
            .participants
            .iter()
            .flat_map(|entry| entry.value().clone())
            .filter(|row| row.active && row.last_seen <= cutoff)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn session_record() -> SessionRecord {
        SessionRecord::new(Some("Trip".into()), "creator-token".into(), Utc::now() + ChronoDuration::hours(1))
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let store = InMemoryStore::new(50);
        let record = session_record();
        let id = record.id;
        store.create_session(record).await.unwrap();

        let fetched = store.get_session(&id).await.unwrap();
        assert_eq!(fetched.id, id);
    }

    #[tokio::test]
    async fn duplicate_participant_name_is_rejected() {
        let store = InMemoryStore::new(50);
        let record = session_record();
        let session_id = record.id;
        store.create_session(record).await.unwrap();

        let now = Utc::now();
        let alice = ParticipantRecord {
            session_id,
            user_id: UserId::from("u1"),
            display_name: "Alice".into(),
            avatar_color: "#FF5733".into(),
            joined_at: now,
            last_seen: now,
            active: true,
        };
        store.create_participant(alice).await.unwrap();

        let alice_again = ParticipantRecord {
            session_id,
            user_id: UserId::from("u2"),
            display_name: "Alice".into(),
            avatar_color: "#000000".into(),
            joined_at: now,
            last_seen: now,
            active: true,
        };
        assert!(store.create_participant(alice_again).await.is_err());
    }

    #[tokio::test]
    async fn list_expired_sessions_only_returns_active_past_deadline() {
        let store = InMemoryStore::new(50);
        let mut expired = session_record();
        expired.expires_at = Utc::now() - ChronoDuration::minutes(1);
        let expired_id = expired.id;
        store.create_session(expired).await.unwrap();
        store.create_session(session_record()).await.unwrap();

        let results = store.list_expired_sessions(Utc::now(), Utc::now() - ChronoDuration::hours(1)).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, expired_id);
    }
}
