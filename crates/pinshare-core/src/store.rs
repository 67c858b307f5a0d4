//! C7 — Store Gateway: the durable-persistence boundary. A trait rather
//! than a concrete database client so `pinshare-server` can wire up a real
//! backend while tests and local development use an in-memory stand-in
//! (mirroring the teacher's `SessionService` trait / `SessionServiceInMemory`
//! split in `kiko-backend::services::sessions`).

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::data::{ParticipantRecord, SessionRecord};
use crate::errors::StoreError;
use crate::id::{SessionId, UserId};

/// Durable persistence for session and participant records.
///
/// Everything the Session Actor and Connection Handler need at runtime
/// lives in memory (Registry, Bus, actor state); the store only has to
/// answer questions the Supervisor and Cleanup Worker ask on the slow
/// path — creating records, marking them ended/inactive, and listing
/// what has expired.
#[async_trait]
pub trait StoreGateway: Send + Sync {
    async fn create_session(&self, record: SessionRecord) -> Result<(), StoreError>;

    async fn get_session(&self, session_id: &SessionId) -> Result<SessionRecord, StoreError>;

    /// Marks a session inactive. Idempotent: ending an already-ended
    /// session is not an error.
    async fn end_session(&self, session_id: &SessionId) -> Result<(), StoreError>;

    async fn create_participant(&self, record: ParticipantRecord) -> Result<(), StoreError>;

    /// Marks a participant inactive. Idempotent.
    async fn mark_participant_inactive(
        &self,
        session_id: &SessionId,
        user_id: &UserId,
    ) -> Result<(), StoreError>;

    /// Lists active sessions whose `expires_at` is at or before `now`, or
    /// whose `last_activity` is at or before `inactivity_cutoff`, for the
    /// Cleanup Worker's sweep (§4.6).
    async fn list_expired_sessions(
        &self,
        now: DateTime<Utc>,
        inactivity_cutoff: DateTime<Utc>,
    ) -> Result<Vec<SessionRecord>, StoreError>;

    /// Lists active participants whose `last_seen` is at or before
    /// `cutoff`, for the Cleanup Worker's stale-participant sweep.
    async fn list_inactive_participants(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<ParticipantRecord>, StoreError>;
}
