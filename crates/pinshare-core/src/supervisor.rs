//! C3 — Supervisor: lazily starts a Session Actor on first access and
//! restarts it, within a bounded intensity, if its task panics.
//!
//! Mirrors the teacher's `SessionServiceInMemory::get_or_create` atomic
//! get-or-spawn shape, generalized from a single `DashMap::entry` call to
//! the explicit [`crate::registry::Registry::claim`] protocol so the
//! restart-on-panic path can re-claim the same slot.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use dashmap::DashMap;
use tokio::time::Instant;

use crate::actor::{self, ActorHandle};
use crate::bus::Bus;
use crate::config::Config;
use crate::data::SessionEndedReason;
use crate::errors::{StoreError, SupervisorError};
use crate::id::SessionId;
use crate::log;
use crate::registry::Registry;
use crate::retry::with_retry;
use crate::store::StoreGateway;

/// A session may restart at most this many times within [`WINDOW`] before
/// the Supervisor gives up and marks it ended (Design Notes, Open
/// Question: restart intensity).
const MAX_RESTARTS: u32 = 3;
const WINDOW: StdDuration = StdDuration::from_secs(60);

struct RestartWindow {
    count: u32,
    window_start: Instant,
}

/// Shared state handed to every watch task so a restart can re-arm
/// supervision for the freshly spawned actor without the task needing
/// to hold a reference back to the `Supervisor` itself.
#[derive(Clone)]
struct Shared {
    registry: Arc<Registry>,
    bus: Arc<Bus>,
    config: Arc<Config>,
    store: Arc<dyn StoreGateway>,
    restarts: Arc<DashMap<SessionId, RestartWindow>>,
}

impl Shared {
    /// Returns `true` and records the attempt if `session_id` has not
    /// exceeded its restart budget within the rolling window; resets the
    /// window if it has elapsed.
    fn allow_restart(&self, session_id: SessionId) -> bool {
        let now = Instant::now();
        let mut entry = self.restarts.entry(session_id).or_insert(RestartWindow {
            count: 0,
            window_start: now,
        });
        if now.duration_since(entry.window_start) > WINDOW {
            entry.count = 0;
            entry.window_start = now;
        }
        entry.count += 1;
        entry.count <= MAX_RESTARTS
    }
}

pub struct Supervisor {
    shared: Shared,
}

impl Supervisor {
    pub fn new(
        registry: Arc<Registry>,
        bus: Arc<Bus>,
        config: Arc<Config>,
        store: Arc<dyn StoreGateway>,
    ) -> Self {
        Self {
            shared: Shared {
                registry,
                bus,
                config,
                store,
                restarts: Arc::new(DashMap::new()),
            },
        }
    }

    /// Returns the running actor for `session_id`, starting it first if
    /// it isn't already running. Concurrent callers racing on the same
    /// unstarted session never spawn more than one actor: the loser of
    /// the [`Registry::claim`] race waits for the winner to finish
    /// registering and returns its handle instead.
    pub async fn get_or_start(&self, session_id: SessionId) -> Result<ActorHandle, SupervisorError> {
        if let Some(handle) = self.shared.registry.lookup(&session_id) {
            return Ok(handle);
        }

        let Some(claim) = self.shared.registry.claim(session_id) else {
            // Someone else is spawning it right now; briefly wait for
            // them to commit rather than erroring out the caller.
            for _ in 0..20 {
                if let Some(handle) = self.shared.registry.lookup(&session_id) {
                    return Ok(handle);
                }
                tokio::time::sleep(StdDuration::from_millis(5)).await;
            }
            return Err(SupervisorError::SessionNotFound);
        };

        let record = with_retry("load_session", || self.shared.store.get_session(&session_id))
            .await
            .map_err(|err| match err {
                StoreError::NotFound => SupervisorError::SessionNotFound,
                other => SupervisorError::Store(other),
            })?;

        if !record.active {
            return Err(SupervisorError::SessionEnded);
        }

        let (handle, join) = actor::spawn_monitored(
            record,
            self.shared.config.clone(),
            self.shared.registry.clone(),
            self.shared.bus.clone(),
        );
        claim.commit(handle.clone());
        watch(self.shared.clone(), session_id, join);
        Ok(handle)
    }
}

/// Waits for an actor's worker task to finish. A clean shutdown (the task
/// returned normally, having already unregistered itself) needs no
/// action. A panic is restarted — within the bounded intensity window —
/// by re-claiming the registry slot and spawning a fresh actor from the
/// session's last durable record; a session that is out of restarts is
/// ended in the store so the Cleanup Worker's view stays consistent.
fn watch(shared: Shared, session_id: SessionId, join: tokio::task::JoinHandle<()>) {
    tokio::spawn(async move {
        if join.await.is_ok() {
            return;
        }

        log::warn!(%session_id, "session actor task panicked");
        if !shared.allow_restart(session_id) {
            log::error!(%session_id, "restart intensity exceeded, ending session");
            let _ = with_retry("end_session_after_crash_loop", || shared.store.end_session(&session_id)).await;
            return;
        }

        let record = match with_retry("reload_session_for_restart", || shared.store.get_session(&session_id)).await {
            Ok(record) if record.active => record,
            _ => return,
        };

        let Some(claim) = shared.registry.claim(session_id) else {
            // Someone else already restarted it (or it was claimed for a
            // fresh session with the same id, astronomically unlikely).
            return;
        };

        shared.bus.publish(
            session_id,
            crate::data::SessionEvent::SessionEnded {
                reason: SessionEndedReason::Restart,
            },
        );

        let (handle, join) = actor::spawn_monitored(
            record,
            shared.config.clone(),
            shared.registry.clone(),
            shared.bus.clone(),
        );
        claim.commit(handle);
        watch(shared, session_id, join);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{ParticipantRecord, SessionRecord};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};

    #[derive(Default)]
    struct FakeStore {
        sessions: DashMap<SessionId, SessionRecord>,
    }

    #[async_trait]
    impl StoreGateway for FakeStore {
        async fn create_session(&self, record: SessionRecord) -> Result<(), StoreError> {
            self.sessions.insert(record.id, record);
            Ok(())
        }

        async fn get_session(&self, session_id: &SessionId) -> Result<SessionRecord, StoreError> {
            self.sessions.get(session_id).map(|e| e.value().clone()).ok_or(StoreError::NotFound)
        }

        async fn end_session(&self, session_id: &SessionId) -> Result<(), StoreError> {
            if let Some(mut entry) = self.sessions.get_mut(session_id) {
                entry.active = false;
            }
            Ok(())
        }

        async fn create_participant(&self, _record: ParticipantRecord) -> Result<(), StoreError> {
            Ok(())
        }

        async fn mark_participant_inactive(&self, _session_id: &SessionId, _user_id: &crate::id::UserId) -> Result<(), StoreError> {
            Ok(())
        }

        async fn list_expired_sessions(&self, _now: DateTime<Utc>, _inactivity_cutoff: DateTime<Utc>) -> Result<Vec<SessionRecord>, StoreError> {
            Ok(Vec::new())
        }

        async fn list_inactive_participants(&self, _cutoff: DateTime<Utc>) -> Result<Vec<ParticipantRecord>, StoreError> {
            Ok(Vec::new())
        }
    }

    fn test_supervisor() -> (Supervisor, Arc<FakeStore>) {
        let store = Arc::new(FakeStore::default());
        let supervisor = Supervisor::new(
            Arc::new(Registry::new()),
            Arc::new(Bus::new()),
            Arc::new(Config::from_env()),
            store.clone(),
        );
        (supervisor, store)
    }

    #[tokio::test]
    async fn starts_a_session_from_the_store() {
        let (supervisor, store) = test_supervisor();
        let record = SessionRecord::new(None, "creator".into(), Utc::now() + chrono::Duration::hours(1));
        let id = record.id;
        store.create_session(record).await.unwrap();

        let handle = supervisor.get_or_start(id).await.unwrap();
        assert_eq!(handle.session_id, id);
    }

    #[tokio::test]
    async fn returns_same_handle_on_second_call() {
        let (supervisor, store) = test_supervisor();
        let record = SessionRecord::new(None, "creator".into(), Utc::now() + chrono::Duration::hours(1));
        let id = record.id;
        store.create_session(record).await.unwrap();

        let first = supervisor.get_or_start(id).await.unwrap();
        let second = supervisor.get_or_start(id).await.unwrap();
        assert_eq!(first.generation, second.generation);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (supervisor, _store) = test_supervisor();
        let err = supervisor.get_or_start(SessionId::new()).await.unwrap_err();
        assert!(matches!(err, SupervisorError::SessionNotFound));
    }

    #[tokio::test]
    async fn inactive_session_is_rejected() {
        let (supervisor, store) = test_supervisor();
        let mut record = SessionRecord::new(None, "creator".into(), Utc::now() + chrono::Duration::hours(1));
        record.active = false;
        let id = record.id;
        store.create_session(record).await.unwrap();

        let err = supervisor.get_or_start(id).await.unwrap_err();
        assert!(matches!(err, SupervisorError::SessionEnded));
    }
}
