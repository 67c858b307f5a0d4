//! C6 — Cleanup Worker: a single background task reconciling the durable
//! store with the in-memory actor view, structured like the teacher's
//! health-check polling loop but driven by a `tokio::time::interval`
//! rather than a request. Never mutates actor state directly — every
//! change is routed through the actor (via the Supervisor/Registry) so
//! the actor's own invariants stay the single source of truth.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;

use pinshare_core::data::SessionEndedReason;
use pinshare_core::log;
use pinshare_core::registry::Registry;
use pinshare_core::retry::with_retry;
use pinshare_core::store::StoreGateway;

const QUERY_DEADLINE: StdDuration = StdDuration::from_secs(30);

pub struct CleanupWorker {
    registry: Arc<Registry>,
    store: Arc<dyn StoreGateway>,
    interval: StdDuration,
    inactivity_timeout: chrono::Duration,
    participant_timeout: chrono::Duration,
}

impl CleanupWorker {
    pub fn new(
        registry: Arc<Registry>,
        store: Arc<dyn StoreGateway>,
        interval: StdDuration,
        inactivity_timeout: StdDuration,
        participant_timeout: StdDuration,
    ) -> Self {
        Self {
            registry,
            store,
            interval,
            inactivity_timeout: chrono::Duration::from_std(inactivity_timeout).unwrap_or(chrono::Duration::hours(1)),
            participant_timeout: chrono::Duration::from_std(participant_timeout).unwrap_or(chrono::Duration::minutes(30)),
        }
    }

    pub async fn run(self) {
        let mut tick = tokio::time::interval(self.interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tick.tick().await;
            if let Err(err) = tokio::time::timeout(QUERY_DEADLINE, self.sweep()).await {
                log::warn!(?err, "cleanup worker sweep timed out, skipping this tick");
            }
        }
    }

    async fn sweep(&self) {
        self.sweep_expired_sessions().await;
        self.sweep_inactive_participants().await;
    }

    async fn sweep_expired_sessions(&self) {
        let now = Utc::now();
        let inactivity_cutoff = now - self.inactivity_timeout;
        let expired = match with_retry("list_expired_sessions", || {
            self.store.list_expired_sessions(now, inactivity_cutoff)
        })
        .await
        {
            Ok(sessions) => sessions,
            Err(err) => {
                log::error!(%err, "failed to list expired sessions");
                return;
            }
        };

        for session in expired {
            if let Err(err) = with_retry("end_session", || self.store.end_session(&session.id)).await {
                log::error!(session_id = %session.id, %err, "failed to mark session inactive");
                continue;
            }
            if let Some(handle) = self.registry.lookup(&session.id) {
                handle.terminate(SessionEndedReason::Expired).await;
            }
        }
    }

    async fn sweep_inactive_participants(&self) {
        let cutoff = Utc::now() - self.participant_timeout;
        let stale = match with_retry("list_inactive_participants", || self.store.list_inactive_participants(cutoff)).await {
            Ok(rows) => rows,
            Err(err) => {
                log::error!(%err, "failed to list inactive participants");
                return;
            }
        };

        for participant in stale {
            if let Err(err) = with_retry("mark_participant_inactive", || {
                self.store.mark_participant_inactive(&participant.session_id, &participant.user_id)
            })
            .await
            {
                log::error!(session_id = %participant.session_id, %err, "failed to mark participant inactive");
                continue;
            }
            if let Some(handle) = self.registry.lookup(&participant.session_id) {
                let _ = handle.remove_participant(participant.user_id).await;
            }
        }
    }
}
