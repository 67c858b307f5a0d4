//! C2 — Session Actor: the single logical owner of one session's runtime
//! state. Modeled as an owned value guarded by a single-consumer command
//! channel plus a dedicated worker task (Design Notes §9) rather than a
//! native lightweight process — every command is handled to completion
//! before the next begins, which gives a total order per session with no
//! per-field locking.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::bus::Bus;
use crate::config::Config;
use crate::data::{
    LocationFix, LocationSnapshot, Participant, SessionEndedReason, SessionEvent, SessionRecord,
    SessionSnapshot,
};
use crate::errors::SessionError;
use crate::id::{SessionId, UserId};
use crate::log;
use crate::registry::Registry;

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Observability counters exposed via [`ActorHandle::snapshot`]'s sibling,
/// used by the `/health` endpoint and the Cleanup Worker's diagnostics.
#[derive(Debug, Default, Clone, Copy)]
pub struct ActorMetrics {
    pub commands_processed: u64,
}

enum ActorCommand {
    AddParticipant {
        user_id: UserId,
        display_name: String,
        avatar_color: String,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    RemoveParticipant {
        user_id: UserId,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    UpdateLocation {
        user_id: UserId,
        lat: f64,
        lng: f64,
        accuracy: f64,
        client_ts: Option<String>,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Touch {
        user_id: UserId,
    },
    Snapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    Terminate {
        reason: SessionEndedReason,
        reply: Option<oneshot::Sender<()>>,
    },
}

/// A cheap-to-clone reference to a running Session Actor. The Registry
/// stores these as its "weak reference"; the actor itself owns all of the
/// state a handle's methods manipulate.
#[derive(Clone, Debug)]
pub struct ActorHandle {
    pub session_id: SessionId,
    pub generation: u64,
    tx: mpsc::Sender<ActorCommand>,
    command_deadline: StdDuration,
    /// Count of `location_update` frames dropped for rate limiting (§4.5) or
    /// mailbox overload (§5), recorded on a shared atomic rather than
    /// routed through the command queue itself, since the whole point of
    /// an overload drop is that the queue is the thing under pressure.
    dropped_location_updates: Arc<AtomicU64>,
}

impl ActorHandle {
    async fn call<T>(
        &self,
        deadline: StdDuration,
        build: impl FnOnce(oneshot::Sender<T>) -> ActorCommand,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = build(reply_tx);

        // Join/leave style commands block up to the caller deadline rather
        // than failing fast on a momentarily-full mailbox (§5 backpressure:
        // "Join/leave commands are never dropped").
        match tokio::time::timeout(deadline, self.tx.send(command)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(SessionError::Internal("actor task gone".into())),
            Err(_) => return Err(SessionError::Timeout),
        }

        match tokio::time::timeout(deadline, reply_rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(SessionError::Internal("actor dropped reply".into())),
            Err(_) => Err(SessionError::Timeout),
        }
    }

    /// Best-effort send used for non-critical commands (location updates).
    /// A mailbox send that doesn't complete within 50ms is treated as
    /// `Overloaded` rather than queued indefinitely (§5 backpressure).
    async fn call_best_effort<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ActorCommand,
    ) -> Result<T, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let command = build(reply_tx);

        match tokio::time::timeout(StdDuration::from_millis(50), self.tx.send(command)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(SessionError::Internal("actor task gone".into())),
            Err(_) => return Err(SessionError::Overloaded),
        }

        match tokio::time::timeout(self.command_deadline, reply_rx).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(_)) => Err(SessionError::Internal("actor dropped reply".into())),
            Err(_) => Err(SessionError::Timeout),
        }
    }

    pub async fn add_participant(
        &self,
        user_id: UserId,
        display_name: String,
        avatar_color: String,
    ) -> Result<(), SessionError> {
        self.call(self.command_deadline, |reply| ActorCommand::AddParticipant {
            user_id,
            display_name,
            avatar_color,
            reply,
        })
        .await?
    }

    pub async fn remove_participant(&self, user_id: UserId) -> Result<(), SessionError> {
        self.call(self.command_deadline, |reply| ActorCommand::RemoveParticipant {
            user_id,
            reply,
        })
        .await?
    }

    pub async fn update_location(
        &self,
        user_id: UserId,
        lat: f64,
        lng: f64,
        accuracy: f64,
        client_ts: Option<String>,
    ) -> Result<(), SessionError> {
        let result = self
            .call_best_effort(|reply| ActorCommand::UpdateLocation {
                user_id,
                lat,
                lng,
                accuracy,
                client_ts,
                reply,
            })
            .await;
        if matches!(result, Err(SessionError::Overloaded)) {
            self.record_dropped_location_update();
        }
        result?
    }

    /// Non-failing cast used by heartbeats to refresh last-seen.
    pub fn touch(&self, user_id: UserId) {
        let _ = self.tx.try_send(ActorCommand::Touch { user_id });
    }

    /// Records a `location_update` frame dropped before it ever reached
    /// this handle — used by the Connection Handler's own rate limiting
    /// (§4.5), which never calls [`ActorHandle::update_location`] at all
    /// for a rate-limited frame.
    pub fn record_dropped_location_update(&self) {
        self.dropped_location_updates.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_location_updates(&self) -> u64 {
        self.dropped_location_updates.load(Ordering::Relaxed)
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        match tokio::time::timeout(self.command_deadline, self.tx.send(ActorCommand::Snapshot { reply: reply_tx })).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(SessionError::Internal("actor task gone".into())),
            Err(_) => return Err(SessionError::Timeout),
        }
        tokio::time::timeout(self.command_deadline, reply_rx)
            .await
            .map_err(|_| SessionError::Timeout)?
            .map_err(|_| SessionError::Internal("actor dropped reply".into()))
    }

    pub async fn terminate(&self, reason: SessionEndedReason) {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(ActorCommand::Terminate {
                reason,
                reply: Some(reply_tx),
            })
            .await
            .is_ok()
        {
            let _ = reply_rx.await;
        }
    }
}

struct SessionActor {
    record: SessionRecord,
    config: Arc<Config>,
    registry: Arc<Registry>,
    bus: Arc<Bus>,
    participants: HashMap<UserId, Participant>,
    locations: HashMap<UserId, LocationFix>,
    seq: u64,
    metrics: ActorMetrics,
    empty_since: Option<Instant>,
    cmd_rx: mpsc::Receiver<ActorCommand>,
    self_handle: ActorHandle,
}

impl SessionActor {
    fn active_participant_count(&self) -> usize {
        self.participants.len()
    }

    fn next_seq(&mut self) -> u64 {
        self.seq += 1;
        self.seq
    }

    fn publish(&mut self, event: SessionEvent) {
        self.next_seq();
        self.bus.publish(self.record.id, event);
    }

    fn touch_activity(&mut self) {
        self.record.last_activity = Utc::now();
    }

    fn handle_add_participant(
        &mut self,
        user_id: UserId,
        display_name: String,
        avatar_color: String,
    ) -> Result<(), SessionError> {
        if self.active_participant_count() >= self.config.max_participants_per_session {
            return Err(SessionError::SessionFull);
        }
        if self.participants.values().any(|p| p.display_name == display_name) {
            return Err(SessionError::DuplicateName);
        }
        if self.participants.contains_key(&user_id) {
            return Err(SessionError::DuplicateUser);
        }

        let now = Utc::now();
        let participant = Participant {
            user_id: user_id.clone(),
            display_name: display_name.clone(),
            avatar_color: avatar_color.clone(),
            joined_at: now,
            last_seen: now,
        };
        self.participants.insert(user_id.clone(), participant);
        self.touch_activity();
        self.empty_since = None;

        self.publish(SessionEvent::ParticipantJoined {
            user_id,
            display_name,
            avatar_color,
        });
        Ok(())
    }

    fn handle_remove_participant(&mut self, user_id: UserId) -> Result<(), SessionError> {
        if self.participants.remove(&user_id).is_none() {
            return Err(SessionError::ParticipantNotFound);
        }
        self.locations.remove(&user_id);
        self.touch_activity();

        self.publish(SessionEvent::ParticipantLeft {
            user_id: user_id.clone(),
        });

        if self.active_participant_count() == 0 {
            self.empty_since = Some(Instant::now());
        }
        Ok(())
    }

    fn handle_update_location(
        &mut self,
        user_id: UserId,
        lat: f64,
        lng: f64,
        accuracy: f64,
        client_ts: Option<String>,
    ) -> Result<(), SessionError> {
        let Some(participant) = self.participants.get_mut(&user_id) else {
            return Err(SessionError::ParticipantNotFound);
        };
        if !lat.is_finite() || !lng.is_finite() || !accuracy.is_finite() || accuracy < 0.0 {
            return Err(SessionError::Validation("invalid location fix".into()));
        }

        let now = Instant::now();
        let deadline = now + self.config.ttl_location;
        let seq = self.seq + 1;
        self.locations.insert(
            user_id.clone(),
            LocationFix {
                lat,
                lng,
                accuracy,
                client_ts: client_ts.clone(),
                inserted_at: now,
                deadline,
                seq,
            },
        );
        participant.last_seen = Utc::now();
        self.touch_activity();

        self.publish(SessionEvent::LocationUpdate {
            user_id,
            lat,
            lng,
            accuracy,
            timestamp: client_ts,
        });
        Ok(())
    }

    fn handle_touch(&mut self, user_id: UserId) {
        if let Some(participant) = self.participants.get_mut(&user_id) {
            participant.last_seen = Utc::now();
        }
    }

    fn handle_snapshot(&self) -> SessionSnapshot {
        let now = Instant::now();
        let participants = self.participants.values().cloned().collect();
        let locations = self
            .locations
            .iter()
            .filter(|(_, fix)| fix.is_visible(now))
            .map(|(user_id, fix)| LocationSnapshot {
                user_id: user_id.clone(),
                lat: fix.lat,
                lng: fix.lng,
                accuracy: fix.accuracy,
                timestamp: fix.client_ts.clone(),
            })
            .collect();
        SessionSnapshot {
            participants,
            locations,
        }
    }

    fn prune_expired_locations(&mut self) {
        let now = Instant::now();
        self.locations.retain(|_, fix| fix.is_visible(now));
    }

    fn is_expired(&self) -> bool {
        Utc::now() >= self.record.expires_at
    }

    async fn terminate(self, reason: SessionEndedReason, reply: Option<oneshot::Sender<()>>) {
        let mut this = self;
        this.publish(SessionEvent::SessionEnded { reason });
        this.registry.unregister(&this.record.id, &this.self_handle);
        log::debug!(session_id = %this.record.id, ?reason, "session actor stopped");
        if let Some(reply) = reply {
            let _ = reply.send(());
        }
    }

    async fn run(mut self) {
        log::debug!(session_id = %self.record.id, "session actor started");
        let mut tick = tokio::time::interval(self.config.cleanup_tick);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            let empty_deadline = self.empty_since.map(|since| since + self.config.empty_grace);

            let empty_grace_elapsed = async {
                match empty_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                maybe_cmd = self.cmd_rx.recv() => {
                    match maybe_cmd {
                        Some(ActorCommand::Terminate { reason, reply }) => {
                            self.metrics.commands_processed += 1;
                            self.terminate(reason, reply).await;
                            return;
                        }
                        Some(command) => {
                            self.metrics.commands_processed += 1;
                            self.dispatch(command);
                        }
                        None => {
                            self.terminate(SessionEndedReason::Restart, None).await;
                            return;
                        }
                    }
                }
                _ = tick.tick() => {
                    self.prune_expired_locations();
                    if self.is_expired() {
                        self.terminate(SessionEndedReason::Expired, None).await;
                        return;
                    }
                }
                _ = empty_grace_elapsed => {
                    if self.active_participant_count() == 0 {
                        self.terminate(SessionEndedReason::Empty, None).await;
                        return;
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, command: ActorCommand) {
        match command {
            ActorCommand::AddParticipant {
                user_id,
                display_name,
                avatar_color,
                reply,
            } => {
                let result = self.handle_add_participant(user_id, display_name, avatar_color);
                let _ = reply.send(result);
            }
            ActorCommand::RemoveParticipant { user_id, reply } => {
                let result = self.handle_remove_participant(user_id);
                let _ = reply.send(result);
            }
            ActorCommand::UpdateLocation {
                user_id,
                lat,
                lng,
                accuracy,
                client_ts,
                reply,
            } => {
                let result = self.handle_update_location(user_id, lat, lng, accuracy, client_ts);
                let _ = reply.send(result);
            }
            ActorCommand::Touch { user_id } => {
                self.handle_touch(user_id);
            }
            ActorCommand::Snapshot { reply } => {
                let _ = reply.send(self.handle_snapshot());
            }
            ActorCommand::Terminate { .. } => unreachable!("handled in run()"),
        }
    }
}

/// Spawns a new Session Actor for the given session record, returning a
/// handle for issuing commands to it. The actor unregisters itself from
/// `registry` when it stops; the caller is responsible for registering
/// the returned handle (directly, or via [`Registry::claim`]).
pub fn spawn(
    record: SessionRecord,
    config: Arc<Config>,
    registry: Arc<Registry>,
    bus: Arc<Bus>,
) -> ActorHandle {
    spawn_monitored(record, config, registry, bus).0
}

/// Like [`spawn`], but also returns the worker task's `JoinHandle` so a
/// supervisor can detect an unexpected panic and decide whether to
/// restart it (§4.3).
pub fn spawn_monitored(
    record: SessionRecord,
    config: Arc<Config>,
    registry: Arc<Registry>,
    bus: Arc<Bus>,
) -> (ActorHandle, tokio::task::JoinHandle<()>) {
    let (tx, cmd_rx) = mpsc::channel(config.mailbox_capacity);
    let generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
    let session_id = record.id;
    let command_deadline = config.command_deadline;

    let self_handle = ActorHandle {
        session_id,
        generation,
        tx,
        command_deadline,
        dropped_location_updates: Arc::new(AtomicU64::new(0)),
    };

    let actor = SessionActor {
        record,
        config,
        registry,
        bus,
        participants: HashMap::new(),
        locations: HashMap::new(),
        seq: 0,
        metrics: ActorMetrics::default(),
        empty_since: None,
        cmd_rx,
        self_handle: self_handle.clone(),
    };

    let join = tokio::spawn(actor.run());
    (self_handle, join)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SessionEvent;
    use chrono::Duration as ChronoDuration;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            max_participants_per_session: 2,
            ttl_location: StdDuration::from_millis(50),
            min_update_interval: StdDuration::from_millis(10),
            idle_timeout: StdDuration::from_secs(60),
            empty_grace: StdDuration::from_millis(100),
            cleanup_interval: StdDuration::from_secs(300),
            inactivity_timeout: StdDuration::from_secs(3600),
            participant_timeout: StdDuration::from_secs(1800),
            mailbox_capacity: 16,
            subscription_buffer: 16,
            cleanup_tick: StdDuration::from_millis(20),
            command_deadline: StdDuration::from_secs(5),
        })
    }

    fn spawn_test_actor() -> (ActorHandle, Arc<Registry>, Arc<Bus>) {
        let registry = Arc::new(Registry::new());
        let bus = Arc::new(Bus::new());
        let record = SessionRecord::new(None, "creator".into(), Utc::now() + ChronoDuration::hours(1));
        let handle = spawn(record, test_config(), registry.clone(), bus.clone());
        (handle, registry, bus)
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn add_participant_then_snapshot_sees_them() {
        let (actor, _registry, _bus) = spawn_test_actor();
        actor
            .add_participant(UserId::from("u1"), "Alice".into(), "#FF5733".into())
            .await
            .unwrap();

        let snapshot = actor.snapshot().await.unwrap();
        assert_eq!(snapshot.participants.len(), 1);
        assert_eq!(snapshot.participants[0].display_name, "Alice");
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn capacity_is_enforced() {
        let (actor, _registry, _bus) = spawn_test_actor(); // max 2 per test_config
        actor.add_participant(UserId::from("u1"), "A".into(), "#000000".into()).await.unwrap();
        actor.add_participant(UserId::from("u2"), "B".into(), "#000000".into()).await.unwrap();

        let err = actor
            .add_participant(UserId::from("u3"), "C".into(), "#000000".into())
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::SessionFull);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn duplicate_name_is_rejected() {
        let (actor, _registry, _bus) = spawn_test_actor();
        actor.add_participant(UserId::from("u1"), "Alice".into(), "#000000".into()).await.unwrap();

        let err = actor
            .add_participant(UserId::from("u2"), "Alice".into(), "#111111".into())
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::DuplicateName);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn duplicate_user_is_rejected() {
        let (actor, _registry, _bus) = spawn_test_actor();
        actor.add_participant(UserId::from("u1"), "Alice".into(), "#000000".into()).await.unwrap();

        let err = actor
            .add_participant(UserId::from("u1"), "Bob".into(), "#111111".into())
            .await
            .unwrap_err();
        assert_eq!(err, SessionError::DuplicateUser);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn remove_participant_is_idempotent() {
        let (actor, _registry, _bus) = spawn_test_actor();
        actor.add_participant(UserId::from("u1"), "Alice".into(), "#000000".into()).await.unwrap();

        actor.remove_participant(UserId::from("u1")).await.unwrap();
        let err = actor.remove_participant(UserId::from("u1")).await.unwrap_err();
        assert_eq!(err, SessionError::ParticipantNotFound);
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn location_fix_expires_after_ttl() {
        let (actor, _registry, bus) = spawn_test_actor();
        actor.add_participant(UserId::from("u1"), "Alice".into(), "#000000".into()).await.unwrap();
        let (_handle, mut rx) = bus.subscribe(actor.session_id);

        actor
            .update_location(UserId::from("u1"), 37.7749, -122.4194, 5.0, None)
            .await
            .unwrap();

        let snapshot = actor.snapshot().await.unwrap();
        assert_eq!(snapshot.locations.len(), 1);

        tokio::time::advance(StdDuration::from_millis(60)).await;

        let snapshot = actor.snapshot().await.unwrap();
        assert!(snapshot.locations.is_empty());
        // Participant is still active; only the fix expired.
        assert_eq!(snapshot.participants.len(), 1);

        let joined = rx.recv().await.unwrap();
        assert!(matches!(*joined, SessionEvent::ParticipantJoined { .. }));
        let update = rx.recv().await.unwrap();
        assert!(matches!(*update, SessionEvent::LocationUpdate { .. }));
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn empty_session_terminates_after_grace_period() {
        let (actor, registry, bus) = spawn_test_actor();
        registry.register(actor.session_id, actor.clone()).unwrap();
        let (_handle, mut rx) = bus.subscribe(actor.session_id);

        actor.add_participant(UserId::from("u1"), "Alice".into(), "#000000".into()).await.unwrap();
        actor.remove_participant(UserId::from("u1")).await.unwrap();

        tokio::time::advance(StdDuration::from_millis(150)).await;
        // Give the actor's task a chance to run its select loop.
        tokio::task::yield_now().await;

        let mut saw_ended = false;
        while let Ok(event) = tokio::time::timeout(StdDuration::from_millis(10), rx.recv()).await {
            if let Some(event) = event {
                if matches!(*event, SessionEvent::SessionEnded { reason: SessionEndedReason::Empty }) {
                    saw_ended = true;
                }
            } else {
                break;
            }
        }
        assert!(saw_ended, "expected session_ended{{reason: empty}}");
        assert!(registry.lookup(&actor.session_id).is_none());
    }

    #[tokio::test(flavor = "current_thread", start_paused = true)]
    async fn rejoin_during_grace_cancels_termination() {
        let (actor, registry, _bus) = spawn_test_actor();
        registry.register(actor.session_id, actor.clone()).unwrap();

        actor.add_participant(UserId::from("u1"), "Alice".into(), "#000000".into()).await.unwrap();
        actor.remove_participant(UserId::from("u1")).await.unwrap();

        tokio::time::advance(StdDuration::from_millis(50)).await;
        actor.add_participant(UserId::from("u2"), "Bob".into(), "#111111".into()).await.unwrap();

        tokio::time::advance(StdDuration::from_millis(150)).await;
        tokio::task::yield_now().await;

        // Session should still be alive: grace was canceled by the rejoin.
        assert!(registry.lookup(&actor.session_id).is_some());
        let snapshot = actor.snapshot().await.unwrap();
        assert_eq!(snapshot.participants.len(), 1);
    }
}
