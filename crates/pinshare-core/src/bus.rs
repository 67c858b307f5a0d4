//! C4 — Pub/Sub Bus: topic-scoped, in-process, at-most-once, per-subscription
//! FIFO broadcast from a Session Actor to every Connection Handler
//! subscribed to that session's topic.
//!
//! Modeled as a topic-keyed set of bounded outbound queues (Design Notes
//! §9): the publisher enqueues by iterating a cloned copy of the
//! subscriber list so it never holds a lock during delivery, and a
//! subscriber whose queue is full is evicted rather than allowed to stall
//! the publisher.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::mpsc;

use crate::data::SessionEvent;
use crate::id::SessionId;

static NEXT_SUBSCRIPTION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Clone)]
struct Subscription {
    id: u64,
    tx: mpsc::Sender<Arc<SessionEvent>>,
}

/// A handle returned by [`Bus::subscribe`]. Dropping it does not
/// automatically unsubscribe; call [`Bus::unsubscribe`] explicitly so the
/// bus can release the sender promptly instead of waiting to notice a
/// closed receiver on the next publish.
pub struct SubscriptionHandle {
    pub session_id: SessionId,
    id: u64,
}

pub struct Bus {
    topics: DashMap<SessionId, Vec<Subscription>>,
    buffer_capacity: usize,
}

impl Bus {
    pub fn new() -> Self {
        Self::with_buffer_capacity(256)
    }

    pub fn with_buffer_capacity(buffer_capacity: usize) -> Self {
        Self {
            topics: DashMap::new(),
            buffer_capacity,
        }
    }

    /// Subscribes to a session's topic, returning a handle (for
    /// [`Bus::unsubscribe`]) and the receiving half of the subscription's
    /// queue.
    pub fn subscribe(&self, session_id: SessionId) -> (SubscriptionHandle, mpsc::Receiver<Arc<SessionEvent>>) {
        let (tx, rx) = mpsc::channel(self.buffer_capacity);
        let id = NEXT_SUBSCRIPTION_ID.fetch_add(1, Ordering::Relaxed);
        self.topics
            .entry(session_id)
            .or_default()
            .push(Subscription { id, tx });
        (SubscriptionHandle { session_id, id }, rx)
    }

    /// Removes a subscription. Idempotent.
    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        if let Some(mut subs) = self.topics.get_mut(&handle.session_id) {
            subs.retain(|s| s.id != handle.id);
        }
    }

    /// Publishes an event to every current subscriber of a session's
    /// topic, in the order `publish` is called. A no-op if the topic has
    /// no subscribers. Slow subscribers (full outbound queue) are evicted
    /// and best-effort notified with a [`SessionEvent::SubscriptionDropped`]
    /// sentinel.
    pub fn publish(&self, session_id: SessionId, event: SessionEvent) {
        let Some(subs) = self.topics.get(&session_id).map(|e| e.value().clone()) else {
            return;
        };
        if subs.is_empty() {
            return;
        }

        let event = Arc::new(event);
        let mut dropped_ids = Vec::new();
        for sub in &subs {
            if let Err(mpsc::error::TrySendError::Full(_)) = sub.tx.try_send(event.clone()) {
                dropped_ids.push(sub.id);
            }
        }

        if !dropped_ids.is_empty() {
            if let Some(mut live) = self.topics.get_mut(&session_id) {
                for id in &dropped_ids {
                    if let Some(pos) = live.iter().position(|s| s.id == *id) {
                        let sub = live.remove(pos);
                        let _ = sub.tx.try_send(Arc::new(SessionEvent::SubscriptionDropped));
                    }
                }
            }
        }
    }

    pub fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.topics.get(session_id).map(|e| e.len()).unwrap_or(0)
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joined(name: &str) -> SessionEvent {
        SessionEvent::ParticipantJoined {
            user_id: crate::id::UserId::from(name),
            display_name: name.to_string(),
            avatar_color: "#000000".to_string(),
        }
    }

    #[tokio::test]
    async fn publish_to_empty_topic_is_noop() {
        let bus = Bus::new();
        bus.publish(SessionId::new(), joined("a"));
    }

    #[tokio::test]
    async fn subscribers_see_events_in_publish_order() {
        let bus = Bus::new();
        let session_id = SessionId::new();
        let (_h1, mut rx1) = bus.subscribe(session_id);
        let (_h2, mut rx2) = bus.subscribe(session_id);

        bus.publish(session_id, joined("a"));
        bus.publish(session_id, joined("b"));

        for rx in [&mut rx1, &mut rx2] {
            let first = rx.recv().await.unwrap();
            let second = rx.recv().await.unwrap();
            assert!(matches!(*first, SessionEvent::ParticipantJoined { ref display_name, .. } if display_name == "a"));
            assert!(matches!(*second, SessionEvent::ParticipantJoined { ref display_name, .. } if display_name == "b"));
        }
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = Bus::new();
        let session_id = SessionId::new();
        let (handle, mut rx) = bus.subscribe(session_id);

        bus.unsubscribe(&handle);
        bus.publish(session_id, joined("a"));

        assert_eq!(bus.subscriber_count(&session_id), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn slow_subscriber_is_evicted_and_sentinel_delivered() {
        let bus = Bus::with_buffer_capacity(1);
        let session_id = SessionId::new();
        let (_handle, mut rx) = bus.subscribe(session_id);

        // Fill the one-slot buffer, then overflow it.
        bus.publish(session_id, joined("a"));
        bus.publish(session_id, joined("b"));

        assert_eq!(bus.subscriber_count(&session_id), 0);

        let first = rx.recv().await.unwrap();
        assert!(matches!(*first, SessionEvent::ParticipantJoined { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(*second, SessionEvent::SubscriptionDropped));
    }
}
