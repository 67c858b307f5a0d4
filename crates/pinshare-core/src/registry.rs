//! C1 — Session Registry: a session-id → actor-handle lookup with
//! unique-key registration semantics.
//!
//! The registry holds only a weak reference to each actor (an id plus a
//! cheap-to-clone command-channel handle, per the Design Notes); the actor
//! itself owns its state, and removes its own entry before the last handle
//! is dropped.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use crate::actor::ActorHandle;
use crate::errors::RegistryError;
use crate::id::SessionId;

/// A claim on a not-yet-registered session id, returned by
/// [`Registry::claim`]. Holding one guarantees no other caller can win the
/// race to start an actor for this session until the claim is resolved
/// with [`Claim::commit`] or dropped.
pub struct Claim<'a> {
    registry: &'a Registry,
    session_id: SessionId,
    resolved: bool,
}

impl<'a> Claim<'a> {
    /// Commits the claim, publishing the handle to the registry.
    pub fn commit(mut self, handle: ActorHandle) {
        self.registry.map.insert(self.session_id, handle);
        self.resolved = true;
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.registry.map.remove(&self.session_id);
        }
    }
}

#[derive(Default)]
pub struct Registry {
    map: DashMap<SessionId, ActorHandle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the live actor handle for a session, if one is registered.
    pub fn lookup(&self, session_id: &SessionId) -> Option<ActorHandle> {
        self.map.get(session_id).map(|entry| entry.value().clone())
    }

    /// Registers a new handle for a session id.
    ///
    /// Returns [`RegistryError::AlreadyRegistered`] if a handle is already
    /// present; registration is atomic relative to concurrent lookups.
    pub fn register(&self, session_id: SessionId, handle: ActorHandle) -> Result<(), RegistryError> {
        match self.map.entry(session_id) {
            Entry::Occupied(_) => Err(RegistryError::AlreadyRegistered),
            Entry::Vacant(slot) => {
                slot.insert(handle);
                Ok(())
            }
        }
    }

    /// Atomically reserves a session id slot ahead of spawning the actor
    /// that will occupy it, so that two concurrent `get_or_start` calls
    /// for the same session never both spawn an actor (Supervisor, §4.3).
    ///
    /// Returns `None` if the slot is already occupied (or already
    /// claimed) — the caller should use [`Registry::lookup`] to fetch the
    /// winner's handle instead.
    pub fn claim(&self, session_id: SessionId) -> Option<Claim<'_>> {
        match self.map.entry(session_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(_) => Some(Claim {
                registry: self,
                session_id,
                resolved: false,
            }),
        }
    }

    /// Removes an entry, but only if the stored handle matches the one
    /// supplied — a no-op (never an error) on mismatch, so a late
    /// unregister from a superseded/restarted actor can never evict its
    /// replacement.
    pub fn unregister(&self, session_id: &SessionId, handle: &ActorHandle) {
        self.map.remove_if(session_id, |_, existing| existing.generation == handle.generation);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::Bus;
    use crate::data::SessionRecord;
    use std::sync::Arc;

    fn test_handle(registry: &Arc<Registry>, bus: &Arc<Bus>) -> (SessionId, ActorHandle) {
        let record = SessionRecord::new(None, "creator".into(), chrono::Utc::now() + chrono::Duration::hours(1));
        let id = record.id;
        let config = Arc::new(crate::config::Config::from_env());
        let handle = crate::actor::spawn(record, config, registry.clone(), bus.clone());
        (id, handle)
    }

    #[tokio::test]
    async fn register_then_lookup_returns_handle() {
        let registry = Arc::new(Registry::new());
        let bus = Arc::new(Bus::new());
        let (id, handle) = test_handle(&registry, &bus);

        registry.register(id, handle.clone()).unwrap();
        let found = registry.lookup(&id).unwrap();
        assert_eq!(found.generation, handle.generation);
    }

    #[tokio::test]
    async fn double_register_fails() {
        let registry = Arc::new(Registry::new());
        let bus = Arc::new(Bus::new());
        let (id, handle) = test_handle(&registry, &bus);

        registry.register(id, handle.clone()).unwrap();
        let err = registry.register(id, handle).unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRegistered);
    }

    #[tokio::test]
    async fn claim_blocks_concurrent_claim_until_dropped() {
        let registry = Registry::new();
        let id = SessionId::new();

        let claim = registry.claim(id).unwrap();
        assert!(registry.claim(id).is_none());
        drop(claim);
        assert!(registry.claim(id).is_some());
    }

    #[tokio::test]
    async fn unregister_is_idempotent_and_ignores_mismatched_handle() {
        let registry = Arc::new(Registry::new());
        let bus = Arc::new(Bus::new());
        let (id, handle_a) = test_handle(&registry, &bus);
        let (_, handle_b) = test_handle(&registry, &bus);

        registry.register(id, handle_a.clone()).unwrap();
        // Mismatched handle (different generation): no-op.
        registry.unregister(&id, &handle_b);
        assert!(registry.lookup(&id).is_some());

        registry.unregister(&id, &handle_a);
        assert!(registry.lookup(&id).is_none());
        // Idempotent.
        registry.unregister(&id, &handle_a);
        assert!(registry.lookup(&id).is_none());
    }
}
