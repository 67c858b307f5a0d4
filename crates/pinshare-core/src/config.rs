//! Environment-driven configuration, all with defaults.
//!
//! Read directly with `std::env::var`, the same way `kiko::log::setup`
//! reads `RUST_LOG` — no config crate is introduced since nothing else in
//! the workspace reaches for one.

use std::time::Duration;

/// Tunables for a single [`crate::actor::SessionActor`] and the components
/// that call into it.
#[derive(Debug, Clone)]
pub struct Config {
    pub max_participants_per_session: usize,
    pub ttl_location: Duration,
    pub min_update_interval: Duration,
    pub idle_timeout: Duration,
    pub empty_grace: Duration,
    pub cleanup_interval: Duration,
    pub inactivity_timeout: Duration,
    pub participant_timeout: Duration,
    pub mailbox_capacity: usize,
    pub subscription_buffer: usize,

    /// Internal tick for expiry checks / TTL pruning inside the actor.
    /// Not an externally documented env var in the source spec, but named
    /// explicitly as `CLEANUP_TICK` in §4.2 and §8; defaults to 5s.
    pub cleanup_tick: Duration,
    /// Default caller deadline for actor commands (§5).
    pub command_deadline: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            max_participants_per_session: env_usize("MAX_PARTICIPANTS_PER_SESSION", 50),
            ttl_location: Duration::from_secs(env_u64("TTL_LOCATION_SECONDS", 30)),
            min_update_interval: Duration::from_millis(env_u64("MIN_UPDATE_INTERVAL_MS", 500)),
            idle_timeout: Duration::from_secs(env_u64("IDLE_TIMEOUT_SECONDS", 60)),
            empty_grace: Duration::from_secs(env_u64("EMPTY_GRACE_SECONDS", 30)),
            cleanup_interval: Duration::from_secs(60 * env_u64("CLEANUP_INTERVAL_MINUTES", 5)),
            inactivity_timeout: Duration::from_secs(3600 * env_u64("INACTIVITY_TIMEOUT_HOURS", 1)),
            participant_timeout: Duration::from_secs(
                60 * env_u64("PARTICIPANT_TIMEOUT_MINUTES", 30),
            ),
            mailbox_capacity: env_usize("MAILBOX_CAPACITY", 1024),
            subscription_buffer: env_usize("SUBSCRIPTION_BUFFER", 256),
            cleanup_tick: Duration::from_secs(5),
            command_deadline: Duration::from_secs(5),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
