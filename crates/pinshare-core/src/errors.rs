//! Typed error kinds for every component boundary, plus the top-level
//! report type used by `main`.
//!
//! Each component gets its own `thiserror` enum rather than one shared
//! catch-all, so callers can match on the specific kind the spec names
//! (`session_full`, `duplicate_name`, ...) instead of string-sniffing.

pub use color_eyre::Report;

#[derive(Debug, thiserror::Error)]
pub enum LogError {
    #[error("failed to install color_eyre")]
    ColorEyre(#[from] color_eyre::Report),
    #[error("failed to install tracing-subscriber")]
    TracingSubscriber(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors returned by commands sent to a [`crate::actor::ActorHandle`].
#[derive(Debug, Clone, thiserror::Error, PartialEq)]
pub enum SessionError {
    #[error("session is full")]
    SessionFull,
    #[error("display name already taken")]
    DuplicateName,
    #[error("user id already active in this session")]
    DuplicateUser,
    #[error("participant not found")]
    ParticipantNotFound,
    #[error("session actor is overloaded")]
    Overloaded,
    #[error("command timed out")]
    Timeout,
    #[error("session has ended: {0:?}")]
    SessionEnded(crate::data::SessionEndedReason),
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("internal actor error: {0}")]
    Internal(String),
}

/// Errors returned by [`crate::registry::Registry`] operations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a session is already registered under this id")]
    AlreadyRegistered,
}

/// Errors returned by [`crate::store::StoreGateway`] implementations.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found")]
    NotFound,
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("session is full")]
    Capacity,
    #[error("transient store error: {0}")]
    Transient(String),
}

/// Errors returned by [`crate::supervisor::Supervisor::get_or_start`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum SupervisorError {
    #[error("session not found")]
    SessionNotFound,
    #[error("session has ended")]
    SessionEnded,
    #[error(transparent)]
    Store(#[from] StoreError),
}
