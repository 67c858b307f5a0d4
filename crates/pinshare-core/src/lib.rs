//! Shared library for Pinshare, a real-time location-sharing coordination
//! service.
//!
//! This crate holds everything that is independent of the transport layer:
//! identifiers, the durable data model, the pub/sub bus, the Session Actor
//! and its Supervisor, the session registry, configuration, and the typed
//! error kinds each component boundary returns. `pinshare-server` wires
//! these into an HTTP/WebSocket surface.

pub mod actor;
pub mod bus;
pub mod config;
pub mod data;
pub mod errors;
pub mod id;
pub mod log;
pub mod registry;
pub mod retry;
pub mod store;
pub mod supervisor;
