//! Shared application state handed to every axum handler, grounded in the
//! teacher's `AppState` (`main.rs`) but generalized from a single
//! in-memory session map to the full core (registry, bus, supervisor,
//! store gateway, token validator).

use std::sync::Arc;

use chrono::{DateTime, Utc};

use pinshare_core::bus::Bus;
use pinshare_core::config::Config;
use pinshare_core::registry::Registry;
use pinshare_core::store::StoreGateway;
use pinshare_core::supervisor::Supervisor;

use crate::auth::HmacTokenValidator;

pub struct AppState {
    pub started_at: DateTime<Utc>,
    pub config: Arc<Config>,
    pub registry: Arc<Registry>,
    pub bus: Arc<Bus>,
    pub supervisor: Supervisor,
    pub store: Arc<dyn StoreGateway>,
    pub token_validator: HmacTokenValidator,
    /// Base URL used to build `join_link` in session-creation responses,
    /// e.g. `http://localhost:3030`.
    pub public_base_url: String,
    /// Base URL used to build `websocket_url` in join responses, e.g.
    /// `ws://localhost:3030`.
    pub public_ws_base_url: String,
}
