//! Pinshare backend server.
//!
//! A real-time location-sharing coordination server built with Axum and
//! WebSockets: REST endpoints for session/participant lifecycle, a
//! WebSocket endpoint for live location broadcast, and a background
//! Cleanup Worker reconciling the durable store with live session actors.

pub mod auth;
pub mod cleanup;
pub mod handlers;
pub mod state;
pub mod store_memory;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::{Method, header};
use axum::routing::{delete, get, post};
use axum::Router;
use chrono::Duration as ChronoDuration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_governor::governor::GovernorConfigBuilder;
use tower_governor::GovernorLayer;
use tower_http::cors::CorsLayer;

use pinshare_core::bus::Bus;
use pinshare_core::config::Config;
use pinshare_core::errors::Report;
use pinshare_core::log;
use pinshare_core::registry::Registry;
use pinshare_core::supervisor::Supervisor;

use crate::auth::HmacTokenValidator;
use crate::cleanup::CleanupWorker;
use crate::state::AppState;
use crate::store_memory::InMemoryStore;

#[tokio::main]
async fn main() -> Result<(), Report> {
    log::setup()?;

    let config = Arc::new(Config::from_env());
    let registry = Arc::new(Registry::new());
    let bus = Arc::new(Bus::with_buffer_capacity(config.subscription_buffer));
    let store: Arc<dyn pinshare_core::store::StoreGateway> =
        Arc::new(InMemoryStore::new(config.max_participants_per_session));
    let supervisor = Supervisor::new(registry.clone(), bus.clone(), config.clone(), store.clone());

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| "dev-secret-change-me".to_string());
    let token_validator = HmacTokenValidator::new(jwt_secret.as_bytes(), ChronoDuration::hours(12));

    let app_state = Arc::new(AppState {
        started_at: chrono::Utc::now(),
        config: config.clone(),
        registry: registry.clone(),
        bus: bus.clone(),
        supervisor,
        store: store.clone(),
        token_validator,
        public_base_url: std::env::var("PUBLIC_BASE_URL").unwrap_or_else(|_| "http://localhost:3030".to_string()),
        public_ws_base_url: std::env::var("PUBLIC_WS_BASE_URL").unwrap_or_else(|_| "ws://localhost:3030".to_string()),
    });

    let cleanup = CleanupWorker::new(
        registry,
        store,
        config.cleanup_interval,
        config.inactivity_timeout,
        config.participant_timeout,
    );
    tokio::spawn(cleanup.run());

    let app = setup_routes(app_state);

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1:3030".to_string());
    let listener = TcpListener::bind(&bind_addr).await?;
    log::info!("Starting server on http://{}", listener.local_addr()?);
    log::info!("Press Ctrl+C to stop the server");

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    log::info!("Shutting down server");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::SignalKind;

        signal::unix::signal(SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    log::info!("Signal received, starting graceful shutdown");
}

fn setup_routes(app_state: Arc<AppState>) -> Router {
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(4)
            .burst_size(20)
            .finish()
            .expect("valid governor configuration"),
    );

    Router::new()
        .route("/sessions", post(handlers::session::create))
        .route("/sessions/{session_id}", get(handlers::session::get).delete(handlers::session::end))
        .route("/sessions/{session_id}/join", post(handlers::session::join))
        .route(
            "/sessions/{session_id}/participants",
            get(handlers::session::list_participants),
        )
        .route(
            "/sessions/{session_id}/participants/{user_id}",
            delete(handlers::session::remove_participant),
        )
        .route("/ws", get(handlers::websocket::upgrade))
        .route("/health", get(handlers::health::get))
        .layer(GovernorLayer::new(governor_conf))
        .layer(cors_layer())
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Permissive in development, restricted to configured origins otherwise —
/// same shape as the teacher's `cors_layer`, generalized to read the
/// allow-list from the environment instead of hard-coding dev ports.
fn cors_layer() -> CorsLayer {
    match std::env::var("ALLOWED_ORIGINS") {
        Ok(origins) => {
            let parsed = origins
                .split(',')
                .filter(|o| !o.is_empty())
                .map(|o| o.parse().expect("ALLOWED_ORIGINS entry must be a valid origin"))
                .collect::<Vec<_>>();
            CorsLayer::new()
                .allow_origin(parsed)
                .allow_headers([header::CONTENT_TYPE])
                .allow_methods([Method::GET, Method::POST, Method::DELETE])
        }
        Err(_) => CorsLayer::permissive(),
    }
}
