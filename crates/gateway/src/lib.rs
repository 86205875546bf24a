//! HTTP gateway for Matilda.
//!
//! Serves the chat API under `/api` plus a `/health` probe. Each client
//! session gets its own [`Assistant`](matilda_assistant::Assistant) from the
//! injected [`SessionStore`].
//!
//! Built on Axum for high performance async HTTP.

pub mod api;
pub mod sessions;

pub use sessions::{AssistantFactory, SessionStore};

use axum::extract::DefaultBodyLimit;
use axum::{Router, http::Method, http::header, response::Json, routing::get};
use matilda_assistant::{Assistant, AssistantSettings};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// How often idle sessions are swept while serving.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state for the gateway.
pub struct GatewayState {
    pub sessions: SessionStore,
}

pub type SharedState = Arc<GatewayState>;

/// Build the Axum router with all gateway routes.
pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/health", get(health_handler))
        .nest("/api", api::api_router(state))
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

/// Session store wired from configuration: shared providers, one assistant
/// (with its own conversation log) per session.
pub fn sessions_from_config(config: &matilda_config::AppConfig) -> SessionStore {
    let adapter = Arc::new(matilda_providers::build_from_config(config));
    let settings = AssistantSettings::from_config(config);
    let logging = config.logging.clone();

    let factory: AssistantFactory = Arc::new(move || {
        let observer =
            matilda_journal::from_settings(logging.log_conversations, logging.log_dir.clone());
        Assistant::with_observer(settings.clone(), adapter.clone(), observer)
    });

    SessionStore::new(
        factory,
        Duration::from_secs(config.gateway.session_idle_secs),
        config.gateway.max_sessions,
    )
}

/// Start the gateway HTTP server and run until Ctrl+C.
pub async fn start(config: matilda_config::AppConfig) -> matilda_core::Result<()> {
    let addr = format!("{}:{}", config.gateway.host, config.gateway.port);
    let state = Arc::new(GatewayState {
        sessions: sessions_from_config(&config),
    });

    let listener = tokio::net::TcpListener::bind(&addr).await?;

    let sweeper = {
        let state = state.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                ticker.tick().await;
                state.sessions.evict_idle();
            }
        })
    };

    let app = build_router(state);
    info!(addr = %addr, "Gateway starting");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    sweeper.abort();
    Ok(())
}

// --- Handlers ---

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
