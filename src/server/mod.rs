//! HTTP server for the game UI
//!
//! - POST /forest/command - submit a command (answers 202, narration arrives over SSE)
//! - GET  /forest/chat    - SSE stream of delta chunks for this tab
//! - POST /forest/turn    - run one turn synchronously and return the new context
//! - GET  /api/status     - health check

pub mod handlers;

use axum::{
    Router,
    http::{Method, header},
    routing::{get, post},
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::chat::{CommandBus, CompletionClient};
use crate::config::{ForestConfig, RelayConfig};
use crate::error::Result;

// ============================================================================
// Server State
// ============================================================================

#[derive(Clone)]
pub struct AppState {
    pub bus: Arc<CommandBus>,
    pub completion: Arc<CompletionClient>,
    pub relay: RelayConfig,
    pub keep_alive: Duration,
    pub model: String,
    /// Parent of every connection's cancellation token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(completion: CompletionClient, config: &ForestConfig) -> Self {
        Self {
            bus: CommandBus::new(),
            completion: Arc::new(completion),
            relay: config.relay.clone(),
            keep_alive: config.server.keep_alive,
            model: config.provider.model.clone(),
            shutdown: CancellationToken::new(),
        }
    }
}

// ============================================================================
// Routes
// ============================================================================

/// Create the router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(handlers::status_handler))
        .route("/forest/command", post(handlers::submit_command))
        .route("/forest/chat", get(handlers::command_stream))
        .route("/forest/turn", post(handlers::run_turn))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server until Ctrl-C
pub async fn run(state: AppState, bind_address: &str) -> Result<()> {
    let shutdown = state.shutdown.clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("Server listening on http://{}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolve on Ctrl-C, after cancelling every open relay
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown requested, closing stream connections");
        }
        _ = shutdown.cancelled() => {}
    }
    shutdown.cancel();
}
