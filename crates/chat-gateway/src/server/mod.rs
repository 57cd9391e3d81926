//! Gateway server setup
//!
//! Provides the main WebSocket server configuration and routes.

mod handler;
mod state;

pub use handler::gateway_handler;
pub use state::GatewayState;

use crate::handlers::TypingHandler;
use crate::store::MemoryStore;
use axum::{routing::get, Router};
use chat_common::{AppConfig, AppError};
use chat_core::{ChannelSpec, Conversation, Snowflake, SnowflakeGenerator};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tower_http::trace::TraceLayer;

/// Name of the public channel every gateway starts with
pub const DEFAULT_CHANNEL: &str = "general";

/// How often expired typing indicators are swept
const TYPING_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// Create the gateway router
pub fn create_router() -> Router<GatewayState> {
    Router::new()
        .route("/gateway", get(gateway_handler))
        .route("/health", get(health_check))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

/// Build the complete application
pub fn create_app(state: GatewayState) -> Router {
    create_router()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Create `GatewayState` over a fresh in-memory store
///
/// The store is seeded with the public default channel.
pub fn create_gateway_state(config: AppConfig) -> GatewayState {
    let ids = SnowflakeGenerator::new(config.snowflake.worker_id);
    let general = Conversation::channel(ids.generate(), ChannelSpec::public(DEFAULT_CHANNEL), Snowflake::default());

    tracing::debug!(conversation_id = %general.id, name = DEFAULT_CHANNEL, "Seeded default channel");

    let store = MemoryStore::with_conversations([general]);
    GatewayState::new(config, Arc::new(store), ids)
}

/// Periodically expire typing indicators whose TTL ran out
pub fn spawn_typing_sweeper(state: GatewayState) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(TYPING_SWEEP_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            TypingHandler::sweep(&state).await;
        }
    })
}

/// Serve the gateway on an already bound listener
///
/// Runs until the listener fails; the typing sweeper lives as long as the server.
pub async fn serve(listener: TcpListener, state: GatewayState) -> Result<(), AppError> {
    let addr = listener.local_addr().map_err(AppError::internal)?;
    let sweeper = spawn_typing_sweeper(state.clone());

    tracing::info!(url = %local_url(addr), "Gateway listening");

    let result = axum::serve(listener, create_app(state)).await;
    sweeper.abort();
    result.map_err(AppError::internal)
}

/// Run the complete gateway server with configuration
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    let addr = config.gateway.address();
    tracing::info!("Starting Gateway server on {}", addr);

    let listener = TcpListener::bind(&addr).await.map_err(AppError::internal)?;
    let state = create_gateway_state(config);

    serve(listener, state).await
}

/// Address the gateway is reachable on, for logs and tests
pub fn local_url(addr: SocketAddr) -> String {
    format!("ws://{addr}/gateway")
}
