//! # parley-server
//!
//! Realtime chat backend.
//!
//! This binary provides:
//! - **REST API** (axum) for sign-up, login, user listing, conversation
//!   history and sending direct messages
//! - **WebSocket gateway** that authenticates live connections with the
//!   same session token the REST API hands out
//! - **Presence**: every connect and disconnect pushes the set of online
//!   users to everybody connected
//! - **Delivery**: a sent message is stored first, then pushed to the
//!   receiver's live connections if they have any

mod api;
mod auth;
mod config;
mod delivery;
mod error;
mod gateway;
mod persistence;
mod presence;
mod sessions;

use tracing::info;
use tracing_subscriber::EnvFilter;

use parley_store::Database;

use crate::api::AppState;
use crate::config::ServerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parley_server=debug")),
        )
        .init();

    info!("Starting Parley server v{}", env!("CARGO_PKG_VERSION"));

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(?config, "Loaded configuration");

    // -----------------------------------------------------------------------
    // 3. Open storage and wire services
    // -----------------------------------------------------------------------
    let database = Database::open_at(&config.database_path)?;
    let http_addr = config.http_addr;
    let app_state = AppState::new(config, database);

    // -----------------------------------------------------------------------
    // 4. Run the HTTP API + WebSocket gateway (blocks until shutdown)
    // -----------------------------------------------------------------------
    tokio::select! {
        result = api::serve(app_state, http_addr) => {
            if let Err(e) = result {
                tracing::error!(error = %e, "HTTP server failed");
                return Err(e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down");
        }
    }

    Ok(())
}
