//! # parlor-server
//!
//! Real-time chat server for a single shared chat surface.
//!
//! This binary provides:
//! - **Presence** tracking of which users are connected
//! - **Routing** of each message to everyone (broadcast) or to one named
//!   recipient (direct), over a WebSocket transport
//! - **History** bounded per conversation and queryable over HTTP
//! - **File uploads** stored on disk and referenced from chat messages

mod api;
mod config;
mod delivery;
mod error;
mod file_store;
mod history;
mod presence;
mod router;
mod ws;

use std::sync::Arc;

use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::delivery::Hub;
use crate::file_store::FileStore;
use crate::history::ChatHistory;
use crate::presence::PresenceRegistry;
use crate::router::Router;
use crate::ws::JoinedSessions;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // -----------------------------------------------------------------------
    // 1. Initialize tracing (respects RUST_LOG env var)
    // -----------------------------------------------------------------------
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,parlor_server=debug")),
        )
        .init();

    info!(
        "Starting {} server v{}",
        parlor_shared::constants::APP_NAME,
        env!("CARGO_PKG_VERSION")
    );

    // -----------------------------------------------------------------------
    // 2. Load configuration
    // -----------------------------------------------------------------------
    let config = ServerConfig::from_env();
    info!(
        http_addr = %config.http_addr,
        upload_dir = %config.upload_dir.display(),
        history_limit = config.history_limit,
        echo_policy = ?config.echo_policy,
        admin_enabled = config.admin_token.is_some(),
        "Loaded configuration"
    );

    // -----------------------------------------------------------------------
    // 3. Initialize subsystems
    // -----------------------------------------------------------------------

    // Upload storage (creates directory if missing)
    let files =
        Arc::new(FileStore::new(config.upload_dir.clone(), config.max_upload_size).await?);

    let presence = Arc::new(PresenceRegistry::new());
    let history = Arc::new(ChatHistory::new(config.history_limit));
    let hub = Arc::new(Hub::default());

    let router = Arc::new(Router::new(
        presence,
        history,
        hub.clone(),
        config.echo_policy,
    ));

    let http_addr = config.http_addr;
    let app_state = AppState {
        router,
        hub,
        sessions: Arc::new(JoinedSessions::default()),
        files,
        config: Arc::new(config),
    };

    // -----------------------------------------------------------------------
    // 4. Run the HTTP + WebSocket server (blocks until shutdown)
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
