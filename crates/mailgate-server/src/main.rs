//! Mailgate - mailbox gateway entry point

use anyhow::Result;
use mailgate_api::AppState;
use mailgate_common::Config;
use mailgate_core::WatcherHub;
use mailgate_store::{KvAccountRepository, KvClient, MasterKey};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging();

    info!("Starting mailgate...");

    // Load configuration; a missing or malformed master key refuses startup.
    let config = Config::load()?;
    let master = MasterKey::new(config.decode_master_key()?);

    // Key-value store client and account repository
    let kv = Arc::new(KvClient::new(&config.store));
    let accounts = Arc::new(KvAccountRepository::new(kv.clone(), master));

    // Watcher hub
    let hub = WatcherHub::new(
        Duration::from_secs(config.watcher.idle_grace_secs),
        Duration::from_secs(config.watcher.keepalive_secs),
    );

    let state = Arc::new(AppState {
        accounts,
        kv,
        hub: hub.clone(),
        heartbeat: Duration::from_secs(config.watcher.heartbeat_secs),
    });

    // Start API server
    let api_handle = {
        let bind = format!("{}:{}", config.server.bind_address, config.server.port);
        tokio::spawn(async move {
            let app = mailgate_api::create_router(state);
            let listener = tokio::net::TcpListener::bind(&bind)
                .await
                .expect("Failed to bind API server");
            info!("Starting API server on {}", bind);
            if let Err(e) = axum::serve(listener, app).await {
                tracing::error!("API server error: {}", e);
            }
        })
    };

    info!("mailgate started successfully");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received");

    // Cleanup
    api_handle.abort();
    hub.shutdown();

    info!("mailgate shutdown complete");

    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,mailgate=debug"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_level(true))
        .with(filter)
        .init();
}
