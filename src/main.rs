//! Migration gateway (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!     Client ──▶ http::server ──▶ pipeline
//!                                  │ correlation → deadline → rate limit → routing
//!                                  ▼
//!                            dual_write::coordinator
//!                                  │ primary (awaited)        mirror (supervised)
//!                                  ▼                          ▼
//!                            resilience chain ──▶ transport ──▶ new / legacy backend
//!
//!     Cross-cutting: config (live reload), observability (tracing, metrics),
//!                    lifecycle (signals, graceful shutdown), admin API
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use migration_gateway::config::loader::load_config;
use migration_gateway::config::watcher::ConfigWatcher;
use migration_gateway::config::{ConfigSource, GatewayConfig, LiveConfig};
use migration_gateway::lifecycle::{spawn_signal_handler, startup, Shutdown};
use migration_gateway::observability::{logging, metrics};
use migration_gateway::HttpServer;

/// Extra time given to mirrors beyond their own timeout during shutdown.
const MIRROR_DRAIN_SLACK: Duration = Duration::from_secs(1);

#[derive(Parser)]
#[command(name = "migration-gateway", version, about = "Traffic gateway for backend migrations")]
struct Args {
    /// Path to the TOML configuration file; defaults are used when omitted.
    #[arg(short, long, env = "GATEWAY_CONFIG")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => GatewayConfig::default(),
    };

    logging::init_logging(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "migration-gateway starting");
    tracing::info!(
        bind_address = %config.listener.bind_address,
        services = config.services.len(),
        rate_limit_store = ?config.rate_limit.store,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    // Hot reload. The watcher handle must stay alive for the life of the process.
    let (watcher, updates_rx) = match &args.config {
        Some(path) => {
            let (watcher, rx) = ConfigWatcher::new(path);
            (Some(watcher), rx)
        }
        None => {
            let (_tx, rx) = mpsc::unbounded_channel();
            (None, rx)
        }
    };
    let _watch_guard = watcher.and_then(|w| match w.run() {
        Ok(handle) => Some(handle),
        Err(e) => {
            tracing::warn!(error = %e, "Config watcher unavailable, hot reload disabled");
            None
        }
    });

    let store = startup::build_counter_store(&config.rate_limit).await;
    let live = Arc::new(LiveConfig::new(config.clone()));
    let gateway = startup::build_gateway(live.clone(), store);

    let shutdown = Shutdown::new();
    spawn_signal_handler(&shutdown);

    let admin = if config.admin.enabled {
        Some(startup::start_admin(&config.admin, gateway.clone(), shutdown.subscribe()).await?)
    } else {
        None
    };

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    HttpServer::new(gateway.clone(), live.clone())
        .run(listener, updates_rx, shutdown.subscribe())
        .await?;

    if let Some(admin) = admin {
        let _ = admin.await;
    }

    let grace = live.snapshot().timeouts.mirror() + MIRROR_DRAIN_SLACK;
    if !gateway.supervisor().drain(grace).await {
        tracing::warn!("Some mirrored writes were cancelled at shutdown");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
