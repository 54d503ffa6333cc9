//! Startup orchestration.
//!
//! # Responsibilities
//! - Select the counter store backend
//! - Assemble the gateway from its collaborators
//! - Start the admin listener
//!
//! # Design Decisions
//! - An unreachable Redis at boot degrades to the in-memory store
//! - Bind errors are fatal; the caller exits

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::admin::{setup_admin_router, AdminState};
use crate::config::{AdminConfig, CounterStoreKind, LiveConfig, RateLimitConfig};
use crate::observability::TracingTelemetry;
use crate::pipeline::{Gateway, GatewayDeps};
use crate::security::{CounterStore, InMemoryCounterStore, RedisCounterStore};
use crate::transport::HyperTransport;

/// Build the counter store named by `rate_limit.store`.
pub async fn build_counter_store(config: &RateLimitConfig) -> Arc<dyn CounterStore> {
    match config.store {
        CounterStoreKind::Memory => Arc::new(InMemoryCounterStore::new()),
        CounterStoreKind::Redis => match RedisCounterStore::connect(&config.redis_url).await {
            Ok(store) => {
                tracing::info!(url = %config.redis_url, "Using Redis counter store");
                Arc::new(store)
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "Redis unavailable at startup, using in-memory counters"
                );
                Arc::new(InMemoryCounterStore::new())
            }
        },
    }
}

/// Assemble the production gateway.
pub fn build_gateway(live: Arc<LiveConfig>, store: Arc<dyn CounterStore>) -> Arc<Gateway> {
    Arc::new(Gateway::new(GatewayDeps::new(
        live,
        store,
        Arc::new(HyperTransport::new()),
        Arc::new(TracingTelemetry),
    )))
}

/// Bind and serve the admin API until shutdown.
pub async fn start_admin(
    config: &AdminConfig,
    gateway: Arc<Gateway>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<JoinHandle<()>, std::io::Error> {
    let listener = TcpListener::bind(&config.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Admin API listening");

    let app = setup_admin_router(AdminState::new(gateway));
    Ok(tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
        if let Err(e) = served {
            tracing::error!(error = %e, "Admin API failed");
        }
    }))
}
