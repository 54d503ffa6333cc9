//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create the Axum router (liveness endpoint + catch-all gateway handler)
//! - Buffer inbound bodies up to `security.max_body_size`
//! - Convert between Axum and pipeline request/response types
//! - Apply hot-reloaded configuration
//! - Record request metrics
//! - Stop on the shutdown broadcast

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    body::Body,
    extract::{ConnectInfo, State},
    http::{Request, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};

use crate::config::{ConfigSource, GatewayConfig, LiveConfig};
use crate::observability::metrics;
use crate::pipeline::{Gateway, GatewayRequest, GatewayResponse};

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
}

/// HTTP host for the gateway pipeline.
pub struct HttpServer {
    gateway: Arc<Gateway>,
    live: Arc<LiveConfig>,
}

impl HttpServer {
    pub fn new(gateway: Arc<Gateway>, live: Arc<LiveConfig>) -> Self {
        Self { gateway, live }
    }

    /// Build the Axum router with all middleware layers.
    pub fn router(&self) -> Router {
        let max_body = self.live.snapshot().security.max_body_size;
        Router::new()
            .route("/healthz", get(healthz))
            .fallback(gateway_handler)
            .with_state(AppState {
                gateway: self.gateway.clone(),
            })
            .layer(RequestBodyLimitLayer::new(max_body))
            .layer(TraceLayer::new_for_http())
    }

    /// Serve until the shutdown broadcast fires.
    ///
    /// Configurations received on `config_updates` are swapped in as they
    /// arrive; they have already been validated by the watcher.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let live = self.live.clone();
        tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                tracing::info!(services = config.services.len(), "Applying reloaded configuration");
                live.replace(config);
            }
        });

        let app = self
            .router()
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Catch-all handler: everything except `/healthz` enters the pipeline.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let start = Instant::now();
    let (parts, body) = request.into_parts();
    let method = parts.method.to_string();
    let max_body = state.gateway.config().snapshot().security.max_body_size;

    let body = match axum::body::to_bytes(body, max_body).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(error = %e, "Rejecting request body");
            metrics::record_request(&method, 413, "none", start);
            return (StatusCode::PAYLOAD_TOO_LARGE, "Request body too large").into_response();
        }
    };

    let mut request = GatewayRequest::new(parts.method, parts.uri)
        .with_client_ip(addr.ip())
        .with_body(body);
    request.headers = parts.headers;

    let response = state.gateway.handle(request).await;
    let routed_to = response.header_str("x-routed-to").unwrap_or("none");
    metrics::record_request(&method, response.status.as_u16(), routed_to, start);

    into_response(response)
}

fn into_response(response: GatewayResponse) -> Response {
    let mut out = Response::new(Body::from(response.body));
    *out.status_mut() = response.status;
    *out.headers_mut() = response.headers;
    out
}
