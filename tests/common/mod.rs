//! Shared utilities for integration and load testing.

#![allow(dead_code)]

use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use http::{HeaderValue, Method, StatusCode, Uri};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use migration_gateway::config::{GatewayConfig, LiveConfig, ServiceConfig};
use migration_gateway::observability::RecordingTelemetry;
use migration_gateway::pipeline::{Gateway, GatewayDeps, GatewayRequest};
use migration_gateway::security::{InMemoryCounterStore, ManualClock};
use migration_gateway::transport::{OutboundRequest, Transport, TransportError, UpstreamResponse};

pub const NEW_URL: &str = "http://new.internal";
pub const LEGACY_URL: &str = "http://legacy.internal";

/// Start a programmable mock backend on an ephemeral port.
///
/// `f` receives the request head (request line + headers) and returns the
/// status and body to send.
pub async fn start_programmable_backend<F, Fut>(f: F) -> SocketAddr
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = (u16, String)> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let f = Arc::new(f);

    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut socket, _)) => {
                    let f = f.clone();
                    tokio::spawn(async move {
                        let mut buf = vec![0u8; 16 * 1024];
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        let head = String::from_utf8_lossy(&buf[..n]).to_string();

                        let (status, body) = f(head).await;
                        let reason = StatusCode::from_u16(status)
                            .ok()
                            .and_then(|s| s.canonical_reason())
                            .unwrap_or("Unknown");
                        let response = format!(
                            "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                            status,
                            reason,
                            body.len(),
                            body
                        );
                        let _ = socket.write_all(response.as_bytes()).await;
                        let _ = socket.shutdown().await;
                    });
                }
                Err(_) => break,
            }
        }
    });
    addr
}

/// Start a mock backend that always answers 200 with `body`.
pub async fn start_mock_backend(body: &'static str) -> SocketAddr {
    start_programmable_backend(move |_| async move { (200, body.to_string()) }).await
}

type Responder = dyn Fn(&OutboundRequest, usize) -> Result<UpstreamResponse, TransportError>
    + Send
    + Sync;

/// In-process transport driven by a closure; records every call.
pub struct ScriptedTransport {
    responder: Box<Responder>,
    latency: Option<Duration>,
    calls: Mutex<Vec<OutboundRequest>>,
    count: AtomicUsize,
}

impl ScriptedTransport {
    /// `responder` gets the request and the 0-based index of the call.
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&OutboundRequest, usize) -> Result<UpstreamResponse, TransportError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            responder: Box::new(responder),
            latency: None,
            calls: Mutex::new(Vec::new()),
            count: AtomicUsize::new(0),
        }
    }

    pub fn always(status: StatusCode) -> Self {
        Self::new(move |_, _| Ok(UpstreamResponse::new(status)))
    }

    pub fn failing() -> Self {
        Self::new(|_, _| Err(TransportError::Connect("connection refused".into())))
    }

    /// Delay every response by `latency`, or time out after the request's
    /// own timeout when that is shorter.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<OutboundRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of calls whose URL host is `host`.
    pub fn calls_to(&self, host: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.url.host_str() == Some(host))
            .count()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, TransportError> {
        let index = self.count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(request.clone());
        if let Some(latency) = self.latency {
            // Mirrors HyperTransport: a response slower than the per-attempt
            // timeout is a timeout error.
            if latency > request.timeout {
                tokio::time::sleep(request.timeout).await;
                return Err(TransportError::Timeout(request.timeout));
            }
            tokio::time::sleep(latency).await;
        }
        (self.responder)(&request, index)
    }
}

/// A service with both generations configured.
pub fn service(name: &str, rollout: u8) -> ServiceConfig {
    let mut s = ServiceConfig::new(name, format!("{NEW_URL}/").parse().unwrap());
    s.legacy_base_url = Some(format!("{LEGACY_URL}/").parse().unwrap());
    s.rollout_percentage = rollout;
    s
}

/// Defaults with fast, jitter-free retries.
pub fn config(services: Vec<ServiceConfig>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.services = services;
    config.retries.base_delay_ms = 1;
    config.retries.jitter_ceiling_ms = 0;
    config
}

/// A gateway wired to in-memory collaborators.
pub struct Harness {
    pub gateway: Arc<Gateway>,
    pub live: Arc<LiveConfig>,
    pub transport: Arc<ScriptedTransport>,
    pub telemetry: Arc<RecordingTelemetry>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(config: GatewayConfig, transport: ScriptedTransport) -> Self {
        let live = Arc::new(LiveConfig::new(config));
        let transport = Arc::new(transport);
        let telemetry = Arc::new(RecordingTelemetry::default());
        // Mid-window so a test never straddles a window boundary.
        let clock = Arc::new(ManualClock::new(1_700_000_010_000));

        let deps = GatewayDeps::new(
            live.clone(),
            Arc::new(InMemoryCounterStore::new()),
            transport.clone(),
            telemetry.clone(),
        )
        .with_clock(clock.clone());

        Self {
            gateway: Arc::new(Gateway::new(deps)),
            live,
            transport,
            telemetry,
            clock,
        }
    }
}

pub fn request(method: Method, path: &'static str) -> GatewayRequest {
    GatewayRequest::new(method, Uri::from_static(path)).with_client_ip(client_ip())
}

pub fn with_correlation_id(request: GatewayRequest, cid: &str) -> GatewayRequest {
    request.with_header(
        http::HeaderName::from_static("x-correlation-id"),
        HeaderValue::from_str(cid).unwrap(),
    )
}

pub fn client_ip() -> IpAddr {
    "198.51.100.20".parse().unwrap()
}
