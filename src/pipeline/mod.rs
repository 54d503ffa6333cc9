//! Request pipeline.
//!
//! # Data Flow
//! ```text
//! GatewayRequest
//!     → CorrelationInterceptor (assign / echo X-Correlation-Id)
//!     → DeadlineInterceptor    (per-request deadline, cancellation token)
//!     → RateLimitInterceptor   (ip + identity quotas, 429 short-circuit)
//!     → RoutingInterceptor     (service lookup, new vs legacy decision)
//!     → ForwardEndpoint        (resilience chain + dual write)
//! GatewayResponse ← headers stamped on the way back out
//! ```
//!
//! The pipeline owns its request/response types so it can run under any
//! HTTP host; `http::server` adapts Axum to it.

pub mod chain;
pub mod correlation;
pub mod deadline;
pub mod forward;
pub mod gateway;

use std::net::IpAddr;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use tokio_util::sync::CancellationToken;

use crate::error::GatewayError;
use crate::routing::RoutingDecision;

pub use chain::{Endpoint, Interceptor, Next, Pipeline};
pub use correlation::{CorrelationId, CorrelationInterceptor};
pub use deadline::DeadlineInterceptor;
pub use forward::ForwardEndpoint;
pub use gateway::{Gateway, GatewayDeps};

pub const X_CORRELATION_ID: HeaderName = HeaderName::from_static("x-correlation-id");
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const X_ROUTED_TO: HeaderName = HeaderName::from_static("x-routed-to");
pub const X_TRAFFIC_PERCENTAGE: HeaderName = HeaderName::from_static("x-traffic-percentage");
pub const IDEMPOTENCY_KEY: HeaderName = HeaderName::from_static("idempotency-key");

/// Per-request state accumulated by interceptors.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub correlation_id: Option<CorrelationId>,
    /// The id as sent by the client; `None` when it was absent or malformed
    /// and `correlation_id` was minted here.
    pub client_correlation_id: Option<CorrelationId>,
    /// Hashed identity key derived from the bearer credential.
    pub identity: Option<String>,
    pub routing: Option<RoutingDecision>,
    /// Cancelled when the client goes away or the deadline elapses.
    pub cancel: CancellationToken,
}

/// A buffered inbound request.
#[derive(Debug, Clone)]
pub struct GatewayRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub client_ip: Option<IpAddr>,
    pub context: RequestContext,
}

impl GatewayRequest {
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            client_ip: None,
            context: RequestContext::default(),
        }
    }

    pub fn with_header(mut self, name: impl Into<HeaderName>, value: HeaderValue) -> Self {
        self.headers.insert(name.into(), value);
        self
    }

    pub fn with_client_ip(mut self, ip: IpAddr) -> Self {
        self.client_ip = Some(ip);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

/// A buffered response returned to the host.
#[derive(Debug, Clone)]
pub struct GatewayResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl GatewayResponse {
    pub fn new(status: StatusCode) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    /// Insert a header, skipping values that are not valid header text.
    pub fn set_header(&mut self, name: HeaderName, value: impl ToString) {
        if let Ok(v) = HeaderValue::from_str(&value.to_string()) {
            self.headers.insert(name, v);
        }
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

impl From<GatewayError> for GatewayResponse {
    fn from(err: GatewayError) -> Self {
        let mut response = GatewayResponse::new(err.status());
        response.body = Bytes::from(err.to_string());
        if let GatewayError::RateLimited { retry_after, .. } = &err {
            response.set_header(http::header::RETRY_AFTER, retry_after_secs(*retry_after));
        }
        response
    }
}

/// Whole seconds for a `Retry-After` header, rounded up, never zero.
pub fn retry_after_secs(d: std::time::Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_retry_after_rounds_up() {
        assert_eq!(retry_after_secs(Duration::from_millis(1)), 1);
        assert_eq!(retry_after_secs(Duration::from_millis(1500)), 2);
        assert_eq!(retry_after_secs(Duration::from_secs(60)), 60);
        assert_eq!(retry_after_secs(Duration::ZERO), 1);
    }

    #[test]
    fn test_rate_limited_error_response() {
        let response = GatewayResponse::from(GatewayError::RateLimited {
            scope: "ip",
            retry_after: Duration::from_millis(12_300),
        });
        assert_eq!(response.status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.header_str("retry-after"), Some("13"));
    }
}
