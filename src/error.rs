//! Request-path error taxonomy.

use std::time::Duration;

use http::StatusCode;

use crate::transport::TransportError;

/// Failures that can end a request inside the gateway.
///
/// Mirror failures are deliberately absent: they are reported through
/// telemetry and never become the outcome of a client request.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    #[error("rate limit exceeded for {scope} scope, retry after {retry_after:?}")]
    RateLimited {
        scope: &'static str,
        retry_after: Duration,
    },

    #[error("circuit open for {destination}")]
    UpstreamCircuitOpen { destination: String },

    #[error("upstream {destination} failed after {attempts} attempt(s): {source}")]
    UpstreamTransientFailure {
        destination: String,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("no service owns path '{0}'")]
    UnknownService(String),

    #[error("invalid upstream request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// HTTP status surfaced to the client.
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::UpstreamCircuitOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamTransientFailure { source, .. } => match source {
                TransportError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                _ => StatusCode::BAD_GATEWAY,
            },
            GatewayError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            GatewayError::UnknownService(_) => StatusCode::NOT_FOUND,
            GatewayError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Short, stable label for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::RateLimited { .. } => "rate_limited",
            GatewayError::UpstreamCircuitOpen { .. } => "circuit_open",
            GatewayError::UpstreamTransientFailure { .. } => "upstream_failure",
            GatewayError::DeadlineExceeded => "deadline_exceeded",
            GatewayError::UnknownService(_) => "unknown_service",
            GatewayError::InvalidRequest(_) => "invalid_request",
        }
    }
}
