//! Correlation id assignment and propagation.
//!
//! # Responsibilities
//! - Accept a well-formed inbound `X-Correlation-Id`, otherwise mint a UUID v4
//! - Make the id available to every later stage
//! - Keep the client-supplied id apart from a minted one; routing only hashes
//!   ids the client will send again
//! - Echo the id on every response, including rejections
//!
//! # Design Decisions
//! - Malformed ids are ignored rather than rejected
//! - Ids are limited to 128 visible characters from a conservative set

use std::fmt;

use async_trait::async_trait;
use http::HeaderMap;
use tracing::Instrument;
use uuid::Uuid;

use crate::pipeline::{GatewayRequest, GatewayResponse, Interceptor, Next, X_CORRELATION_ID};

const MAX_LEN: usize = 128;

/// Opaque per-request identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CorrelationId(String);

impl CorrelationId {
    /// Mint a fresh random id.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Accept `raw` if it is a well-formed id.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let valid = !raw.is_empty()
            && raw.len() <= MAX_LEN
            && raw
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b':'));
        valid.then(|| Self(raw.to_string()))
    }

    /// The id carried by `headers`, if present and well formed.
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        headers
            .get(&X_CORRELATION_ID)
            .and_then(|v| v.to_str().ok())
            .and_then(Self::parse)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Outermost interceptor: establishes the correlation id and request span.
#[derive(Debug, Default)]
pub struct CorrelationInterceptor;

#[async_trait]
impl Interceptor for CorrelationInterceptor {
    async fn intercept(&self, mut request: GatewayRequest, next: Next<'_>) -> GatewayResponse {
        let inbound = CorrelationId::from_headers(&request.headers);
        let id = match &inbound {
            Some(id) => id.clone(),
            None => {
                if request.headers.contains_key(&X_CORRELATION_ID) {
                    tracing::debug!("Ignoring malformed X-Correlation-Id");
                }
                CorrelationId::generate()
            }
        };

        if let Ok(value) = id.as_str().parse() {
            request.headers.insert(X_CORRELATION_ID, value);
        }
        request.context.correlation_id = Some(id.clone());
        request.context.client_correlation_id = inbound;

        let span = tracing::info_span!(
            "request",
            correlation_id = %id,
            method = %request.method,
            path = %request.uri.path(),
        );
        let mut response = next.run(request).instrument(span).await;
        response.set_header(X_CORRELATION_ID, &id);
        response
    }
}
