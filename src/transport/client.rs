//! Hyper-based upstream client.

use async_trait::async_trait;
use axum::body::Body;
use http::header::{self, HeaderName};
use http::{HeaderMap, Request};
use hyper_util::{
    client::legacy::{connect::HttpConnector, Client},
    rt::TokioExecutor,
};

use crate::transport::{OutboundRequest, Transport, TransportError, UpstreamResponse};

/// Upper bound on a buffered upstream response body.
const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// Connection-level headers that must not be forwarded.
const HOP_BY_HOP: [HeaderName; 7] = [
    header::CONNECTION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
    header::PROXY_AUTHORIZATION,
    header::HOST,
];

/// Pooled HTTP/1.1 client shared by primary and mirrored dispatch.
#[derive(Clone)]
pub struct HyperTransport {
    client: Client<HttpConnector, Body>,
}

impl HyperTransport {
    pub fn new() -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self { client }
    }
}

impl Default for HyperTransport {
    fn default() -> Self {
        Self::new()
    }
}

/// Remove hop-by-hop headers (and `keep-alive`) before forwarding.
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP.iter() {
        headers.remove(name);
    }
    headers.remove("keep-alive");
    headers.remove(header::CONTENT_LENGTH);
}

#[async_trait]
impl Transport for HyperTransport {
    async fn send(&self, request: OutboundRequest) -> Result<UpstreamResponse, TransportError> {
        let OutboundRequest {
            method,
            url,
            mut headers,
            body,
            timeout,
        } = request;

        strip_hop_by_hop(&mut headers);

        let mut builder = Request::builder().method(method).uri(url.as_str());
        if let Some(h) = builder.headers_mut() {
            h.extend(headers);
        }
        let req = builder
            .body(Body::from(body))
            .map_err(|e| TransportError::Request(e.to_string()))?;

        let exchange = async {
            let response = self.client.request(req).await.map_err(|e| {
                if e.is_connect() {
                    TransportError::Connect(e.to_string())
                } else {
                    TransportError::Request(e.to_string())
                }
            })?;

            let (parts, incoming) = response.into_parts();
            let body = axum::body::to_bytes(Body::new(incoming), MAX_RESPONSE_BYTES)
                .await
                .map_err(|e| TransportError::Request(e.to_string()))?;

            let mut headers = parts.headers;
            strip_hop_by_hop(&mut headers);

            Ok(UpstreamResponse {
                status: parts.status,
                headers,
                body,
            })
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(timeout)),
        }
    }
}
