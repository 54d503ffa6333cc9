//! Terminal endpoint: dispatch to the chosen generation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConfigSource;
use crate::dual_write::DualWriteCoordinator;
use crate::error::GatewayError;
use crate::pipeline::{Endpoint, GatewayRequest, GatewayResponse, X_ROUTED_TO};
use crate::routing::{Generation, ServiceMatcher};
use crate::transport::client::strip_hop_by_hop;

/// Hands the routed request to the dual-write coordinator and converts the
/// primary result into the client response.
pub struct ForwardEndpoint {
    coordinator: Arc<DualWriteCoordinator>,
    config: Arc<dyn ConfigSource>,
}

impl ForwardEndpoint {
    pub fn new(coordinator: Arc<DualWriteCoordinator>, config: Arc<dyn ConfigSource>) -> Self {
        Self {
            coordinator,
            config,
        }
    }
}

#[async_trait]
impl Endpoint for ForwardEndpoint {
    async fn call(&self, request: GatewayRequest) -> GatewayResponse {
        let config = self.config.snapshot();
        let routed = match &request.context.routing {
            Some(decision) => config
                .service(&decision.service)
                .map(|service| (service, decision.generation)),
            None => ServiceMatcher::new(&config)
                .match_path(request.uri.path())
                .map(|service| (service, Generation::New)),
        };
        let Some((service, generation)) = routed else {
            return GatewayError::UnknownService(request.uri.path().to_string()).into();
        };

        let execution = self
            .coordinator
            .execute_with_primary(service, &request, generation)
            .await;

        let mut response = match execution.result {
            Ok(upstream) => {
                let mut headers = upstream.headers;
                strip_hop_by_hop(&mut headers);
                GatewayResponse {
                    status: upstream.status,
                    headers,
                    body: upstream.body,
                }
            }
            Err(e) => {
                tracing::debug!(service = %service.name, kind = e.kind(), "Primary dispatch failed");
                GatewayResponse::from(e)
            }
        };
        response.set_header(X_ROUTED_TO, execution.served);
        response
    }
}
