//! Primary dispatch plus optional mirrored write.

use std::sync::Arc;
use std::time::Duration;

use http::{HeaderName, HeaderValue};
use tokio::sync::oneshot;
use url::Url;

use crate::config::{ConfigSource, ServiceConfig};
use crate::dual_write::supervisor::MirrorSupervisor;
use crate::dual_write::{is_write_method, DualWriteOutcome};
use crate::error::GatewayError;
use crate::observability::{TelemetryEvent, TelemetrySink};
use crate::pipeline::GatewayRequest;
use crate::resilience::retries::is_retry_eligible;
use crate::resilience::{Attempts, ResiliencePolicyChain};
use crate::routing::{destination_id, Generation};
use crate::transport::client::strip_hop_by_hop;
use crate::transport::{OutboundRequest, UpstreamResponse};

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Result of [`DualWriteCoordinator::execute`].
#[derive(Debug)]
pub struct DualWriteExecution {
    /// Generation that actually served the primary.
    pub served: Generation,
    pub result: Result<UpstreamResponse, GatewayError>,
    /// Primary fields are final; mirror fields are filled in by `mirror`.
    pub outcome: DualWriteOutcome,
    /// Resolves when the mirror finishes; `None` when no mirror was sent.
    pub mirror: Option<oneshot::Receiver<DualWriteOutcome>>,
}

/// Sends the primary through the resilience chain and, for mutating requests
/// on dual-write services, mirrors it to the other generation.
pub struct DualWriteCoordinator {
    chain: Arc<ResiliencePolicyChain>,
    supervisor: Arc<MirrorSupervisor>,
    config: Arc<dyn ConfigSource>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl DualWriteCoordinator {
    pub fn new(
        chain: Arc<ResiliencePolicyChain>,
        supervisor: Arc<MirrorSupervisor>,
        config: Arc<dyn ConfigSource>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            chain,
            supervisor,
            config,
            telemetry,
        }
    }

    pub fn supervisor(&self) -> &Arc<MirrorSupervisor> {
        &self.supervisor
    }

    /// Write to the new generation, mirroring to legacy when enabled.
    pub async fn execute(
        &self,
        service: &ServiceConfig,
        request: &GatewayRequest,
    ) -> DualWriteExecution {
        self.execute_with_primary(service, request, Generation::New)
            .await
    }

    /// Write to `primary`, mirroring to the other generation when enabled.
    ///
    /// A legacy primary without a configured legacy URL falls back to new.
    pub async fn execute_with_primary(
        &self,
        service: &ServiceConfig,
        request: &GatewayRequest,
        primary: Generation,
    ) -> DualWriteExecution {
        let config = self.config.snapshot();
        let timeout = config.timeouts.upstream();

        let (served, base) = match service.base_url(primary) {
            Some(base) => (primary, base),
            None => {
                self.telemetry.emit(TelemetryEvent::RoutingFallback {
                    service: service.name.clone(),
                });
                (Generation::New, &service.new_base_url)
            }
        };

        let attempts = if is_retry_eligible(&request.method, &request.headers, &config.retries) {
            Attempts::Policy
        } else {
            Attempts::Single
        };

        let destination = destination_id(&service.name, served);
        let result = match outbound(base, request, timeout) {
            Ok(outbound) => {
                self.chain
                    .execute(&destination, outbound, attempts, &request.context.cancel)
                    .await
            }
            Err(e) => Err(e),
        };

        let outcome = DualWriteOutcome {
            service: service.name.clone(),
            primary: served,
            primary_written: matches!(&result, Ok(r) if r.status.is_success()),
            primary_status: result.as_ref().ok().map(|r| r.status.as_u16()),
            mirror_written: false,
            mirror_status: None,
        };

        let mirror = if service.dual_write && is_write_method(&request.method) {
            // The transport gives up inside the mirror cap, so a hung target is
            // settled as a breaker failure instead of being dropped mid-attempt.
            let mirror_timeout = timeout.min(config.timeouts.mirror());
            self.mirror(service, request, served.other(), mirror_timeout, outcome.clone())
        } else {
            None
        };

        DualWriteExecution {
            served,
            result,
            outcome,
            mirror,
        }
    }

    fn mirror(
        &self,
        service: &ServiceConfig,
        request: &GatewayRequest,
        target: Generation,
        timeout: Duration,
        outcome: DualWriteOutcome,
    ) -> Option<oneshot::Receiver<DualWriteOutcome>> {
        let Some(base) = service.base_url(target) else {
            tracing::warn!(
                service = %service.name,
                target = %target,
                "Dual write enabled but no endpoint for mirror target, skipping"
            );
            return None;
        };
        let outbound = match outbound(base, request, timeout) {
            Ok(outbound) => outbound,
            Err(e) => {
                tracing::warn!(service = %service.name, error = %e, "Cannot build mirrored request");
                return None;
            }
        };

        let destination = destination_id(&service.name, target);
        let chain = self.chain.clone();
        let dest = destination.clone();
        Some(self.supervisor.spawn(destination, outcome, move |cancel| async move {
            chain
                .execute(&dest, outbound, Attempts::Single, &cancel)
                .await
        }))
    }
}

/// Resolve `request` against a generation's base URL.
///
/// The base path is kept as a prefix; the inbound path and query follow it.
pub fn outbound(
    base: &Url,
    request: &GatewayRequest,
    timeout: Duration,
) -> Result<OutboundRequest, GatewayError> {
    let mut url = base.clone();
    let path = format!("{}{}", base.path().trim_end_matches('/'), request.uri.path());
    url.set_path(&path);
    url.set_query(request.uri.query());

    let mut headers = request.headers.clone();
    strip_hop_by_hop(&mut headers);
    if let Some(ip) = request.client_ip {
        let forwarded = match headers.get(&X_FORWARDED_FOR).and_then(|v| v.to_str().ok()) {
            Some(prior) => format!("{prior}, {ip}"),
            None => ip.to_string(),
        };
        let value = HeaderValue::from_str(&forwarded)
            .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
        headers.insert(X_FORWARDED_FOR, value);
    }

    Ok(OutboundRequest {
        method: request.method.clone(),
        url,
        headers,
        body: request.body.clone(),
        timeout,
    })
}
