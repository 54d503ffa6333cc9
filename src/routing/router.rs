//! Generation selection per request.
//!
//! # Responsibilities
//! - Resolve the owning service for a request path
//! - Pick new vs legacy from force-legacy and the rollout percentage
//! - Attach the decision to the request and stamp it on the response
//!
//! # Design Decisions
//! - Pure function of (service config, routing key); no state between requests
//! - Config snapshot is taken per request so rollout changes apply immediately
//! - Unknown paths are an explicit 404 rather than a silent default

use std::net::IpAddr;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{ConfigSource, ServiceConfig};
use crate::error::GatewayError;
use crate::observability::{TelemetryEvent, TelemetrySink};
use crate::pipeline::{
    GatewayRequest, GatewayResponse, Interceptor, Next, X_ROUTED_TO, X_TRAFFIC_PERCENTAGE,
};
use crate::routing::hashing::bucket;
use crate::routing::matcher::ServiceMatcher;
use crate::routing::{Generation, RoutingDecision};

/// Key hashed into a bucket: the correlation id, else the client IP.
pub fn routing_key(correlation_id: Option<&str>, client_ip: Option<IpAddr>) -> String {
    match (correlation_id, client_ip) {
        (Some(cid), _) => cid.to_string(),
        (None, Some(ip)) => ip.to_string(),
        (None, None) => String::new(),
    }
}

/// Decide the generation for one request to `service`.
pub fn decide(service: &ServiceConfig, routing_key: &str) -> RoutingDecision {
    let bucket = bucket(routing_key);
    let generation = if service.force_legacy {
        Generation::Legacy
    } else if bucket < service.rollout_percentage {
        Generation::New
    } else {
        Generation::Legacy
    };

    RoutingDecision {
        service: service.name.clone(),
        generation,
        rollout_percentage: service.rollout_percentage,
        bucket,
    }
}

/// Routes requests against the live configuration.
#[derive(Clone)]
pub struct TrafficRouter {
    config: Arc<dyn ConfigSource>,
}

impl TrafficRouter {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self { config }
    }

    /// Decide the generation for `service` given the request's correlation id.
    pub fn decide(
        &self,
        service: &str,
        correlation_id: Option<&str>,
        client_ip: Option<IpAddr>,
    ) -> Result<RoutingDecision, GatewayError> {
        let config = self.config.snapshot();
        let service = config
            .service(service)
            .ok_or_else(|| GatewayError::UnknownService(service.to_string()))?;
        Ok(decide(service, &routing_key(correlation_id, client_ip)))
    }

    /// Resolve the service owning `path`, then decide as [`Self::decide`].
    pub fn route(
        &self,
        path: &str,
        correlation_id: Option<&str>,
        client_ip: Option<IpAddr>,
    ) -> Result<RoutingDecision, GatewayError> {
        let config = self.config.snapshot();
        let service = ServiceMatcher::new(&config)
            .match_path(path)
            .ok_or_else(|| GatewayError::UnknownService(path.to_string()))?;
        Ok(decide(service, &routing_key(correlation_id, client_ip)))
    }
}

/// Records the routing decision and stamps routing headers.
pub struct RoutingInterceptor {
    router: TrafficRouter,
    telemetry: Arc<dyn TelemetrySink>,
}

impl RoutingInterceptor {
    pub fn new(router: TrafficRouter, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self { router, telemetry }
    }
}

#[async_trait]
impl Interceptor for RoutingInterceptor {
    async fn intercept(&self, mut request: GatewayRequest, next: Next<'_>) -> GatewayResponse {
        // A minted id changes on every request, so only a client-sent id is
        // sticky; without one the client IP is hashed.
        let decision = match self.router.route(
            request.uri.path(),
            request.context.client_correlation_id.as_ref().map(|c| c.as_str()),
            request.client_ip,
        ) {
            Ok(decision) => decision,
            Err(e) => {
                tracing::debug!(path = %request.uri.path(), "No service matches path");
                return e.into();
            }
        };
        self.telemetry.emit(TelemetryEvent::Routed(decision.clone()));

        let generation = decision.generation;
        let percentage = decision.rollout_percentage;
        request.context.routing = Some(decision);

        let mut response = next.run(request).await;
        // The endpoint reports the generation it actually served.
        if !response.headers.contains_key(&X_ROUTED_TO) {
            response.set_header(X_ROUTED_TO, generation);
        }
        response.set_header(X_TRAFFIC_PERCENTAGE, percentage);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, LiveConfig};

    fn service(rollout: u8) -> ServiceConfig {
        let mut s = ServiceConfig::new("chat", "http://chat.internal".parse().unwrap());
        s.legacy_base_url = Some("http://legacy.internal".parse().unwrap());
        s.rollout_percentage = rollout;
        s
    }

    #[test]
    fn test_extremes() {
        for i in 0..1000 {
            let key = format!("cid-{i}");
            assert_eq!(decide(&service(0), &key).generation, Generation::Legacy);
            assert_eq!(decide(&service(100), &key).generation, Generation::New);
        }
    }

    #[test]
    fn test_force_legacy_overrides_percentage() {
        let mut s = service(100);
        s.force_legacy = true;
        let d = decide(&s, "cid-1");
        assert_eq!(d.generation, Generation::Legacy);
        assert_eq!(d.rollout_percentage, 100);
    }

    #[test]
    fn test_raising_rollout_never_moves_new_back_to_legacy() {
        for i in 0..500 {
            let key = format!("req-{i}");
            let mut was_new = false;
            for pct in 0..=100u8 {
                let is_new = decide(&service(pct), &key).generation == Generation::New;
                assert!(!(was_new && !is_new), "{key} regressed at {pct}%");
                was_new = is_new;
            }
        }
    }

    #[test]
    fn test_missing_correlation_id_hashes_client_ip() {
        let ip: IpAddr = "192.0.2.7".parse().unwrap();
        assert_eq!(routing_key(None, Some(ip)), "192.0.2.7");
        assert_eq!(routing_key(Some("abc"), Some(ip)), "abc");
    }

    #[test]
    fn test_router_reads_live_percentage() {
        let mut config = GatewayConfig::default();
        config.services.push(service(0));
        let live = Arc::new(LiveConfig::new(config));
        let router = TrafficRouter::new(live.clone());

        let first = router.decide("chat", Some("cid-9"), None).unwrap();
        assert_eq!(first.generation, Generation::Legacy);
        assert_eq!(first, router.decide("chat", Some("cid-9"), None).unwrap());

        live.update(|c| c.services[0].rollout_percentage = 100);
        let after = router.decide("chat", Some("cid-9"), None).unwrap();
        assert_eq!(after.generation, Generation::New);
        assert_eq!(after.bucket, first.bucket);

        assert!(matches!(
            router.decide("billing", None, None),
            Err(GatewayError::UnknownService(_))
        ));
    }

    #[test]
    fn test_route_resolves_path_and_hashes_ip_without_id() {
        let mut config = GatewayConfig::default();
        config.services.push(service(50));
        let router = TrafficRouter::new(Arc::new(LiveConfig::new(config)));
        let ip: IpAddr = "198.51.100.20".parse().unwrap();

        let by_path = router.route("/chat/rooms/1", None, Some(ip)).unwrap();
        assert_eq!(by_path.service, "chat");
        assert_eq!(by_path.bucket, bucket("198.51.100.20"));
        assert_eq!(by_path, router.decide("chat", None, Some(ip)).unwrap());

        assert!(matches!(
            router.route("/billing", None, Some(ip)),
            Err(GatewayError::UnknownService(_))
        ));
    }
}
