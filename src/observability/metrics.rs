//! Metrics collection and exposition.
//!
//! # Metrics
//! - `gateway_requests_total` (counter): requests by method, status, generation
//! - `gateway_request_duration_seconds` (histogram): end-to-end latency
//! - `gateway_rate_limited_total` (counter): rejections by scope
//! - `gateway_rate_limiter_degraded_total` (counter): fail-open decisions by scope
//! - `gateway_routing_decisions_total` (counter): decisions by service, generation
//! - `gateway_routing_fallbacks_total` (counter): legacy → new fallbacks by service
//! - `gateway_retries_total` (counter): scheduled retries by destination
//! - `gateway_circuit_transitions_total` (counter): transitions by destination, state
//! - `gateway_mirror_writes_total` (counter): mirrored writes by service, outcome

use std::net::SocketAddr;
use std::time::Instant;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::resilience::circuit_breaker::BreakerState;
use crate::routing::Generation;

/// Install the Prometheus recorder and its scrape listener.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(method: &str, status: u16, routed_to: &str, start: Instant) {
    let labels = [
        ("method", method.to_string()),
        ("status", status.to_string()),
        ("routed_to", routed_to.to_string()),
    ];
    counter!("gateway_requests_total", &labels).increment(1);
    histogram!("gateway_request_duration_seconds", &labels).record(start.elapsed().as_secs_f64());
}

pub fn record_rate_limited(scope: &'static str) {
    counter!("gateway_rate_limited_total", "scope" => scope).increment(1);
}

pub fn record_rate_limiter_degraded(scope: &'static str) {
    counter!("gateway_rate_limiter_degraded_total", "scope" => scope).increment(1);
}

pub fn record_routing_decision(service: &str, generation: Generation) {
    counter!(
        "gateway_routing_decisions_total",
        "service" => service.to_string(),
        "generation" => generation.as_str()
    )
    .increment(1);
}

pub fn record_routing_fallback(service: &str) {
    counter!("gateway_routing_fallbacks_total", "service" => service.to_string()).increment(1);
}

pub fn record_retry(destination: &str) {
    counter!("gateway_retries_total", "destination" => destination.to_string()).increment(1);
}

pub fn record_circuit_transition(destination: &str, to: BreakerState) {
    counter!(
        "gateway_circuit_transitions_total",
        "destination" => destination.to_string(),
        "state" => to.as_str()
    )
    .increment(1);
}

pub fn record_mirror(service: &str, written: bool) {
    let outcome = if written { "written" } else { "failed" };
    counter!(
        "gateway_mirror_writes_total",
        "service" => service.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}
