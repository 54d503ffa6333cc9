//! Structured telemetry events.
//!
//! Policy code reports what happened through a [`TelemetrySink`]; the sink
//! decides how it is logged or counted. The default sink writes `tracing`
//! events and updates Prometheus metrics.

use std::time::Duration;

use crate::dual_write::DualWriteOutcome;
use crate::resilience::circuit_breaker::BreakerState;
use crate::routing::RoutingDecision;

/// Something the traffic-management layer wants observed.
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    CircuitTransition {
        destination: String,
        from: BreakerState,
        to: BreakerState,
    },
    RetryScheduled {
        destination: String,
        attempt: u32,
        delay: Duration,
    },
    RateLimited {
        scope: &'static str,
        retry_after: Duration,
    },
    RateLimiterDegraded {
        scope: &'static str,
        error: String,
    },
    Routed(RoutingDecision),
    /// Routed to legacy but no legacy endpoint is configured.
    RoutingFallback {
        service: String,
    },
    MirrorCompleted(DualWriteOutcome),
    MirrorFailed {
        service: String,
        error: String,
    },
}

/// Receives telemetry events. Implementations must not block.
pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Logs events with `tracing` and records the matching metrics.
#[derive(Debug, Default, Clone)]
pub struct TracingTelemetry;

impl TelemetrySink for TracingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        use crate::observability::metrics;

        match event {
            TelemetryEvent::CircuitTransition {
                destination,
                from,
                to,
            } => {
                match to {
                    BreakerState::Open => tracing::warn!(
                        destination = %destination,
                        from = ?from,
                        "Circuit opened"
                    ),
                    _ => tracing::info!(
                        destination = %destination,
                        from = ?from,
                        to = ?to,
                        "Circuit state changed"
                    ),
                }
                metrics::record_circuit_transition(&destination, to);
            }
            TelemetryEvent::RetryScheduled {
                destination,
                attempt,
                delay,
            } => {
                tracing::info!(destination = %destination, attempt, delay = ?delay, "Retrying request");
                metrics::record_retry(&destination);
            }
            TelemetryEvent::RateLimited { scope, retry_after } => {
                tracing::warn!(scope, retry_after = ?retry_after, "Rate limit exceeded");
                metrics::record_rate_limited(scope);
            }
            TelemetryEvent::RateLimiterDegraded { scope, error } => {
                tracing::warn!(scope, error = %error, "Counter store unavailable, failing open");
                metrics::record_rate_limiter_degraded(scope);
            }
            TelemetryEvent::Routed(decision) => {
                tracing::debug!(
                    service = %decision.service,
                    generation = %decision.generation,
                    bucket = decision.bucket,
                    rollout = decision.rollout_percentage,
                    "Routing decision"
                );
                metrics::record_routing_decision(&decision.service, decision.generation);
            }
            TelemetryEvent::RoutingFallback { service } => {
                tracing::warn!(
                    service = %service,
                    "Routed to legacy but no legacy endpoint configured, falling back to new"
                );
                metrics::record_routing_fallback(&service);
            }
            TelemetryEvent::MirrorCompleted(outcome) => {
                tracing::info!(
                    service = %outcome.service,
                    primary_status = ?outcome.primary_status,
                    mirror_status = ?outcome.mirror_status,
                    "Mirrored write completed"
                );
                metrics::record_mirror(&outcome.service, outcome.mirror_written);
            }
            TelemetryEvent::MirrorFailed { service, error } => {
                tracing::warn!(service = %service, error = %error, "Mirrored write failed");
                metrics::record_mirror(&service, false);
            }
        }
    }
}

/// Keeps every event in memory; used by tests and diagnostics.
#[derive(Debug, Default)]
pub struct RecordingTelemetry {
    events: std::sync::Mutex<Vec<TelemetryEvent>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<TelemetryEvent> {
        match self.events.lock() {
            Ok(events) => events.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl TelemetrySink for RecordingTelemetry {
    fn emit(&self, event: TelemetryEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
    }
}
