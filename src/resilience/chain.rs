//! Retry + circuit breaker around a single upstream destination.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::ConfigSource;
use crate::error::GatewayError;
use crate::observability::{TelemetryEvent, TelemetrySink};
use crate::resilience::backoff::calculate_backoff;
use crate::resilience::circuit_breaker::{BreakerRegistry, BreakerState};
use crate::resilience::retries::is_transient_status;
use crate::transport::{OutboundRequest, Transport, TransportError, UpstreamResponse};

/// How many attempts a dispatch may use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempts {
    /// Up to `retries.max_attempts`.
    Policy,
    /// Exactly one attempt.
    Single,
}

enum Failure {
    Status(UpstreamResponse),
    Transport(TransportError),
}

/// Wraps outbound dispatch with bounded retries and a per-destination breaker.
pub struct ResiliencePolicyChain {
    transport: Arc<dyn Transport>,
    breakers: Arc<BreakerRegistry>,
    config: Arc<dyn ConfigSource>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl ResiliencePolicyChain {
    pub fn new(
        transport: Arc<dyn Transport>,
        breakers: Arc<BreakerRegistry>,
        config: Arc<dyn ConfigSource>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            transport,
            breakers,
            config,
            telemetry,
        }
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    /// Dispatch `request` to `destination`.
    ///
    /// Open circuits fail fast with no transport call. Transient failures are
    /// retried with backoff until attempts run out or the breaker leaves
    /// `Closed`; a 5xx on the final attempt is returned as-is, a transport error becomes
    /// [`GatewayError::UpstreamTransientFailure`]. Cancelling `cancel` stops
    /// the loop before the next attempt or during backoff.
    pub async fn execute(
        &self,
        destination: &str,
        request: OutboundRequest,
        attempts: Attempts,
        cancel: &CancellationToken,
    ) -> Result<UpstreamResponse, GatewayError> {
        let config = self.config.snapshot();
        let max_attempts = match attempts {
            Attempts::Policy => config.retries.max_attempts.max(1),
            Attempts::Single => 1,
        };
        let threshold = config.circuit_breaker.failure_threshold;
        let break_duration = config.circuit_breaker.break_duration();
        let breaker = self.breakers.get(destination);

        let mut attempt = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Err(GatewayError::DeadlineExceeded);
            }

            let permit = breaker.try_acquire(break_duration).map_err(|open| {
                tracing::debug!(
                    destination = %destination,
                    retry_in = ?open.retry_in,
                    "Circuit open, failing fast"
                );
                GatewayError::UpstreamCircuitOpen {
                    destination: destination.to_string(),
                }
            })?;

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GatewayError::DeadlineExceeded),
                result = self.transport.send(request.clone()) => result,
            };
            attempt += 1;

            let failure = match result {
                Ok(response) if !is_transient_status(response.status) => {
                    permit.success();
                    return Ok(response);
                }
                Ok(response) => {
                    permit.failure(threshold);
                    Failure::Status(response)
                }
                Err(e) => {
                    permit.failure(threshold);
                    Failure::Transport(e)
                }
            };

            // A breaker opened by this failure would reject the next attempt,
            // so the upstream's answer is the final one.
            if attempt >= max_attempts || breaker.state() != BreakerState::Closed {
                return match failure {
                    Failure::Status(response) => {
                        tracing::warn!(
                            destination = %destination,
                            attempts = attempt,
                            status = %response.status,
                            "Retries exhausted, returning upstream error"
                        );
                        Ok(response)
                    }
                    Failure::Transport(source) => {
                        tracing::error!(
                            destination = %destination,
                            attempts = attempt,
                            error = %source,
                            "Retries exhausted"
                        );
                        Err(GatewayError::UpstreamTransientFailure {
                            destination: destination.to_string(),
                            attempts: attempt,
                            source,
                        })
                    }
                };
            }

            let delay = calculate_backoff(
                attempt - 1,
                config.retries.base_delay_ms,
                config.retries.jitter_ceiling_ms,
            );
            self.telemetry.emit(TelemetryEvent::RetryScheduled {
                destination: destination.to_string(),
                attempt,
                delay,
            });

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GatewayError::DeadlineExceeded),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }
}
