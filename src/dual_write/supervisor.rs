//! Background supervision of mirrored writes.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::config::ConfigSource;
use crate::dual_write::DualWriteOutcome;
use crate::error::GatewayError;
use crate::observability::{TelemetryEvent, TelemetrySink};
use crate::transport::UpstreamResponse;

const FAILURE_CHANNEL_CAPACITY: usize = 256;

/// Added to `timeouts.mirror` before a mirror is cut off, leaving room for
/// the transport's own timeout to fire and settle the breaker first.
const SETTLE_GRACE: Duration = Duration::from_millis(250);

/// A mirrored write that produced no response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorFailure {
    pub service: String,
    pub destination: String,
    pub error: String,
}

/// Running totals for the admin surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MirrorStats {
    pub in_flight: usize,
    pub completed: u64,
    pub failed: u64,
}

/// Runs mirrored writes off the request path.
///
/// Every mirror is tracked so shutdown can wait for in-flight writes, bounded
/// by `timeouts.mirror` plus a short settle grace, and reported through telemetry and the failure
/// channel.
pub struct MirrorSupervisor {
    tracker: TaskTracker,
    cancel: CancellationToken,
    config: Arc<dyn ConfigSource>,
    telemetry: Arc<dyn TelemetrySink>,
    failures: broadcast::Sender<MirrorFailure>,
    completed: Arc<AtomicU64>,
    failed: Arc<AtomicU64>,
}

impl MirrorSupervisor {
    pub fn new(config: Arc<dyn ConfigSource>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        let (failures, _) = broadcast::channel(FAILURE_CHANNEL_CAPACITY);
        Self {
            tracker: TaskTracker::new(),
            cancel: CancellationToken::new(),
            config,
            telemetry,
            failures,
            completed: Arc::new(AtomicU64::new(0)),
            failed: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Receive every mirror failure from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<MirrorFailure> {
        self.failures.subscribe()
    }

    pub fn stats(&self) -> MirrorStats {
        MirrorStats {
            in_flight: self.tracker.len(),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Run a mirror in the background.
    ///
    /// `dispatch` receives a token that is cancelled on timeout or forced
    /// shutdown. `outcome` carries the primary's result; the mirror fields are
    /// filled in here and the finished outcome is sent on the returned channel.
    pub fn spawn<F, Fut>(
        &self,
        destination: String,
        mut outcome: DualWriteOutcome,
        dispatch: F,
    ) -> oneshot::Receiver<DualWriteOutcome>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = Result<UpstreamResponse, GatewayError>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let token = self.cancel.child_token();
        let limit = self.config.snapshot().timeouts.mirror() + SETTLE_GRACE;
        let fut = dispatch(token.clone());

        let telemetry = self.telemetry.clone();
        let failures = self.failures.clone();
        let completed = self.completed.clone();
        let failed = self.failed.clone();

        self.tracker.spawn(async move {
            let result = match tokio::time::timeout(limit, fut).await {
                Ok(result) => result,
                Err(_) => {
                    token.cancel();
                    Err(GatewayError::DeadlineExceeded)
                }
            };

            match result {
                Ok(response) => {
                    outcome.mirror_status = Some(response.status.as_u16());
                    outcome.mirror_written = response.status.is_success();
                    completed.fetch_add(1, Ordering::Relaxed);
                    telemetry.emit(TelemetryEvent::MirrorCompleted(outcome.clone()));
                }
                Err(e) => {
                    failed.fetch_add(1, Ordering::Relaxed);
                    telemetry.emit(TelemetryEvent::MirrorFailed {
                        service: outcome.service.clone(),
                        error: e.to_string(),
                    });
                    let _ = failures.send(MirrorFailure {
                        service: outcome.service.clone(),
                        destination,
                        error: e.to_string(),
                    });
                }
            }
            let _ = tx.send(outcome);
        });
        rx
    }

    /// Stop accepting mirrors and wait up to `grace` for in-flight ones.
    ///
    /// Returns `false` if the grace period ran out; remaining mirrors are
    /// cancelled.
    pub async fn drain(&self, grace: Duration) -> bool {
        self.tracker.close();
        let in_flight = self.tracker.len();
        if in_flight > 0 {
            tracing::info!(in_flight, "Waiting for mirrored writes");
        }
        match tokio::time::timeout(grace, self.tracker.wait()).await {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!(
                    remaining = self.tracker.len(),
                    "Mirror drain timed out, cancelling"
                );
                self.cancel.cancel();
                false
            }
        }
    }
}
