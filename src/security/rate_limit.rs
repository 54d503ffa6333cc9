//! Fixed-window rate limiting over a shared counter store.
//!
//! # Design Decisions
//! - Each window is its own key (`rl:{scope}:{key}:{window_start_ms}`); a new
//!   window never resets an old counter
//! - The IP scope is checked before identity so a rejected IP does not burn
//!   identity quota
//! - A store outage fails open and is reported as degraded

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use crate::config::ConfigSource;
use crate::error::GatewayError;
use crate::observability::{TelemetryEvent, TelemetrySink};
use crate::pipeline::{
    GatewayRequest, GatewayResponse, Interceptor, Next, X_RATELIMIT_LIMIT, X_RATELIMIT_REMAINING,
};
use crate::security::counter_store::CounterStore;
use crate::security::identity::identity_key;

/// Which quota a counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateScope {
    Ip,
    Identity,
}

impl RateScope {
    pub fn as_str(self) -> &'static str {
        match self {
            RateScope::Ip => "ip",
            RateScope::Identity => "identity",
        }
    }
}

/// Result of one `check_and_consume` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub scope: RateScope,
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    /// Time until the current window closes.
    pub retry_after: Duration,
    /// The store could not be reached and the request was let through.
    pub degraded: bool,
}

/// Wall-clock source for window alignment.
pub trait WindowClock: Send + Sync {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> u64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl WindowClock for SystemClock {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(now_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(now_ms),
        }
    }

    pub fn set(&self, now_ms: u64) {
        self.now_ms.store(now_ms, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let by = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        self.now_ms.fetch_add(by, Ordering::SeqCst);
    }
}

impl WindowClock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Counts requests per (scope, key, window) and decides admission.
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn WindowClock>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, telemetry: Arc<dyn TelemetrySink>) -> Self {
        Self::with_clock(store, Arc::new(SystemClock), telemetry)
    }

    pub fn with_clock(
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn WindowClock>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            store,
            clock,
            telemetry,
        }
    }

    /// Consume one unit of `key`'s quota in `scope` for the current window.
    pub async fn check_and_consume(
        &self,
        scope: RateScope,
        key: &str,
        limit: u64,
        window: Duration,
    ) -> RateDecision {
        let window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX).max(1);
        let now_ms = self.clock.now_ms();
        let window_start = now_ms - now_ms % window_ms;
        let retry_after = Duration::from_millis(window_start + window_ms - now_ms);
        let counter_key = format!("rl:{}:{}:{}", scope.as_str(), key, window_start);

        match self.store.increment_with_expiry(&counter_key, window).await {
            Ok(count) => RateDecision {
                scope,
                allowed: count <= limit,
                limit,
                remaining: limit.saturating_sub(count),
                retry_after,
                degraded: false,
            },
            Err(e) => {
                self.telemetry.emit(TelemetryEvent::RateLimiterDegraded {
                    scope: scope.as_str(),
                    error: e.to_string(),
                });
                RateDecision {
                    scope,
                    allowed: true,
                    limit,
                    remaining: limit,
                    retry_after,
                    degraded: true,
                }
            }
        }
    }
}

/// Enforces the IP and identity quotas before routing.
pub struct RateLimitInterceptor {
    limiter: RateLimiter,
    config: Arc<dyn ConfigSource>,
    telemetry: Arc<dyn TelemetrySink>,
}

impl RateLimitInterceptor {
    pub fn new(
        limiter: RateLimiter,
        config: Arc<dyn ConfigSource>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            limiter,
            config,
            telemetry,
        }
    }

    fn reject(&self, decision: RateDecision) -> GatewayResponse {
        self.telemetry.emit(TelemetryEvent::RateLimited {
            scope: decision.scope.as_str(),
            retry_after: decision.retry_after,
        });
        let mut response = GatewayResponse::from(GatewayError::RateLimited {
            scope: decision.scope.as_str(),
            retry_after: decision.retry_after,
        });
        stamp(&mut response, &decision);
        response
    }
}

fn stamp(response: &mut GatewayResponse, decision: &RateDecision) {
    response.set_header(X_RATELIMIT_LIMIT, decision.limit);
    response.set_header(X_RATELIMIT_REMAINING, decision.remaining);
}

#[async_trait]
impl Interceptor for RateLimitInterceptor {
    async fn intercept(&self, mut request: GatewayRequest, next: Next<'_>) -> GatewayResponse {
        let config = self.config.snapshot();
        let limits = &config.rate_limit;
        if !limits.enabled {
            return next.run(request).await;
        }

        // Requests without a peer address share one bucket; a host that never
        // supplies the address throttles all of its traffic together.
        let ip = request
            .client_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        let ip_decision = self
            .limiter
            .check_and_consume(RateScope::Ip, &ip, limits.ip_limit, limits.ip_window())
            .await;
        if !ip_decision.allowed {
            tracing::debug!(client_ip = %ip, "IP quota exhausted");
            return self.reject(ip_decision);
        }

        let mut tightest = ip_decision;
        if let Some(identity) = identity_key(&request.headers) {
            let decision = self
                .limiter
                .check_and_consume(
                    RateScope::Identity,
                    &identity,
                    limits.identity_limit,
                    limits.identity_window(),
                )
                .await;
            if !decision.allowed {
                return self.reject(decision);
            }
            if tightest.degraded || (!decision.degraded && decision.remaining < tightest.remaining)
            {
                tightest = decision;
            }
            request.context.identity = Some(identity);
        }

        let mut response = next.run(request).await;
        if !tightest.degraded {
            stamp(&mut response, &tightest);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observability::RecordingTelemetry;
    use crate::security::counter_store::{InMemoryCounterStore, StoreError};

    struct DownStore;

    #[async_trait]
    impl CounterStore for DownStore {
        async fn increment_with_expiry(&self, _: &str, _: Duration) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("connection refused".into()))
        }
    }

    fn limiter(clock: Arc<ManualClock>) -> RateLimiter {
        RateLimiter::with_clock(
            Arc::new(InMemoryCounterStore::new()),
            clock,
            Arc::new(RecordingTelemetry::default()),
        )
    }

    #[tokio::test]
    async fn test_remaining_counts_down_then_rejects() {
        let clock = Arc::new(ManualClock::new(60_000));
        let limiter = limiter(clock.clone());
        let window = Duration::from_secs(60);

        for expected in (0..3).rev() {
            let d = limiter.check_and_consume(RateScope::Ip, "10.0.0.1", 3, window).await;
            assert!(d.allowed);
            assert_eq!(d.remaining, expected);
        }

        clock.advance(Duration::from_secs(15));
        let d = limiter.check_and_consume(RateScope::Ip, "10.0.0.1", 3, window).await;
        assert!(!d.allowed);
        assert_eq!(d.remaining, 0);
        assert_eq!(d.retry_after, Duration::from_secs(45));
    }

    #[tokio::test]
    async fn test_new_window_is_a_new_counter() {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = limiter(clock.clone());
        let window = Duration::from_secs(60);

        limiter.check_and_consume(RateScope::Ip, "a", 1, window).await;
        assert!(!limiter.check_and_consume(RateScope::Ip, "a", 1, window).await.allowed);

        clock.advance(window);
        assert!(limiter.check_and_consume(RateScope::Ip, "a", 1, window).await.allowed);
    }

    #[tokio::test]
    async fn test_scopes_and_keys_are_independent() {
        let limiter = limiter(Arc::new(ManualClock::new(0)));
        let window = Duration::from_secs(60);

        limiter.check_and_consume(RateScope::Ip, "k", 1, window).await;
        assert!(limiter.check_and_consume(RateScope::Identity, "k", 1, window).await.allowed);
        assert!(limiter.check_and_consume(RateScope::Ip, "other", 1, window).await.allowed);
    }

    #[tokio::test]
    async fn test_store_outage_fails_open() {
        let telemetry = Arc::new(RecordingTelemetry::default());
        let limiter = RateLimiter::with_clock(
            Arc::new(DownStore),
            Arc::new(ManualClock::new(0)),
            telemetry.clone(),
        );

        let d = limiter
            .check_and_consume(RateScope::Identity, "k", 1, Duration::from_secs(60))
            .await;
        assert!(d.allowed);
        assert!(d.degraded);
        assert!(matches!(
            telemetry.events().as_slice(),
            [TelemetryEvent::RateLimiterDegraded { scope: "identity", .. }]
        ));
    }
}
