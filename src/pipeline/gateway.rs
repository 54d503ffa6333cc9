//! Assembly of the full request pipeline.

use std::sync::Arc;

use crate::config::ConfigSource;
use crate::dual_write::{DualWriteCoordinator, MirrorSupervisor};
use crate::observability::TelemetrySink;
use crate::pipeline::{
    CorrelationInterceptor, DeadlineInterceptor, ForwardEndpoint, GatewayRequest,
    GatewayResponse, Pipeline,
};
use crate::resilience::{BreakerRegistry, ResiliencePolicyChain};
use crate::routing::{RoutingInterceptor, TrafficRouter};
use crate::security::{CounterStore, RateLimitInterceptor, RateLimiter, SystemClock, WindowClock};
use crate::transport::Transport;

/// Injected collaborators.
#[derive(Clone)]
pub struct GatewayDeps {
    pub config: Arc<dyn ConfigSource>,
    pub counter_store: Arc<dyn CounterStore>,
    pub transport: Arc<dyn Transport>,
    pub telemetry: Arc<dyn TelemetrySink>,
    pub clock: Arc<dyn WindowClock>,
}

impl GatewayDeps {
    pub fn new(
        config: Arc<dyn ConfigSource>,
        counter_store: Arc<dyn CounterStore>,
        transport: Arc<dyn Transport>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            config,
            counter_store,
            transport,
            telemetry,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replace the window clock used by the rate limiter.
    pub fn with_clock(mut self, clock: Arc<dyn WindowClock>) -> Self {
        self.clock = clock;
        self
    }
}

/// The assembled gateway: correlation, deadline, rate limit, routing, forward.
pub struct Gateway {
    pipeline: Pipeline,
    breakers: Arc<BreakerRegistry>,
    supervisor: Arc<MirrorSupervisor>,
    config: Arc<dyn ConfigSource>,
}

impl Gateway {
    pub fn new(deps: GatewayDeps) -> Self {
        let GatewayDeps {
            config,
            counter_store,
            transport,
            telemetry,
            clock,
        } = deps;

        let breakers = Arc::new(BreakerRegistry::new(telemetry.clone()));
        let chain = Arc::new(ResiliencePolicyChain::new(
            transport,
            breakers.clone(),
            config.clone(),
            telemetry.clone(),
        ));
        let supervisor = Arc::new(MirrorSupervisor::new(config.clone(), telemetry.clone()));
        let coordinator = Arc::new(DualWriteCoordinator::new(
            chain,
            supervisor.clone(),
            config.clone(),
            telemetry.clone(),
        ));

        let limiter = RateLimiter::with_clock(counter_store, clock, telemetry.clone());
        let pipeline = Pipeline::new(Arc::new(ForwardEndpoint::new(coordinator, config.clone())))
            .with(Arc::new(CorrelationInterceptor))
            .with(Arc::new(DeadlineInterceptor::new(config.clone())))
            .with(Arc::new(RateLimitInterceptor::new(
                limiter,
                config.clone(),
                telemetry.clone(),
            )))
            .with(Arc::new(RoutingInterceptor::new(
                TrafficRouter::new(config.clone()),
                telemetry,
            )));

        Self {
            pipeline,
            breakers,
            supervisor,
            config,
        }
    }

    pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
        self.pipeline.handle(request).await
    }

    pub fn breakers(&self) -> &Arc<BreakerRegistry> {
        &self.breakers
    }

    pub fn supervisor(&self) -> &Arc<MirrorSupervisor> {
        &self.supervisor
    }

    pub fn config(&self) -> &Arc<dyn ConfigSource> {
        &self.config
    }
}
