//! Interceptor chain runner.

use std::sync::Arc;

use async_trait::async_trait;

use crate::pipeline::{GatewayRequest, GatewayResponse};

/// A request interceptor: `(request, next) → response`.
///
/// An interceptor either answers on its own (e.g. a 429) or calls
/// [`Next::run`] and post-processes what comes back.
#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn intercept(&self, request: GatewayRequest, next: Next<'_>) -> GatewayResponse;
}

/// Terminal handler at the end of the chain.
#[async_trait]
pub trait Endpoint: Send + Sync {
    async fn call(&self, request: GatewayRequest) -> GatewayResponse;
}

/// The remainder of the chain after the current interceptor.
pub struct Next<'a> {
    rest: &'a [Arc<dyn Interceptor>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub async fn run(self, request: GatewayRequest) -> GatewayResponse {
        match self.rest.split_first() {
            Some((head, rest)) => {
                let next = Next {
                    rest,
                    endpoint: self.endpoint,
                };
                head.intercept(request, next).await
            }
            None => self.endpoint.call(request).await,
        }
    }
}

/// An ordered list of interceptors in front of an endpoint.
#[derive(Clone)]
pub struct Pipeline {
    interceptors: Vec<Arc<dyn Interceptor>>,
    endpoint: Arc<dyn Endpoint>,
}

impl Pipeline {
    pub fn new(endpoint: Arc<dyn Endpoint>) -> Self {
        Self {
            interceptors: Vec::new(),
            endpoint,
        }
    }

    /// Append an interceptor; the first added runs outermost.
    pub fn with(mut self, interceptor: Arc<dyn Interceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub async fn handle(&self, request: GatewayRequest) -> GatewayResponse {
        Next {
            rest: &self.interceptors,
            endpoint: self.endpoint.as_ref(),
        }
        .run(request)
        .await
    }
}
