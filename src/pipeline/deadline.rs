//! Per-request deadline and cancellation.

use std::sync::Arc;

use async_trait::async_trait;

use crate::config::ConfigSource;
use crate::error::GatewayError;
use crate::pipeline::{GatewayRequest, GatewayResponse, Interceptor, Next};

/// Bounds the whole downstream chain by `timeouts.request_secs`.
///
/// The request's cancellation token fires when the deadline elapses or when
/// the host drops the request future (client disconnect), so retry loops
/// stop issuing attempts. Mirrored writes use their own tokens and are not
/// affected.
pub struct DeadlineInterceptor {
    config: Arc<dyn ConfigSource>,
}

impl DeadlineInterceptor {
    pub fn new(config: Arc<dyn ConfigSource>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Interceptor for DeadlineInterceptor {
    async fn intercept(&self, request: GatewayRequest, next: Next<'_>) -> GatewayResponse {
        let deadline = self.config.snapshot().timeouts.request();
        let _cancel_on_drop = request.context.cancel.clone().drop_guard();

        match tokio::time::timeout(deadline, next.run(request)).await {
            Ok(response) => response,
            Err(_) => {
                tracing::warn!(deadline = ?deadline, "Request deadline exceeded");
                GatewayError::DeadlineExceeded.into()
            }
        }
    }
}
