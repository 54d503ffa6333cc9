//! Live, atomically swappable configuration.

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::config::schema::GatewayConfig;

/// Source of the current configuration.
///
/// Consumers call [`ConfigSource::snapshot`] once per decision so rollout
/// percentages and flags take effect without a redeploy.
pub trait ConfigSource: Send + Sync {
    fn snapshot(&self) -> Arc<GatewayConfig>;
}

/// Configuration held behind an `ArcSwap`; readers never block writers.
#[derive(Debug)]
pub struct LiveConfig {
    current: ArcSwap<GatewayConfig>,
}

impl LiveConfig {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
        }
    }

    /// Atomically install a new configuration.
    pub fn replace(&self, config: GatewayConfig) {
        self.current.store(Arc::new(config));
        tracing::info!("Configuration swapped");
    }

    /// Apply an in-place edit to a copy of the current configuration.
    pub fn update(&self, edit: impl Fn(&mut GatewayConfig)) {
        self.current.rcu(|current| {
            let mut next = GatewayConfig::clone(current);
            edit(&mut next);
            next
        });
    }
}

impl ConfigSource for LiveConfig {
    fn snapshot(&self) -> Arc<GatewayConfig> {
        self.current.load_full()
    }
}
