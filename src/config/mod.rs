//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → GatewayConfig (validated, immutable)
//!     → live.rs (ArcSwap, read once per request decision)
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads new config
//!     → validation.rs validates
//!     → LiveConfig::replace (atomic swap)
//!     → next request observes new rollout / flags / thresholds
//! ```
//!
//! # Design Decisions
//! - A snapshot is immutable; changes arrive as a whole new config
//! - All fields have defaults to allow minimal configs
//! - Invalid reloads are logged and dropped; the running config stays

pub mod live;
pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use live::{ConfigSource, LiveConfig};
pub use schema::{
    AdminConfig, CircuitBreakerConfig, CounterStoreKind, GatewayConfig, ListenerConfig, LogFormat,
    ObservabilityConfig, RateLimitConfig, RetryConfig, SecurityConfig, ServiceConfig, TimeoutConfig,
};
