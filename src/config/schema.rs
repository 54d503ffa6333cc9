//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::routing::Generation;

/// Root configuration for the migration gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// Logical services under migration.
    pub services: Vec<ServiceConfig>,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    #[serde(default)]
    pub admin: AdminConfig,

    #[serde(default)]
    pub security: SecurityConfig,
}

impl GatewayConfig {
    /// Look up a service by name.
    pub fn service(&self, name: &str) -> Option<&ServiceConfig> {
        self.services.iter().find(|s| s.name == name)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// A logical service that exists in both backend generations.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Service identifier used for routing, breakers and metrics.
    pub name: String,

    /// Path prefix owned by this service. Defaults to `/{name}`.
    #[serde(default)]
    pub path_prefix: Option<String>,

    /// Base URL of the new microservice.
    pub new_base_url: Url,

    /// Base URL of the legacy system, if it still serves this service.
    #[serde(default)]
    pub legacy_base_url: Option<Url>,

    /// Share of traffic (0-100) sent to the new generation.
    #[serde(default)]
    pub rollout_percentage: u8,

    /// Route everything to legacy regardless of the rollout percentage.
    #[serde(default)]
    pub force_legacy: bool,

    /// Mirror mutating requests to the other generation.
    #[serde(default)]
    pub dual_write: bool,
}

impl ServiceConfig {
    /// Create a service with only a new-generation URL and a 0% rollout.
    pub fn new(name: impl Into<String>, new_base_url: Url) -> Self {
        Self {
            name: name.into(),
            path_prefix: None,
            new_base_url,
            legacy_base_url: None,
            rollout_percentage: 0,
            force_legacy: false,
            dual_write: false,
        }
    }

    /// The effective path prefix for this service.
    pub fn prefix(&self) -> String {
        match &self.path_prefix {
            Some(p) => p.clone(),
            None => format!("/{}", self.name),
        }
    }

    /// Base URL of one generation; legacy may be unconfigured.
    pub fn base_url(&self, generation: Generation) -> Option<&Url> {
        match generation {
            Generation::New => Some(&self.new_base_url),
            Generation::Legacy => self.legacy_base_url.as_ref(),
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-request deadline covering every retry attempt, in seconds.
    pub request_secs: u64,

    /// Per-attempt upstream timeout in milliseconds.
    pub upstream_ms: u64,

    /// Cap on a mirrored write, in milliseconds.
    pub mirror_ms: u64,
}

impl TimeoutConfig {
    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    pub fn upstream(&self) -> Duration {
        Duration::from_millis(self.upstream_ms)
    }

    pub fn mirror(&self) -> Duration {
        Duration::from_millis(self.mirror_ms)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            request_secs: 30,
            upstream_ms: 10_000,
            mirror_ms: 5_000,
        }
    }
}

/// Which counter store backs the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CounterStoreKind {
    Memory,
    Redis,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests allowed per IP per window.
    pub ip_limit: u64,

    /// IP window length in seconds.
    pub ip_window_secs: u64,

    /// Requests allowed per authenticated identity per window.
    pub identity_limit: u64,

    /// Identity window length in seconds.
    pub identity_window_secs: u64,

    /// Counter store backend.
    pub store: CounterStoreKind,

    /// Redis connection URL, used when `store = "redis"`.
    pub redis_url: String,
}

impl RateLimitConfig {
    pub fn ip_window(&self) -> Duration {
        Duration::from_secs(self.ip_window_secs)
    }

    pub fn identity_window(&self) -> Duration {
        Duration::from_secs(self.identity_window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ip_limit: 100,
            ip_window_secs: 60,
            identity_limit: 1000,
            identity_window_secs: 3600,
            store: CounterStoreKind::Memory,
            redis_url: "redis://127.0.0.1:6379".to_string(),
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Upper bound of the uniform jitter added to each delay, in milliseconds.
    pub jitter_ceiling_ms: u64,

    /// Retry POST/PATCH even without an `Idempotency-Key` header.
    pub retry_non_idempotent: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 100,
            jitter_ceiling_ms: 100,
            retry_non_idempotent: false,
        }
    }
}

/// Circuit breaker configuration, applied to every destination.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,

    /// How long an open circuit fails fast before admitting a probe, in seconds.
    pub break_duration_secs: u64,
}

impl CircuitBreakerConfig {
    pub fn break_duration(&self) -> Duration {
        Duration::from_secs(self.break_duration_secs)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            break_duration_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: true,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Admin API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Enable the admin API.
    pub enabled: bool,

    /// API key for authentication (Bearer token).
    pub api_key: String,

    /// Admin API bind address.
    pub bind_address: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            // WARNING: This is a placeholder! Change this in production.
            api_key: "CHANGE_ME_IN_PRODUCTION".to_string(),
            bind_address: "127.0.0.1:8081".to_string(),
        }
    }
}

/// Request hardening configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SecurityConfig {
    /// Maximum buffered request body size in bytes.
    pub max_body_size: usize,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}
