//! Configuration validation.
//!
//! Serde handles syntax; this module checks value ranges and referential
//! integrity. Every error is collected, not just the first.

use std::collections::HashSet;

use crate::config::schema::{CounterStoreKind, GatewayConfig};

/// Longest rate-limit window accepted (30 days).
pub const MAX_WINDOW_SECS: u64 = 30 * 24 * 60 * 60;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("service '{service}': rollout_percentage {value} exceeds 100")]
    RolloutOutOfRange { service: String, value: u8 },

    #[error("service '{0}' is defined more than once")]
    DuplicateService(String),

    #[error("service '{service}': path_prefix '{prefix}' must start with '/'")]
    InvalidPathPrefix { service: String, prefix: String },

    #[error("service '{service}': {field} must use plain http (TLS is terminated outside the gateway)")]
    UnsupportedScheme { service: String, field: &'static str },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("{field} = {value} exceeds the maximum of {max} seconds")]
    WindowTooLong {
        field: &'static str,
        value: u64,
        max: u64,
    },

    #[error("rate_limit.redis_url '{0}' is not a valid URL")]
    InvalidRedisUrl(String),
}

/// Validate a parsed configuration.
pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();

    for service in &config.services {
        if !seen.insert(service.name.as_str()) {
            errors.push(ValidationError::DuplicateService(service.name.clone()));
        }
        if service.rollout_percentage > 100 {
            errors.push(ValidationError::RolloutOutOfRange {
                service: service.name.clone(),
                value: service.rollout_percentage,
            });
        }
        if let Some(prefix) = &service.path_prefix {
            if !prefix.starts_with('/') {
                errors.push(ValidationError::InvalidPathPrefix {
                    service: service.name.clone(),
                    prefix: prefix.clone(),
                });
            }
        }
        if !is_http(&service.new_base_url) {
            errors.push(ValidationError::UnsupportedScheme {
                service: service.name.clone(),
                field: "new_base_url",
            });
        }
        if let Some(legacy) = &service.legacy_base_url {
            if !is_http(legacy) {
                errors.push(ValidationError::UnsupportedScheme {
                    service: service.name.clone(),
                    field: "legacy_base_url",
                });
            }
        }
    }

    let rl = &config.rate_limit;
    let positive = [
        ("rate_limit.ip_limit", rl.ip_limit),
        ("rate_limit.ip_window_secs", rl.ip_window_secs),
        ("rate_limit.identity_limit", rl.identity_limit),
        ("rate_limit.identity_window_secs", rl.identity_window_secs),
        ("retries.max_attempts", u64::from(config.retries.max_attempts)),
        (
            "circuit_breaker.failure_threshold",
            u64::from(config.circuit_breaker.failure_threshold),
        ),
        ("timeouts.request_secs", config.timeouts.request_secs),
        ("timeouts.upstream_ms", config.timeouts.upstream_ms),
        ("timeouts.mirror_ms", config.timeouts.mirror_ms),
    ];
    for (field, value) in positive {
        if value == 0 {
            errors.push(ValidationError::Zero(field));
        }
    }

    for (field, value) in [
        ("rate_limit.ip_window_secs", rl.ip_window_secs),
        ("rate_limit.identity_window_secs", rl.identity_window_secs),
    ] {
        if value > MAX_WINDOW_SECS {
            errors.push(ValidationError::WindowTooLong {
                field,
                value,
                max: MAX_WINDOW_SECS,
            });
        }
    }

    if rl.enabled && rl.store == CounterStoreKind::Redis && url::Url::parse(&rl.redis_url).is_err() {
        errors.push(ValidationError::InvalidRedisUrl(rl.redis_url.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn is_http(url: &url::Url) -> bool {
    url.scheme() == "http"
}
