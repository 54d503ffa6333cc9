//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request (path, correlation id, client ip)
//!     → matcher.rs (which logical service owns the path)
//!     → hashing.rs (stable bucket 0..100 from the correlation id)
//!     → router.rs (force-legacy flag, rollout percentage → generation)
//!     → Return: RoutingDecision, stamped into X-Routed-To / X-Traffic-Percentage
//! ```
//!
//! # Design Decisions
//! - Deterministic: same config + same correlation id → same generation
//! - Rollout percentage is read from the live config on every request
//! - Buckets are fixed per id, so raising the percentage only moves ids
//!   from legacy to new, never back

pub mod hashing;
pub mod matcher;
pub mod router;

use std::fmt;

use serde::Serialize;

pub use matcher::ServiceMatcher;
pub use router::{RoutingInterceptor, TrafficRouter};

/// Backend generation serving a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    New,
    Legacy,
}

impl Generation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Generation::New => "new",
            Generation::Legacy => "legacy",
        }
    }

    /// The generation a mirrored write goes to.
    pub fn other(&self) -> Generation {
        match self {
            Generation::New => Generation::Legacy,
            Generation::Legacy => Generation::New,
        }
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Breaker and metrics key for one generation of a service.
pub fn destination_id(service: &str, generation: Generation) -> String {
    format!("{service}/{generation}")
}

/// Per-request routing outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutingDecision {
    pub service: String,
    pub generation: Generation,
    pub rollout_percentage: u8,
    pub bucket: u8,
}
