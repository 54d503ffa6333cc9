//! Migration gateway library.
//!
//! Front door for a system moving traffic from a legacy backend generation to
//! a new one: rate limiting, deterministic percentage rollout, retries behind
//! per-destination circuit breakers, and optional mirrored writes.

pub mod admin;
pub mod config;
pub mod dual_write;
pub mod error;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod pipeline;
pub mod resilience;
pub mod routing;
pub mod security;
pub mod transport;

pub use config::GatewayConfig;
pub use error::GatewayError;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use pipeline::{Gateway, GatewayDeps};
