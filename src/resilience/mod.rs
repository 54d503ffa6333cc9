//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Outbound dispatch to a destination ("{service}/{generation}"):
//!     → circuit_breaker.rs (admit, fail fast, or admit the single probe)
//!     → transport (per-attempt timeout)
//!     → retries.rs (transient? eligible?) → backoff.rs (delay + jitter)
//!     → circuit_breaker.rs (record outcome, maybe transition)
//! ```
//!
//! # Design Decisions
//! - Every attempt passes the breaker; an open circuit never reaches the network
//! - Retries stop on cancellation (deadline or client disconnect)
//! - Breaker state is lock-free; transitions are compare-and-swap

pub mod backoff;
pub mod chain;
pub mod circuit_breaker;
pub mod retries;

pub use chain::{Attempts, ResiliencePolicyChain};
pub use circuit_breaker::{BreakerRegistry, BreakerState, CircuitBreaker, CircuitSnapshot};
