//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → rate_limit.rs (per-IP quota, then per-identity quota)
//!     → identity.rs (bearer token → hashed identity key)
//!     → counter_store.rs (atomic increment-with-expiry, memory or Redis)
//!     → Pass to routing
//! ```
//!
//! # Design Decisions
//! - Quota checks reject early, before any routing or upstream work
//! - Raw credentials never leave this module; only their hash is used
//! - Counter store outages fail open

pub mod counter_store;
pub mod identity;
pub mod rate_limit;

pub use counter_store::{CounterStore, InMemoryCounterStore, RedisCounterStore, StoreError};
pub use rate_limit::{
    ManualClock, RateDecision, RateLimitInterceptor, RateLimiter, RateScope, SystemClock,
    WindowClock,
};
