//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Policy code (rate limiter, breakers, router, mirrors):
//!     → telemetry.rs (TelemetryEvent through an injected TelemetrySink)
//!         → tracing events (structured, correlation id in span)
//!         → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Correlation id flows through all subsystems as a span field
//! - Metrics are cheap (atomic increments)
//! - The sink is a trait so tests can record events instead of logging them

pub mod logging;
pub mod metrics;
pub mod telemetry;

pub use telemetry::{RecordingTelemetry, TelemetryEvent, TelemetrySink, TracingTelemetry};
