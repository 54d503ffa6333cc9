//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, body buffering, connect info)
//!     → pipeline::Gateway (correlation, deadline, rate limit, routing, forward)
//!     → server.rs (pipeline response → Axum response, metrics)
//!     → Send to client
//! ```

pub mod server;

pub use server::{AppState, HttpServer};
