//! Dual-write subsystem.
//!
//! # Data Flow
//! ```text
//! Mutating request for a service with dual_write = true:
//!     → coordinator.rs (primary dispatch through the resilience chain, awaited)
//!     → supervisor.rs  (mirror to the other generation, out of band, capped timeout)
//!     → TelemetrySink  (MirrorCompleted / MirrorFailed for reconciliation)
//! ```
//!
//! # Design Decisions
//! - The client only ever waits for the primary
//! - Mirror failures are recorded, never returned
//! - Mirrors are single-attempt and keep running after the client request ends

pub mod coordinator;
pub mod supervisor;

use http::Method;
use serde::Serialize;

use crate::routing::Generation;

pub use coordinator::{DualWriteCoordinator, DualWriteExecution};
pub use supervisor::{MirrorFailure, MirrorStats, MirrorSupervisor};

/// What happened to one mutating request across both generations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DualWriteOutcome {
    pub service: String,
    pub primary: Generation,
    pub primary_written: bool,
    pub primary_status: Option<u16>,
    pub mirror_written: bool,
    pub mirror_status: Option<u16>,
}

/// Verbs that change backend state and are eligible for mirroring.
pub fn is_write_method(method: &Method) -> bool {
    matches!(
        *method,
        Method::POST | Method::PUT | Method::PATCH | Method::DELETE
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_methods() {
        assert!(is_write_method(&Method::POST));
        assert!(is_write_method(&Method::DELETE));
        assert!(!is_write_method(&Method::GET));
        assert!(!is_write_method(&Method::OPTIONS));
    }
}
