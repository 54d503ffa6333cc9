//! Operator API: breaker, routing and mirror state.
//!
//! Served on its own listener (`admin.bind_address`) and guarded by a bearer
//! API key.

pub mod auth;
pub mod handlers;

use std::sync::Arc;
use std::time::Instant;

use axum::{middleware, routing::get, Router};

use crate::pipeline::Gateway;

use self::auth::admin_auth_middleware;
use self::handlers::*;

/// Shared state for admin handlers.
#[derive(Clone)]
pub struct AdminState {
    pub gateway: Arc<Gateway>,
    pub started: Instant,
}

impl AdminState {
    pub fn new(gateway: Arc<Gateway>) -> Self {
        Self {
            gateway,
            started: Instant::now(),
        }
    }
}

pub fn setup_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/admin/status", get(get_status))
        .route("/admin/circuits", get(get_circuits))
        .route("/admin/routing", get(get_routing))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ))
        .with_state(state)
}
