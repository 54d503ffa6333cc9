use axum::{extract::State, Json};
use serde::Serialize;

use crate::admin::AdminState;
use crate::dual_write::MirrorStats;
use crate::resilience::CircuitSnapshot;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub services: usize,
    pub mirrors: MirrorStats,
}

#[derive(Serialize)]
pub struct ServiceRouting {
    pub name: String,
    pub path_prefix: String,
    pub rollout_percentage: u8,
    pub force_legacy: bool,
    pub dual_write: bool,
    pub legacy_configured: bool,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started.elapsed().as_secs(),
        services: state.gateway.config().snapshot().services.len(),
        mirrors: state.gateway.supervisor().stats(),
    })
}

pub async fn get_circuits(State(state): State<AdminState>) -> Json<Vec<CircuitSnapshot>> {
    Json(state.gateway.breakers().snapshots())
}

pub async fn get_routing(State(state): State<AdminState>) -> Json<Vec<ServiceRouting>> {
    let config = state.gateway.config().snapshot();
    let services = config
        .services
        .iter()
        .map(|s| ServiceRouting {
            name: s.name.clone(),
            path_prefix: s.prefix(),
            rollout_percentage: s.rollout_percentage,
            force_legacy: s.force_legacy,
            dual_write: s.dual_write,
            legacy_configured: s.legacy_base_url.is_some(),
        })
        .collect();
    Json(services)
}
