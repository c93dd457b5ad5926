//! WebAPI - HTTP and WebSocket endpoints
//!
//! ## Responsibilities
//!
//! - `/ws`: control commands in, frames and events out
//! - Health, bucket snapshot and report export over REST

mod routes;
mod websocket;

pub use routes::create_router;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::state::AppState;

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub connections: u64,
    pub actuator: String,
    pub conveyor_running: bool,
    pub conveyor_owned: bool,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        connections: state.realtime.connection_count(),
        actuator: state.actuators.describe(),
        conveyor_running: state.actuators.is_running(),
        conveyor_owned: state.actuators.is_owned(),
    })
}
