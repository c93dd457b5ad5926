//! API routes

use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde_json::json;

use crate::state::AppState;

/// Create API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/healthz", get(super::health_check))
        // Buckets
        .route("/api/buckets", get(list_buckets))
        // Reports
        .route("/api/reports", post(save_report))
        .route("/save_report", post(save_report))
        // WebSocket
        .route("/ws", get(super::websocket::websocket_handler))
        .with_state(state)
}

async fn list_buckets(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.ledger.snapshot().await)
}

/// Append a CSV row from the ledger's current counts; request body is ignored
async fn save_report(State(state): State<AppState>) -> crate::Result<impl IntoResponse> {
    let buckets = state.ledger.snapshot().await;
    let row = state.reports.append(&buckets, chrono::Local::now()).await?;
    Ok(Json(json!({
        "status": "ok",
        "saved_to": state.reports.path().display().to_string(),
        "row": row,
    })))
}
