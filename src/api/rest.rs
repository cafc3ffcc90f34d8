// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Read-only dashboard surface under `/api/v1/`. There is no authentication
// in this core and no control endpoints: trading is always simulated and the
// engine lifecycle belongs to the process, not the API.
//
// CORS is configured permissively for development.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Query, State},
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;

/// Build the full REST router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/status", get(status))
        .route("/api/v1/analysis", get(latest_analysis))
        .route("/api/v1/trades", get(trades))
        .route("/api/v1/progress", get(progress))
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "state_version": state.current_state_version(),
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

/// Engine status: run state, open position, performance, daily-loss circuit.
async fn status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.status())
}

/// The most recent analysis report (5 min TTL). Always well-formed when
/// present; `null` only before the first iteration completes.
async fn latest_analysis(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.latest_analysis.get() {
        Some(report) => Json(serde_json::json!({ "analysis": report })).into_response(),
        None => Json(serde_json::json!({
            "analysis": null,
            "message": "no analysis available yet"
        }))
        .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct TradesQuery {
    limit: Option<usize>,
}

/// The trade log, newest first.
async fn trades(
    Query(query): Query<TradesQuery>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let limit = query.limit.unwrap_or(50).min(500);
    Json(state.position_book.trade_history(limit))
}

/// The latest progress milestone (15 s TTL).
async fn progress(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.progress.get() {
        Some(p) => Json(serde_json::json!({ "progress": p })).into_response(),
        None => Json(serde_json::json!({ "progress": null })).into_response(),
    }
}
