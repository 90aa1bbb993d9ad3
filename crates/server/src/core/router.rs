//! Core Router
//!
//! Shared infrastructure routes.

use crate::core::AppState;
use axum::{extract::State, routing::get, Json, Router};
use serde_json::{json, Value};

pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}

/// GET /health
async fn health_check(State(state): State<AppState>) -> Json<Value> {
    let presence = state.relay.presence();
    Json(json!({
        "status": "ok",
        "connections": presence.connection_count(),
        "online": presence.online_identities().len(),
    }))
}
