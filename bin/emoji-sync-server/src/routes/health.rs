//! Health / heartbeat endpoint.

use std::sync::Arc;

use axum::routing::get;
use axum::{Json, Router};
use serde_json::{Value, json};

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(get_health))
}

/// Returns `{"status": "ok", "version": "..."}` with HTTP 200.
pub async fn get_health() -> Json<Value> {
    Json(json!({
        "status":  "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── Tests ──────────────────────────────────────────────────────────────────────
