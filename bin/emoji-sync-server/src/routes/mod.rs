//! Axum router construction.
//!
//! [`build`] assembles the public surface of the service:
//! - `GET /health`
//! - `GET /redirect?to=<url>`, the target of image links in notes
//! - `GET <backup prefix>{key}`, the archived image blobs

mod backup;
mod health;
mod redirect;

use std::sync::Arc;

use axum::Router;
use axum::middleware;

use crate::middleware::trace;
use crate::state::AppState;

/// Build the complete Axum [`Router`] for the application.
pub fn build(state: Arc<AppState>) -> Router {
    let backup_prefix = state.config.backup_route_prefix();

    Router::new()
        .merge(health::router())
        .merge(redirect::router())
        .merge(backup::router(&backup_prefix))
        .layer(middleware::from_fn(trace::trace_middleware))
        .with_state(state)
}
