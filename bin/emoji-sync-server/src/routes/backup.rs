//! Read-only access to archived emoji images.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{header, HeaderName, HeaderValue};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use emoji_sync_core::BlobStore;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::debug;

use crate::error::ServerError;
use crate::state::AppState;

/// Blobs are immutable once written.
const IMMUTABLE: &str = "public, max-age=31536000, immutable";

/// `prefix` must start and end with `/`.
pub fn router(prefix: &str) -> Router<Arc<AppState>> {
    Router::new()
        .route(&format!("{prefix}{{key}}"), get(get_backup))
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("x-content-type-options"),
            HeaderValue::from_static("nosniff"),
        ))
}

pub async fn get_backup(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
) -> Result<impl IntoResponse, ServerError> {
    let bytes = state
        .blobs
        .get(&key)
        .await?
        .ok_or_else(|| ServerError::NotFound(format!("no backup for {key}")))?;

    let content_type = image::guess_format(&bytes)
        .map(|format| format.to_mime_type())
        .unwrap_or("application/octet-stream");
    debug!(key = %key, size = bytes.len(), content_type, "serving backup");

    Ok((
        [
            (header::CONTENT_TYPE, content_type),
            (header::CACHE_CONTROL, IMMUTABLE),
        ],
        bytes,
    ))
}
