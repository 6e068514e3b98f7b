//! Shared application state injected into every Axum handler.

use std::sync::Arc;

use emoji_sync_core::FsBlobStore;

use crate::config::Config;

#[derive(Clone, Debug)]
pub struct AppState {
    /// Server configuration (env-derived).
    pub config: Arc<Config>,
    /// Archived images, written by the reconciler and served read-only here.
    pub blobs: FsBlobStore,
}
