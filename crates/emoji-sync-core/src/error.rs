//! Error types for every stage of a reconciliation run.
//!
//! Only [`FetchError`], [`MirrorError`] and the apply failure abort a run.
//! [`ArchiveError`] and [`NotifyError`] are logged by the reconciler and
//! never propagate out of it.

use thiserror::Error;

/// The remote catalog could not be retrieved.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Network error or non-2xx status.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body was not a valid catalog payload.
    #[error("malformed catalog payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Errors returned by the mirror store.
#[derive(Debug, Error)]
pub enum MirrorError {
    /// No entry with the given name is stored.
    #[error("emoji not found: {0}")]
    NotFound(String),

    /// Propagated from SQLite.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl MirrorError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, MirrorError::NotFound(_))
    }
}

/// An image could not be archived.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// Downloading the image failed.
    #[error("image download failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Writing the blob failed.
    #[error("blob I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Blobs are immutable; the key has already been written.
    #[error("blob already exists: {0}")]
    AlreadyExists(String),

    /// The key would escape the blob root.
    #[error("invalid blob key: {0}")]
    InvalidKey(String),
}

/// A notification could not be delivered.
#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The sink answered with a non-2xx status.
    #[error("notification rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Run-level failure of [`crate::sync::Reconciler::run`].
///
/// The marker is never advanced when a run ends with one of these, so the
/// next scheduled run recomputes the same pending changes.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("fetching the remote catalog failed: {0}")]
    Fetch(#[from] FetchError),

    /// Reading or writing the last-run marker failed.
    #[error("marker store error: {0}")]
    Marker(#[source] sqlx::Error),

    /// Reading the current mirror snapshot failed.
    #[error("reading the mirror failed: {0}")]
    Mirror(#[from] MirrorError),

    /// At least one storage mutation failed; details were logged per entry.
    #[error("{failed} of {total} storage mutations failed")]
    Apply { failed: usize, total: usize },
}
