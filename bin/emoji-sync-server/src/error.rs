//! Unified server error type.
//!
//! Every handler returns `Result<T, ServerError>`, which implements
//! [`axum::response::IntoResponse`] so errors become a JSON-body HTTP
//! response with an appropriate status code.  Internal errors are logged in
//! full and answered with a generic message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use emoji_sync_core::ArchiveError;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// The caller referenced a resource that does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The caller sent an invalid or malformed request.
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl From<ArchiveError> for ServerError {
    fn from(e: ArchiveError) -> Self {
        match e {
            ArchiveError::InvalidKey(key) => ServerError::BadRequest(format!("invalid key: {key}")),
            other => ServerError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let (status, client_message) = match &self {
            ServerError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ServerError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ServerError::Internal(m) => {
                error!(message = %m, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_owned(),
                )
            }
        };
        (status, Json(json!({ "error": client_message }))).into_response()
    }
}
