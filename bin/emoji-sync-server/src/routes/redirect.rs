//! Redirect endpoint used by image links in notes.
//!
//! Notes never embed remote image URLs directly; they link here so the
//! instance renders a plain link instead of fetching the image.

use std::sync::Arc;

use axum::extract::Query;
use axum::http::HeaderValue;
use axum::response::Redirect;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::error::ServerError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/redirect", get(redirect))
}

#[derive(Debug, Deserialize)]
pub struct RedirectQuery {
    #[serde(default)]
    to: Option<String>,
}

/// `303 See Other` to `to`.
pub async fn redirect(Query(query): Query<RedirectQuery>) -> Result<Redirect, ServerError> {
    let target = query
        .to
        .filter(|to| !to.is_empty())
        .ok_or_else(|| ServerError::NotFound("missing redirect target".to_owned()))?;
    // `Redirect::to` panics on values that cannot be sent as a header.
    if HeaderValue::from_str(&target).is_err() {
        return Err(ServerError::BadRequest("invalid redirect target".to_owned()));
    }
    Ok(Redirect::to(&target))
}
