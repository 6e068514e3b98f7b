//! Misskey API client.
//!
//! One client serves as both the [`CatalogSource`] (`POST /api/emojis`) and
//! the [`Notifier`] (`POST /api/notes/create`).

use std::time::Duration;

use reqwest::{Client, Url};
use serde::Serialize;
use tracing::debug;

use crate::catalog::{parse_catalog, CatalogSource};
use crate::error::{FetchError, NotifyError};
use crate::model::CatalogEntry;
use crate::notify::{Notifier, Visibility};

/// Shared HTTP client for every outbound request of the service.
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(concat!("emoji-sync/", env!("CARGO_PKG_VERSION")))
        .timeout(timeout)
        .build()
}

#[derive(Clone, Debug)]
pub struct MisskeyClient {
    client: Client,
    emojis_url: Url,
    notes_create_url: Url,
    token: String,
}

#[derive(Serialize)]
struct CreateNote<'a> {
    i: &'a str,
    visibility: Visibility,
    text: &'a str,
}

impl MisskeyClient {
    /// `origin` is the instance origin, e.g. `"https://misskey.io"`.
    pub fn new(client: Client, origin: &str, token: impl Into<String>) -> Result<Self, url::ParseError> {
        let origin = Url::parse(origin)?;
        Ok(Self {
            client,
            emojis_url: origin.join("/api/emojis")?,
            notes_create_url: origin.join("/api/notes/create")?,
            token: token.into(),
        })
    }
}

impl CatalogSource for MisskeyClient {
    async fn fetch(&self) -> Result<Vec<CatalogEntry>, FetchError> {
        let body = self
            .client
            .post(self.emojis_url.clone())
            .json(&serde_json::json!({}))
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let entries = parse_catalog(&body)?;
        debug!(count = entries.len(), "remote emojis fetched");
        Ok(entries)
    }
}

impl Notifier for MisskeyClient {
    async fn send(&self, text: &str, visibility: Visibility) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(self.notes_create_url.clone())
            .json(&CreateNote {
                i: &self.token,
                visibility,
                text,
            })
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            });
        }
        Ok(())
    }
}
