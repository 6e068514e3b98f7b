//! Remote catalog snapshot.

use std::future::Future;

use serde::Deserialize;

use crate::error::FetchError;
use crate::model::CatalogEntry;

/// Source of the authoritative emoji catalog.
pub trait CatalogSource: Send + Sync + 'static {
    /// Fetch the whole catalog in one request.  Aliases of every returned
    /// entry are already normalized.
    fn fetch(&self) -> impl Future<Output = Result<Vec<CatalogEntry>, FetchError>> + Send;
}

/// Body of the Misskey `emojis` endpoint.
#[derive(Debug, Deserialize)]
pub(crate) struct EmojisResponse {
    pub emojis: Vec<RemoteEmoji>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RemoteEmoji {
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    pub url: String,
    #[serde(default)]
    pub aliases: Vec<String>,
}

impl From<RemoteEmoji> for CatalogEntry {
    fn from(emoji: RemoteEmoji) -> Self {
        CatalogEntry::new(emoji.name, emoji.category, emoji.url, emoji.aliases)
    }
}

/// Decode an `emojis` response body into catalog entries.
pub(crate) fn parse_catalog(body: &[u8]) -> Result<Vec<CatalogEntry>, FetchError> {
    let response: EmojisResponse = serde_json::from_slice(body)?;
    Ok(response.emojis.into_iter().map(CatalogEntry::from).collect())
}
