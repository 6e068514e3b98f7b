//! Note texts for detected changes.
//!
//! Notes use Misskey markup: `$[x2 :name:]` renders the emoji enlarged and
//! `?[label](url)` is a silent link.  Image links go through the service's
//! `/redirect` endpoint; backup links point at the archived blob.

use std::collections::BTreeSet;

use reqwest::Url;

use crate::archive::blob_key;
use crate::diff::{ChangeSet, EntryChange};
use crate::model::{CatalogEntry, MirrorEntry};

const NONE: &str = "[none]";

/// Builds the public links embedded in notes.
#[derive(Clone, Debug)]
pub struct MessageLinks {
    redirect_url: Url,
    backup_url: Url,
}

impl MessageLinks {
    /// `base_url` is the public origin of this service, `backup_path` the
    /// path prefix under which archived blobs are served.
    pub fn new(base_url: &str, backup_path: &str) -> Result<Self, url::ParseError> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(url::ParseError::RelativeUrlWithCannotBeABaseBase);
        }
        let backup_path = match backup_path.trim_matches('/') {
            "" => "/".to_owned(),
            trimmed => format!("/{trimmed}/"),
        };
        Ok(Self {
            redirect_url: base.join("/redirect")?,
            backup_url: base.join(&backup_path)?,
        })
    }

    /// `<base>/redirect?to=<url>`.
    pub fn redirect(&self, target: &str) -> String {
        let mut url = self.redirect_url.clone();
        url.query_pairs_mut().append_pair("to", target);
        url.to_string()
    }

    /// Public URL of the blob archived under `key`.
    pub fn backup(&self, key: &str) -> String {
        let mut url = self.backup_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(key);
        }
        url.to_string()
    }

    pub fn added(&self, entry: &CatalogEntry) -> String {
        [
            "【Emoji added】".to_owned(),
            format!("$[x2 :{}:]", entry.name),
            format!("`:{}:`", entry.name),
            String::new(),
            format!("Category: {}", category(&entry.category)),
            format!("Aliases: {}", alias_list(&entry.aliases)),
            format!("?[Image]({})", self.redirect(&entry.url)),
        ]
        .join("\n")
    }

    /// Lists only the fields that changed.
    pub fn updated(&self, change: &EntryChange) -> String {
        let (old, new) = (&change.old, &change.new);
        let mut lines = vec![
            "【Emoji updated】".to_owned(),
            format!("$[x2 :{}:]", new.name),
            format!("`:{}:`", new.name),
            String::new(),
        ];
        if change.category_changed() {
            lines.push(format!(
                "Category: {} → {}",
                category(&old.category),
                category(&new.category)
            ));
        }
        if change.aliases_changed() {
            lines.push(format!(
                "Aliases: {} → {}",
                alias_list(&old.aliases),
                alias_list(&new.aliases)
            ));
        }
        if change.url_changed() {
            lines.push(format!(
                "?[Old image]({}) → ?[Image]({})",
                self.redirect(&old.url),
                self.redirect(&new.url)
            ));
            lines.push(format!(
                "If the old image is unavailable: ?[Old image backup]({})",
                self.backup(&blob_key(&old.name, old.updated_at))
            ));
        }
        lines.join("\n")
    }

    pub fn deleted(&self, entry: &MirrorEntry) -> String {
        [
            "【Emoji deleted】".to_owned(),
            format!("`:{}:`", entry.name),
            String::new(),
            format!("Category: {}", category(&entry.category)),
            format!("Aliases: {}", alias_list(&entry.aliases)),
            format!("?[Image]({})", self.redirect(&entry.url)),
            format!(
                "If the image is unavailable: ?[Image backup]({})",
                self.backup(&blob_key(&entry.name, entry.updated_at))
            ),
        ]
        .join("\n")
    }

    /// One message per change: added, then updated, then deleted.
    pub fn render(&self, changes: &ChangeSet) -> Vec<String> {
        changes
            .added
            .iter()
            .map(|e| self.added(e))
            .chain(changes.updated.iter().map(|c| self.updated(c)))
            .chain(changes.deleted.iter().map(|e| self.deleted(e)))
            .collect()
    }
}

fn category(category: &Option<String>) -> &str {
    category.as_deref().unwrap_or(NONE)
}

fn alias_list(aliases: &BTreeSet<String>) -> String {
    if aliases.is_empty() {
        return NONE.to_owned();
    }
    aliases.iter().map(String::as_str).collect::<Vec<_>>().join(", ")
}
