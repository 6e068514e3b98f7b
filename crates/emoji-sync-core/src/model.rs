//! Catalog entries as fetched from the remote and as stored in the mirror.
//!
//! Aliases are held in a [`BTreeSet`] on both sides: order never matters and
//! duplicates collapse, so comparing two alias sets is plain equality.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};

/// One emoji as reported by the remote catalog in the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogEntry {
    pub name: String,
    pub category: Option<String>,
    pub url: String,
    pub aliases: BTreeSet<String>,
}

impl CatalogEntry {
    /// Build an entry, dropping empty and whitespace-only aliases.
    pub fn new<I, S>(
        name: impl Into<String>,
        category: Option<String>,
        url: impl Into<String>,
        aliases: I,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            category,
            url: url.into(),
            aliases: normalize_aliases(aliases),
        }
    }
}

/// One emoji as currently persisted in the mirror.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorEntry {
    pub name: String,
    pub category: Option<String>,
    pub url: String,
    pub aliases: BTreeSet<String>,
    /// Run timestamp of the last create/update; also the suffix of the
    /// archived image key (see [`crate::archive::blob_key`]).
    pub updated_at: DateTime<Utc>,
}

impl MirrorEntry {
    /// `true` if `url`, `category` and the alias set all equal `other`'s.
    pub fn same_content(&self, other: &CatalogEntry) -> bool {
        self.url == other.url && self.category == other.category && self.aliases == other.aliases
    }
}

/// Collect aliases into a set, discarding blank ones.
pub fn normalize_aliases<I, S>(aliases: I) -> BTreeSet<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    aliases
        .into_iter()
        .map(Into::into)
        .filter(|alias| !alias.trim().is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_aliases_are_dropped() {
        let entry = CatalogEntry::new("grin", None, "https://e/grin.png", ["", "  ", "smile", "\t"]);
        assert_eq!(entry.aliases, BTreeSet::from(["smile".to_owned()]));
    }

    #[test]
    fn duplicate_aliases_collapse() {
        let entry = CatalogEntry::new("grin", None, "u", ["smile", "smile", "happy"]);
        assert_eq!(entry.aliases.len(), 2);
    }

    #[test]
    fn same_content_ignores_alias_order() {
        let fetched = CatalogEntry::new("a", Some("c".into()), "u", ["y", "x"]);
        let stored = MirrorEntry {
            name: "a".into(),
            category: Some("c".into()),
            url: "u".into(),
            aliases: normalize_aliases(["x", "y"]),
            updated_at: Utc::now(),
        };
        assert!(stored.same_content(&fetched));
    }
}
