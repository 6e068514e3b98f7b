//! Three-way diff between the fetched catalog and the mirror snapshot.

use std::collections::HashMap;

use tracing::warn;

use crate::model::{CatalogEntry, MirrorEntry};

/// An entry present on both sides whose content differs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryChange {
    pub old: MirrorEntry,
    pub new: CatalogEntry,
}

impl EntryChange {
    pub fn url_changed(&self) -> bool {
        self.old.url != self.new.url
    }

    pub fn category_changed(&self) -> bool {
        self.old.category != self.new.category
    }

    pub fn aliases_changed(&self) -> bool {
        self.old.aliases != self.new.aliases
    }
}

/// The changes needed to bring the mirror in line with the remote catalog.
///
/// A name appears in at most one of the three lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub added: Vec<CatalogEntry>,
    pub updated: Vec<EntryChange>,
    pub deleted: Vec<MirrorEntry>,
}

impl ChangeSet {
    /// Treat every fetched entry as new; used when no marker exists yet.
    pub fn bootstrap(fetched: Vec<CatalogEntry>) -> Self {
        Self {
            added: dedup_by_name(fetched),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }

    /// Number of storage mutations applying this change set takes.
    pub fn len(&self) -> usize {
        self.added.len() + self.updated.len() + self.deleted.len()
    }
}

/// Collapse repeated names, keeping the position of the first occurrence and
/// the content of the last.
fn dedup_by_name(fetched: Vec<CatalogEntry>) -> Vec<CatalogEntry> {
    let mut index: HashMap<String, usize> = HashMap::with_capacity(fetched.len());
    let mut unique: Vec<CatalogEntry> = Vec::with_capacity(fetched.len());
    for entry in fetched {
        match index.get(&entry.name) {
            Some(&at) => {
                warn!(name = %entry.name, "duplicate emoji name in remote catalog; keeping the last");
                unique[at] = entry;
            }
            None => {
                index.insert(entry.name.clone(), unique.len());
                unique.push(entry);
            }
        }
    }
    unique
}

/// Compute added / updated / deleted between `fetched` and `mirrored`.
///
/// A name repeated in `fetched` counts once, with its last content.
/// Entries identical in url, category and alias set produce nothing.
/// Whatever mirrored entry is not matched by a fetched name is deleted; the
/// deleted list keeps the mirror's order.
pub fn diff(fetched: Vec<CatalogEntry>, mirrored: Vec<MirrorEntry>) -> ChangeSet {
    let order: Vec<String> = mirrored.iter().map(|e| e.name.clone()).collect();
    let mut remaining: HashMap<String, MirrorEntry> =
        mirrored.into_iter().map(|e| (e.name.clone(), e)).collect();

    let mut changes = ChangeSet::default();
    for entry in dedup_by_name(fetched) {
        match remaining.remove(&entry.name) {
            None => changes.added.push(entry),
            Some(old) if old.same_content(&entry) => {}
            Some(old) => changes.updated.push(EntryChange { old, new: entry }),
        }
    }

    changes.deleted = order
        .iter()
        .filter_map(|name| remaining.remove(name))
        .collect();
    changes
}
