//! emoji-sync-core – reconciliation engine for the Misskey emoji mirror.
//!
//! One reconciliation run fetches the remote emoji catalog, diffs it against
//! the SQLite mirror, applies the minimal set of writes, archives changed
//! images and posts one note per change.  See [`sync::Reconciler`].

pub mod archive;
pub mod catalog;
pub mod diff;
pub mod error;
pub mod message;
pub mod misskey;
pub mod model;
pub mod notify;
pub mod store;
pub mod sync;

#[cfg(test)]
mod test_support;

pub use archive::{blob_key, BlobStore, FsBlobStore, HttpArchiver, ImageArchiver};
pub use catalog::CatalogSource;
pub use diff::{diff, ChangeSet, EntryChange};
pub use error::{ArchiveError, FetchError, MirrorError, NotifyError, SyncError};
pub use message::MessageLinks;
pub use misskey::MisskeyClient;
pub use model::{CatalogEntry, MirrorEntry};
pub use notify::{Notifier, Visibility};
pub use store::sqlite::SqliteStore;
pub use store::{ListFilter, MarkerStore, MirrorStore};
pub use sync::{Reconciler, RunMode, RunReport, MARKER_KEY};
