//! Persistence layer.
//!
//! [`MirrorStore`] owns the mirrored emoji snapshot (entries plus their
//! alias sets) and [`MarkerStore`] holds the scalar last-run marker.  The
//! default implementation of both is [`sqlite::SqliteStore`].  To swap to
//! another database, implement these traits for the new type and hand it to
//! [`crate::sync::Reconciler`].
//!
//! All trait methods use `impl Future` in their signatures so no extra
//! `async-trait` crate is required.

pub mod sqlite;

use std::future::Future;

use chrono::{DateTime, Utc};

use crate::error::MirrorError;
use crate::model::{CatalogEntry, MirrorEntry};

/// Optional conditions for [`MirrorStore::list_filtered`], combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilter {
    /// Exact category match.
    pub category: Option<String>,
    /// Only entries carrying this alias.
    pub alias: Option<String>,
    /// `updated_at >= since`.
    pub since: Option<DateTime<Utc>>,
    /// `updated_at < until`.
    pub until: Option<DateTime<Utc>>,
}

/// Read/write access to the mirrored snapshot.
pub trait MirrorStore: Send + Sync + 'static {
    /// Every stored entry with its aliases, ordered by name.  Entries with no
    /// aliases carry an empty set.
    fn list(&self) -> impl Future<Output = Result<Vec<MirrorEntry>, MirrorError>> + Send {
        async move {
            let filter = ListFilter::default();
            self.list_filtered(&filter).await
        }
    }

    /// Entries matching `filter`, ordered by name.
    fn list_filtered(
        &self,
        filter: &ListFilter,
    ) -> impl Future<Output = Result<Vec<MirrorEntry>, MirrorError>> + Send;

    /// A single entry, or [`MirrorError::NotFound`].
    fn get(&self, name: &str) -> impl Future<Output = Result<MirrorEntry, MirrorError>> + Send;

    /// Create or update `entry`, stamping it with `updated_at`.
    ///
    /// Only the aliases that differ from the stored set are inserted or
    /// deleted.  The entry row and its alias writes commit atomically.
    fn upsert(
        &self,
        entry: &CatalogEntry,
        updated_at: DateTime<Utc>,
    ) -> impl Future<Output = Result<MirrorEntry, MirrorError>> + Send;

    /// Delete an entry (its aliases cascade) and return what was stored.
    fn remove(&self, name: &str) -> impl Future<Output = Result<MirrorEntry, MirrorError>> + Send;
}

/// Small key/value store for the last-run marker.
pub trait MarkerStore: Send + Sync + 'static {
    fn get_marker(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<String>, sqlx::Error>> + Send;

    fn set_marker(
        &self,
        key: &str,
        value: &str,
    ) -> impl Future<Output = Result<(), sqlx::Error>> + Send;
}
