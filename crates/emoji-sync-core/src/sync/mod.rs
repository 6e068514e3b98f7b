//! Reconciliation run orchestration.
//!
//! A run goes through
//! `CheckMarker → Fetch → (Bootstrap | Diff) → ApplyStorage → ArchiveImages → Notify → WriteMarker`.
//!
//! Fetch, marker and storage failures abort the run before the marker is
//! written, so the next tick retries the same work.  Archival and notification
//! failures are logged and counted but never abort a run.


use chrono::{DateTime, Utc};
use futures::future::join_all;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::archive::{blob_key, ImageArchiver};
use crate::catalog::CatalogSource;
use crate::diff::{diff, ChangeSet};
use crate::error::SyncError;
use crate::message::MessageLinks;
use crate::notify::{Notifier, Visibility};
use crate::store::{MarkerStore, MirrorStore};

/// Marker key recording the timestamp of the last successful run.
pub const MARKER_KEY: &str = "last-updated";

/// Whether a run seeded the mirror or diffed against it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// No marker was found: every fetched entry was treated as added.
    Bootstrap,
    Incremental,
}

/// Outcome of a successful run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub mode: RunMode,
    pub added: usize,
    pub updated: usize,
    pub deleted: usize,
    pub archived: usize,
    pub archive_failures: usize,
    pub notified: usize,
    pub notify_failures: usize,
}

impl RunReport {
    fn new(mode: RunMode, changes: &ChangeSet) -> Self {
        Self {
            mode,
            added: changes.added.len(),
            updated: changes.updated.len(),
            deleted: changes.deleted.len(),
            archived: 0,
            archive_failures: 0,
            notified: 0,
            notify_failures: 0,
        }
    }

    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Converges the mirror onto the remote catalog.
pub struct Reconciler<S, C, A, N> {
    store: S,
    source: C,
    archiver: A,
    notifier: N,
    links: MessageLinks,
    visibility: Visibility,
}

impl<S, C, A, N> Reconciler<S, C, A, N>
where
    S: MirrorStore + MarkerStore,
    C: CatalogSource,
    A: ImageArchiver,
    N: Notifier,
{
    pub fn new(store: S, source: C, archiver: A, notifier: N, links: MessageLinks) -> Self {
        Self {
            store,
            source,
            archiver,
            notifier,
            links,
            visibility: Visibility::default(),
        }
    }

    /// Visibility of posted notes (default: public).
    pub fn with_visibility(mut self, visibility: Visibility) -> Self {
        self.visibility = visibility;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Run once, stamped with the current time.
    pub async fn run(&self) -> Result<RunReport, SyncError> {
        self.run_at(Utc::now()).await
    }

    /// Run once, stamped with `run_at`.
    ///
    /// The stamp becomes the `updated_at` of every written entry, the suffix
    /// of every archived image key and the new marker value.
    pub async fn run_at(&self, run_at: DateTime<Utc>) -> Result<RunReport, SyncError> {
        let run_id = Uuid::new_v4();
        // Stored timestamps have millisecond precision.
        let run_at = DateTime::<Utc>::from_timestamp_millis(run_at.timestamp_millis()).unwrap_or(run_at);
        self.execute(run_at)
            .instrument(info_span!("sync_run", %run_id, run_at = %run_at.to_rfc3339()))
            .await
    }

    async fn execute(&self, run_at: DateTime<Utc>) -> Result<RunReport, SyncError> {
        let marker = self
            .store
            .get_marker(MARKER_KEY)
            .await
            .map_err(SyncError::Marker)?;

        let fetched = self.source.fetch().await?;
        info!(count = fetched.len(), "remote catalog fetched");

        let (mode, changes) = match marker {
            None => {
                info!("no marker found; bootstrapping the mirror");
                (RunMode::Bootstrap, ChangeSet::bootstrap(fetched))
            }
            Some(last_run) => {
                let mirrored = self.store.list().await?;
                debug!(last_run = %last_run, mirrored = mirrored.len(), "mirror snapshot loaded");
                (RunMode::Incremental, diff(fetched, mirrored))
            }
        };

        let mut report = RunReport::new(mode, &changes);
        if changes.is_empty() {
            info!("mirror already up to date");
            self.write_marker(run_at).await?;
            return Ok(report);
        }
        info!(
            added = report.added,
            updated = report.updated,
            deleted = report.deleted,
            "changes detected"
        );

        self.apply(&changes, run_at).await?;

        let (archived, archive_failures) = self.archive_images(&changes, run_at).await;
        report.archived = archived;
        report.archive_failures = archive_failures;

        let (notified, notify_failures) = self.notify(&changes).await;
        report.notified = notified;
        report.notify_failures = notify_failures;

        self.write_marker(run_at).await?;
        info!(
            archived,
            archive_failures, notified, notify_failures, "reconciliation run finished"
        );
        Ok(report)
    }

    /// Write every change to the mirror, one transaction per entry.
    async fn apply(&self, changes: &ChangeSet, run_at: DateTime<Utc>) -> Result<(), SyncError> {
        let mut failed = 0;

        let upserts = changes
            .added
            .iter()
            .chain(changes.updated.iter().map(|change| &change.new));
        for entry in upserts {
            if let Err(e) = self.store.upsert(entry, run_at).await {
                error!(name = %entry.name, error = %e, "failed to save emoji");
                failed += 1;
            }
        }

        for entry in &changes.deleted {
            match self.store.remove(&entry.name).await {
                Ok(_) => {}
                Err(e) if e.is_not_found() => {
                    debug!(name = %entry.name, "emoji already removed");
                }
                Err(e) => {
                    error!(name = %entry.name, error = %e, "failed to remove emoji");
                    failed += 1;
                }
            }
        }

        if failed > 0 {
            return Err(SyncError::Apply {
                failed,
                total: changes.len(),
            });
        }
        debug!(total = changes.len(), "mirror updated");
        Ok(())
    }

    /// Archive images of added entries and of updated entries with a new URL.
    /// Returns `(archived, failed)`.
    async fn archive_images(&self, changes: &ChangeSet, run_at: DateTime<Utc>) -> (usize, usize) {
        let targets = changes.added.iter().chain(
            changes
                .updated
                .iter()
                .filter(|change| change.url_changed())
                .map(|change| &change.new),
        );

        let results = join_all(targets.map(|entry| async move {
            let key = blob_key(&entry.name, run_at);
            match self.archiver.archive(&key, &entry.url).await {
                Ok(size) => {
                    debug!(key = %key, size, "emoji image archived");
                    true
                }
                Err(e) => {
                    warn!(name = %entry.name, url = %entry.url, error = %e, "failed to archive emoji image");
                    false
                }
            }
        }))
        .await;

        count_outcomes(&results)
    }

    /// Send one note per change.  Returns `(sent, failed)`.
    async fn notify(&self, changes: &ChangeSet) -> (usize, usize) {
        let messages = self.links.render(changes);
        let visibility = self.visibility;

        let results = join_all(messages.iter().map(|text| async move {
            match self.notifier.send(text, visibility).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "failed to send notification");
                    false
                }
            }
        }))
        .await;

        count_outcomes(&results)
    }

    async fn write_marker(&self, run_at: DateTime<Utc>) -> Result<(), SyncError> {
        self.store
            .set_marker(MARKER_KEY, &run_at.to_rfc3339())
            .await
            .map_err(SyncError::Marker)
    }
}

fn count_outcomes(results: &[bool]) -> (usize, usize) {
    let ok = results.iter().filter(|ok| **ok).count();
    (ok, results.len() - ok)
}
