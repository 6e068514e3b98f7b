//! Periodic reconciliation.

use std::sync::Arc;
use std::time::Duration;

use emoji_sync_core::{CatalogSource, ImageArchiver, MarkerStore, MirrorStore, Notifier, Reconciler};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{error, info};

/// Run `reconciler` now and then every `period` until `shutdown` fires.
///
/// Runs are awaited inline, so two runs never overlap; ticks missed while a
/// run is in flight are skipped.  A run in progress when `shutdown` fires is
/// allowed to finish.
pub fn spawn<S, C, A, N>(
    reconciler: Arc<Reconciler<S, C, A, N>>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    S: MirrorStore + MarkerStore,
    C: CatalogSource,
    A: ImageArchiver,
    N: Notifier,
{
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(period_secs = period.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }
            match reconciler.run().await {
                Ok(report) => info!(
                    mode = ?report.mode,
                    added = report.added,
                    updated = report.updated,
                    deleted = report.deleted,
                    "scheduled run succeeded"
                ),
                Err(e) => error!(error = %e, "scheduled run failed; retrying on next tick"),
            }
        }

        info!("scheduler stopped");
    })
}
