//! emoji-sync-server – entry point.
//!
//! Startup order:
//! 1. Parse the command line and configuration from environment variables.
//! 2. Initialise structured tracing (JSON or pretty, optional rolling file).
//! 3. Open the SQLite mirror and run pending migrations.
//! 4. Wire the Misskey client, blob archive and reconciler.
//! 5. `sync`: run once and exit.  `serve`: start the scheduler and the HTTP
//!    server with graceful shutdown.

mod config;
mod error;
mod middleware;
mod routes;
mod scheduler;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use emoji_sync_core::misskey::build_http_client;
use emoji_sync_core::{
    FsBlobStore, HttpArchiver, MessageLinks, MisskeyClient, Reconciler, SqliteStore, Visibility,
};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;
use crate::state::AppState;

#[derive(Debug, Parser)]
#[command(name = "emoji-sync-server", version, about = "Mirror a Misskey instance's custom emojis")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Clone, Copy, Default, Subcommand)]
enum Command {
    /// Serve HTTP and reconcile on a fixed interval (default).
    #[default]
    Serve,
    /// Run one reconciliation and exit.
    Sync,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Command line & configuration ────────────────────────────────────────
    let cli = Cli::parse();
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let _log_guard = init_tracing(&cfg);
    info!(version = env!("CARGO_PKG_VERSION"), dev = cfg.dev, "emoji-sync-server starting");

    // ── 3. Database ────────────────────────────────────────────────────────────
    let store = SqliteStore::connect(&cfg.database_url)
        .await
        .with_context(|| format!("opening database {}", cfg.database_url))?;
    info!(database_url = %cfg.database_url, "database ready");

    // ── 4. Collaborators ───────────────────────────────────────────────────────
    let http = build_http_client(cfg.http_timeout)?;
    let misskey = MisskeyClient::new(http.clone(), &cfg.misskey_url, cfg.misskey_token.clone())
        .with_context(|| format!("invalid MK_URL {:?}", cfg.misskey_url))?;
    if cfg.misskey_token.is_empty() {
        warn!("MK_TOKEN is empty; notes will be rejected by the instance");
    }
    let blobs = FsBlobStore::new(&cfg.blob_dir);
    let links = MessageLinks::new(&cfg.backup_base_url, &cfg.backup_path)
        .with_context(|| format!("invalid IMAGE_BACKUP_BASE_URL {:?}", cfg.backup_base_url))?;
    let visibility = if cfg.dev {
        Visibility::Specified
    } else {
        Visibility::Public
    };
    let reconciler = Arc::new(
        Reconciler::new(
            store,
            misskey.clone(),
            HttpArchiver::new(http, blobs.clone()),
            misskey,
            links,
        )
        .with_visibility(visibility),
    );

    // ── 5. Run ─────────────────────────────────────────────────────────────────
    match cli.command.unwrap_or_default() {
        Command::Sync => {
            let report = reconciler.run().await.context("reconciliation failed")?;
            info!(
                mode = ?report.mode,
                added = report.added,
                updated = report.updated,
                deleted = report.deleted,
                "reconciliation finished"
            );
        }
        Command::Serve => {
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let scheduler = scheduler::spawn(Arc::clone(&reconciler), cfg.sync_interval, shutdown_rx);

            let state = Arc::new(AppState {
                config: Arc::new(cfg.clone()),
                blobs,
            });
            let app = routes::build(state);
            let addr: SocketAddr = cfg.bind_address.parse()?;
            let listener = tokio::net::TcpListener::bind(addr).await?;
            info!(%addr, "HTTP server listening");

            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            // Let an in-flight run finish before the process exits.
            let _ = shutdown_tx.send(true);
            if let Err(e) = scheduler.await {
                warn!(error = %e, "scheduler task ended abnormally");
            }
        }
    }

    info!("emoji-sync-server stopped");
    Ok(())
}

/// Install the global subscriber.  The returned guard flushes the rolling
/// file writer on drop and must live until `main` returns.
fn init_tracing(cfg: &Config) -> Option<WorkerGuard> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: EMOJI_SYNC_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                EnvFilter::new("info")
            }
        },
    };

    let (file_layer, guard) = match &cfg.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "emoji-sync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let json_layer = cfg
        .log_json
        .then(|| fmt::layer().json().with_target(true).with_thread_ids(true));
    let text_layer = (!cfg.log_json).then(|| fmt::layer().with_target(true).with_thread_ids(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .init();

    guard
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c   => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
