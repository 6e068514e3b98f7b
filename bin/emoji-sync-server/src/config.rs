//! Server configuration, loaded from environment variables at startup.

use std::time::Duration;

/// Runtime configuration for emoji-sync-server.
///
/// Every field has a default so the server starts without any environment
/// variables set.  URL-typed values are only validated when the
/// collaborators are built in `main`.
#[derive(Debug, Clone)]
pub struct Config {
    /// TCP address to bind (default: `"0.0.0.0:3000"`).
    pub bind_address: String,

    /// SQLite database URL (default: `"sqlite://emoji-sync.db"`).
    pub database_url: String,

    /// Root directory of the archived image blobs.
    pub blob_dir: String,

    /// Period between two scheduled reconciliation runs.
    pub sync_interval: Duration,

    /// Per-request timeout for every outbound HTTP call.
    pub http_timeout: Duration,

    /// `tracing` filter string, e.g. `"info"` or `"debug,sqlx=warn"`.
    pub log_level: String,

    /// When `true`, emit log records as newline-delimited JSON.
    pub log_json: bool,

    /// When set, logs are also written to a daily rolling file here.
    pub log_dir: Option<String>,

    /// Development mode: notes are only visible to mentioned users.
    pub dev: bool,

    /// Origin of the Misskey instance.
    pub misskey_url: String,

    /// API token for `notes/create`.
    pub misskey_token: String,

    /// Public origin of this service, used in note links.
    pub backup_base_url: String,

    /// Public path prefix of the archived blobs, e.g. `"/image-backup/"`.
    pub backup_path: String,
}

impl Config {
    /// Build [`Config`] from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            bind_address: env_or("EMOJI_SYNC_BIND", "0.0.0.0:3000"),
            database_url: env_or("EMOJI_SYNC_DATABASE_URL", "sqlite://emoji-sync.db"),
            blob_dir: env_or("EMOJI_SYNC_BLOB_DIR", "./blobs"),
            sync_interval: Duration::from_secs(parse_env("EMOJI_SYNC_INTERVAL_SECS", 600).max(1)),
            http_timeout: Duration::from_secs(parse_env("EMOJI_SYNC_HTTP_TIMEOUT_SECS", 30)),
            log_level: env_or("EMOJI_SYNC_LOG", "info"),
            log_json: env_flag("EMOJI_SYNC_LOG_JSON"),
            log_dir: std::env::var("EMOJI_SYNC_LOG_DIR").ok().filter(|v| !v.is_empty()),
            dev: env_flag("EMOJI_SYNC_DEV"),
            misskey_url: env_or("MK_URL", "https://misskey.io"),
            misskey_token: env_or("MK_TOKEN", ""),
            backup_base_url: env_or("IMAGE_BACKUP_BASE_URL", "http://localhost:3000"),
            backup_path: env_or("IMAGE_BACKUP_PATH", "/image-backup/"),
        }
    }

    /// Route prefix of the blob endpoint, always `/`-delimited on both ends.
    pub fn backup_route_prefix(&self) -> String {
        match self.backup_path.trim_matches('/') {
            "" => "/".to_owned(),
            trimmed => format!("/{trimmed}/"),
        }
    }
}

// ── private helpers ──────────────────────────────────────────────────────────

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_owned())
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
