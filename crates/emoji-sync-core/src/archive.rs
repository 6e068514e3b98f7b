//! Durable image archival.
//!
//! Images of added emojis and of emojis whose URL changed are copied into a
//! [`BlobStore`] under [`blob_key`], so a note can still link to an image
//! after the instance replaced or deleted it.  Blobs are write-once.

use std::future::Future;
use std::io::ErrorKind;
use std::path::PathBuf;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

use crate::error::ArchiveError;

/// Key of the image archived for `name` by the run stamped `at`.
pub fn blob_key(name: &str, at: DateTime<Utc>) -> String {
    format!("{name}-{}", at.timestamp_millis())
}

/// Write-once byte storage.
pub trait BlobStore: Send + Sync + 'static {
    /// Store `bytes` under `key`.  Fails with [`ArchiveError::AlreadyExists`]
    /// if the key was written before; the stored blob is left untouched.
    fn put(&self, key: &str, bytes: Bytes) -> impl Future<Output = Result<(), ArchiveError>> + Send;

    fn get(&self, key: &str) -> impl Future<Output = Result<Option<Bytes>, ArchiveError>> + Send;
}

/// Fetches an image and stores it in the archive.
pub trait ImageArchiver: Send + Sync + 'static {
    /// Archive the image at `url` under `key`, returning the stored size.
    fn archive(&self, key: &str, url: &str) -> impl Future<Output = Result<usize, ArchiveError>> + Send;
}

// ── Filesystem blob store ─────────────────────────────────────────────────────

/// One file per key below a root directory.
#[derive(Clone, Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, ArchiveError> {
        let valid = !key.is_empty()
            && !key.starts_with('.')
            && !key.contains("..")
            && !key.contains(['/', '\\', '\0']);
        if !valid {
            return Err(ArchiveError::InvalidKey(key.to_owned()));
        }
        Ok(self.root.join(key))
    }
}

impl BlobStore for FsBlobStore {
    async fn put(&self, key: &str, bytes: Bytes) -> Result<(), ArchiveError> {
        let path = self.path_for(key)?;
        tokio::fs::create_dir_all(&self.root).await?;

        // Write to a hidden temp file, then publish it with a hard link,
        // which fails instead of replacing an existing blob.
        let tmp = self.root.join(format!(".{key}.{}.tmp", Uuid::new_v4()));
        let mut file = tokio::fs::File::create(&tmp).await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;
        drop(file);

        let published = tokio::fs::hard_link(&tmp, &path).await;
        let _ = tokio::fs::remove_file(&tmp).await;
        match published {
            Ok(()) => {
                debug!(key, size = bytes.len(), "blob stored");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                Err(ArchiveError::AlreadyExists(key.to_owned()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(&self, key: &str) -> Result<Option<Bytes>, ArchiveError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

// ── HTTP archiver ─────────────────────────────────────────────────────────────

/// Downloads images with `reqwest` and stores them in a [`BlobStore`].
#[derive(Clone, Debug)]
pub struct HttpArchiver<B> {
    client: Client,
    blobs: B,
}

impl<B: BlobStore> HttpArchiver<B> {
    pub fn new(client: Client, blobs: B) -> Self {
        Self { client, blobs }
    }

    pub fn blobs(&self) -> &B {
        &self.blobs
    }
}

impl<B: BlobStore> ImageArchiver for HttpArchiver<B> {
    async fn archive(&self, key: &str, url: &str) -> Result<usize, ArchiveError> {
        let bytes = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .bytes()
            .await?;
        let size = bytes.len();
        self.blobs.put(key, bytes).await?;
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use chrono::TimeZone;

    use super::*;
    use crate::test_support::serve;

    #[test]
    fn blob_key_uses_unix_millis() {
        let at = Utc.with_ymd_and_hms(2024, 2, 11, 0, 0, 0).unwrap();
        assert_eq!(blob_key("grin", at), "grin-1707609600000");
    }

    #[tokio::test]
    async fn put_then_get_returns_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path().join("blobs"));

        store.put("grin-1", Bytes::from_static(b"png")).await.unwrap();

        let read = store.get("grin-1").await.unwrap();
        assert_eq!(read.as_deref(), Some(&b"png"[..]));
    }

    #[tokio::test]
    async fn blobs_are_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());

        store.put("grin-1", Bytes::from_static(b"first")).await.unwrap();
        let err = store.put("grin-1", Bytes::from_static(b"second")).await.unwrap_err();

        assert!(matches!(err, ArchiveError::AlreadyExists(ref k) if k == "grin-1"), "{err:?}");
        let read = store.get("grin-1").await.unwrap();
        assert_eq!(read.as_deref(), Some(&b"first"[..]));

        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0, "temp files must be cleaned up");
    }

    #[tokio::test]
    async fn missing_blob_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        assert!(store.get("nothing-0").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn keys_cannot_escape_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsBlobStore::new(dir.path());
        for key in ["", "../etc", "a/b", ".hidden", "a\\b"] {
            let err = store.get(key).await.unwrap_err();
            assert!(matches!(err, ArchiveError::InvalidKey(_)), "{key:?}: {err:?}");
        }
    }

    #[tokio::test]
    async fn http_archiver_downloads_and_stores() {
        let base = serve(
            Router::new()
                .route("/grin.png", get(|| async { &b"\x89PNG-bytes"[..] }))
                .route("/gone.png", get(|| async { StatusCode::NOT_FOUND })),
        )
        .await;
        let dir = tempfile::tempdir().unwrap();
        let archiver = HttpArchiver::new(Client::new(), FsBlobStore::new(dir.path()));

        let size = archiver.archive("grin-1", &format!("{base}/grin.png")).await.unwrap();
        assert_eq!(size, 10);
        let stored = archiver.blobs().get("grin-1").await.unwrap();
        assert_eq!(stored.as_deref(), Some(&b"\x89PNG-bytes"[..]));

        let err = archiver.archive("gone-1", &format!("{base}/gone.png")).await.unwrap_err();
        assert!(matches!(err, ArchiveError::Http(_)), "{err:?}");
        assert!(archiver.blobs().get("gone-1").await.unwrap().is_none());
    }
}
