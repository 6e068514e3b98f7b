//! SQLite implementation of [`MirrorStore`] and [`MarkerStore`].
//!
//! Uses [`sqlx`] with the `sqlite` feature.  Migrations are embedded at
//! compile time from `./migrations` (relative to the crate root) and run by
//! [`SqliteStore::connect`].  Foreign keys are enabled on every connection so
//! alias rows cascade with their entry.
//!
//! `updated_at` is stored as unix milliseconds, the same value that suffixes
//! the archived image key of the entry.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};
use tracing::{debug, warn};

use super::{ListFilter, MarkerStore, MirrorStore};
use crate::error::MirrorError;
use crate::model::{CatalogEntry, MirrorEntry};

type EntryRow = (String, Option<String>, String, i64);

/// SQLite-backed emoji mirror.
#[derive(Clone, Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (or create) the SQLite database at `url` and run pending migrations.
    ///
    /// `url` should be a sqlx-compatible SQLite URL, e.g.
    /// `"sqlite://emoji-sync.db"`.
    pub async fn connect(url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        Self::migrate(pool).await
    }

    /// A private in-memory database on a single connection.
    ///
    /// Every pooled connection to `:memory:` would see its own database, so
    /// the pool is pinned to one connection that never expires.
    pub async fn in_memory() -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::migrate(pool).await
    }

    async fn migrate(pool: SqlitePool) -> Result<Self, sqlx::Error> {
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    /// The underlying pool, for ad-hoc queries.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_millis_or_now(ms: i64, name: &str) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(|| {
        warn!(raw = ms, name, "failed to parse emoji updated_at; using now");
        Utc::now()
    })
}

fn into_entry((name, category, url, updated_at): EntryRow, aliases: BTreeSet<String>) -> MirrorEntry {
    let updated_at = parse_millis_or_now(updated_at, &name);
    MirrorEntry {
        name,
        category,
        url,
        aliases,
        updated_at,
    }
}

/// Entry row plus its aliases, read on one connection so both come from the
/// same snapshot when `conn` is a transaction.
async fn load_entry(conn: &mut SqliteConnection, name: &str) -> Result<Option<MirrorEntry>, sqlx::Error> {
    let row: Option<EntryRow> =
        sqlx::query_as("SELECT name, category, url, updated_at FROM emojis WHERE name = ?1")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await?;
    let Some(row) = row else {
        return Ok(None);
    };
    let aliases: Vec<(String,)> =
        sqlx::query_as("SELECT alias FROM emoji_aliases WHERE name = ?1 ORDER BY alias ASC")
            .bind(name)
            .fetch_all(&mut *conn)
            .await?;
    Ok(Some(into_entry(row, aliases.into_iter().map(|(alias,)| alias).collect())))
}

impl MirrorStore for SqliteStore {
    async fn list_filtered(&self, filter: &ListFilter) -> Result<Vec<MirrorEntry>, MirrorError> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT name, category, url, updated_at FROM emojis WHERE 1 = 1");
        if let Some(category) = &filter.category {
            query.push(" AND category = ").push_bind(category.clone());
        }
        if let Some(alias) = &filter.alias {
            query
                .push(" AND name IN (SELECT name FROM emoji_aliases WHERE alias = ")
                .push_bind(alias.clone())
                .push(")");
        }
        if let Some(since) = filter.since {
            query.push(" AND updated_at >= ").push_bind(since.timestamp_millis());
        }
        if let Some(until) = filter.until {
            query.push(" AND updated_at < ").push_bind(until.timestamp_millis());
        }
        query.push(" ORDER BY name ASC");

        let rows: Vec<EntryRow> = query.build_query_as().fetch_all(&self.pool).await?;
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let alias_rows: Vec<(String, String)> =
            sqlx::query_as("SELECT name, alias FROM emoji_aliases ORDER BY name ASC, alias ASC")
                .fetch_all(&self.pool)
                .await?;
        let mut alias_map: HashMap<String, BTreeSet<String>> = HashMap::new();
        for (name, alias) in alias_rows {
            alias_map.entry(name).or_default().insert(alias);
        }

        Ok(rows
            .into_iter()
            .map(|row| {
                let aliases = alias_map.remove(&row.0).unwrap_or_default();
                into_entry(row, aliases)
            })
            .collect())
    }

    async fn get(&self, name: &str) -> Result<MirrorEntry, MirrorError> {
        let mut conn = self.pool.acquire().await?;
        load_entry(&mut conn, name)
            .await?
            .ok_or_else(|| MirrorError::NotFound(name.to_owned()))
    }

    async fn upsert(
        &self,
        entry: &CatalogEntry,
        updated_at: DateTime<Utc>,
    ) -> Result<MirrorEntry, MirrorError> {
        let mut tx = self.pool.begin().await?;

        let stored: Vec<(String,)> =
            sqlx::query_as("SELECT alias FROM emoji_aliases WHERE name = ?1")
                .bind(&entry.name)
                .fetch_all(&mut *tx)
                .await?;
        let stored: BTreeSet<String> = stored.into_iter().map(|(alias,)| alias).collect();

        sqlx::query(
            "INSERT INTO emojis (name, category, url, updated_at) VALUES (?1, ?2, ?3, ?4) \
             ON CONFLICT(name) DO UPDATE SET category = ?2, url = ?3, updated_at = ?4",
        )
        .bind(&entry.name)
        .bind(&entry.category)
        .bind(&entry.url)
        .bind(updated_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        let inserted: Vec<&String> = entry.aliases.difference(&stored).collect();
        let removed: Vec<&String> = stored.difference(&entry.aliases).collect();

        for alias in &inserted {
            sqlx::query(
                "INSERT INTO emoji_aliases (name, alias) VALUES (?1, ?2) \
                 ON CONFLICT(name, alias) DO NOTHING",
            )
            .bind(&entry.name)
            .bind(alias.as_str())
            .execute(&mut *tx)
            .await?;
        }
        for alias in &removed {
            sqlx::query("DELETE FROM emoji_aliases WHERE name = ?1 AND alias = ?2")
                .bind(&entry.name)
                .bind(alias.as_str())
                .execute(&mut *tx)
                .await?;
        }

        // The returned entry is read inside the transaction it commits with.
        let saved = load_entry(&mut tx, &entry.name)
            .await?
            .ok_or_else(|| MirrorError::NotFound(entry.name.clone()))?;
        tx.commit().await?;
        debug!(
            name = %entry.name,
            inserted = ?inserted,
            removed = ?removed,
            "emoji upserted"
        );
        Ok(saved)
    }

    async fn remove(&self, name: &str) -> Result<MirrorEntry, MirrorError> {
        let mut tx = self.pool.begin().await?;
        let existing = load_entry(&mut tx, name)
            .await?
            .ok_or_else(|| MirrorError::NotFound(name.to_owned()))?;
        sqlx::query("DELETE FROM emojis WHERE name = ?1")
            .bind(name)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        debug!(name, aliases = existing.aliases.len(), "emoji removed");
        Ok(existing)
    }
}

impl MarkerStore for SqliteStore {
    async fn get_marker(&self, key: &str) -> Result<Option<String>, sqlx::Error> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv_store WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|(v,)| v))
    }

    async fn set_marker(&self, key: &str, value: &str) -> Result<(), sqlx::Error> {
        let updated_at = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO kv_store (key, value, updated_at) VALUES (?1, ?2, ?3) \
             ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = ?3",
        )
        .bind(key)
        .bind(value)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn ts(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).unwrap()
    }

    fn entry(name: &str, category: &str, aliases: &[&str]) -> CatalogEntry {
        CatalogEntry::new(
            name,
            Some(category.to_owned()),
            format!("https://example.com/{name}.png"),
            aliases.iter().copied(),
        )
    }

    /// Four entries: two sharing aliases, one without aliases and one in its
    /// own category.
    async fn seeded() -> SqliteStore {
        let store = SqliteStore::in_memory().await.unwrap();
        store.upsert(&entry("grinning", "people", &["smile"]), ts(2021, 1, 1)).await.unwrap();
        store
            .upsert(&entry("smile", "people", &["grinning", "smile"]), ts(2022, 1, 1))
            .await
            .unwrap();
        store.upsert(&entry("smiley", "people", &[]), ts(2024, 2, 10)).await.unwrap();
        store.upsert(&entry("dummy", "dummy", &[]), ts(2024, 2, 10)).await.unwrap();
        store
    }

    fn names(entries: &[MirrorEntry]) -> Vec<&str> {
        entries.iter().map(|e| e.name.as_str()).collect()
    }

    async fn alias_rowid(store: &SqliteStore, name: &str, alias: &str) -> Option<i64> {
        sqlx::query_scalar("SELECT rowid FROM emoji_aliases WHERE name = ?1 AND alias = ?2")
            .bind(name)
            .bind(alias)
            .fetch_optional(store.pool())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn get_returns_entry_with_aliases() {
        let store = seeded().await;
        let smile = store.get("smile").await.unwrap();
        assert_eq!(smile.category.as_deref(), Some("people"));
        assert_eq!(smile.url, "https://example.com/smile.png");
        assert_eq!(
            smile.aliases,
            BTreeSet::from(["grinning".to_owned(), "smile".to_owned()])
        );
        assert_eq!(smile.updated_at, ts(2022, 1, 1));
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let store = seeded().await;
        let err = store.get("not-exist").await.unwrap_err();
        assert!(err.is_not_found(), "{err:?}");
    }

    #[tokio::test]
    async fn list_includes_entries_without_aliases() {
        let store = seeded().await;
        let all = store.list().await.unwrap();
        assert_eq!(names(&all), ["dummy", "grinning", "smile", "smiley"]);
        let smiley = all.iter().find(|e| e.name == "smiley").unwrap();
        assert!(smiley.aliases.is_empty());
    }

    #[tokio::test]
    async fn list_filtered_by_category_and_alias() {
        let store = seeded().await;

        let people = store
            .list_filtered(&ListFilter { category: Some("people".into()), ..ListFilter::default() })
            .await
            .unwrap();
        assert_eq!(names(&people), ["grinning", "smile", "smiley"]);

        let with_smile = store
            .list_filtered(&ListFilter { alias: Some("smile".into()), ..ListFilter::default() })
            .await
            .unwrap();
        assert_eq!(names(&with_smile), ["grinning", "smile"]);
        assert_eq!(with_smile[1].aliases.len(), 2, "all aliases are returned, not only the match");
    }

    #[tokio::test]
    async fn list_filtered_by_time_window() {
        let store = seeded().await;

        let since = store
            .list_filtered(&ListFilter { since: Some(ts(2023, 1, 1)), ..ListFilter::default() })
            .await
            .unwrap();
        assert_eq!(names(&since), ["dummy", "smiley"]);

        let until = store
            .list_filtered(&ListFilter { until: Some(ts(2023, 1, 1)), ..ListFilter::default() })
            .await
            .unwrap();
        assert_eq!(names(&until), ["grinning", "smile"]);

        let window = store
            .list_filtered(&ListFilter {
                since: Some(ts(2022, 1, 1)),
                until: Some(ts(2023, 1, 1)),
                ..ListFilter::default()
            })
            .await
            .unwrap();
        assert_eq!(names(&window), ["smile"]);
    }

    #[tokio::test]
    async fn upsert_then_get_round_trips() {
        let store = SqliteStore::in_memory().await.unwrap();
        let new = entry("new-emoji", "people", &["new", "fresh"]);
        let at = ts(2024, 3, 1);

        let saved = store.upsert(&new, at).await.unwrap();
        let read = store.get("new-emoji").await.unwrap();

        assert_eq!(saved, read);
        assert_eq!(read.category, new.category);
        assert_eq!(read.url, new.url);
        assert_eq!(read.aliases, new.aliases);
        assert_eq!(read.updated_at, at);
    }

    #[tokio::test]
    async fn upsert_updates_fields_unconditionally() {
        let store = seeded().await;
        let mut changed = entry("grinning", "faces", &["smile"]);
        changed.url = "https://example.com/grinning-v2.png".into();

        let saved = store.upsert(&changed, ts(2024, 5, 1)).await.unwrap();
        assert_eq!(saved.category.as_deref(), Some("faces"));
        assert_eq!(saved.url, "https://example.com/grinning-v2.png");
        assert_eq!(saved.updated_at, ts(2024, 5, 1));
    }

    #[tokio::test]
    async fn upsert_superset_only_inserts_new_aliases() {
        let store = seeded().await;
        let before = alias_rowid(&store, "grinning", "smile").await.unwrap();

        store
            .upsert(&entry("grinning", "people", &["smile", "grinning"]), ts(2024, 4, 1))
            .await
            .unwrap();

        let after = alias_rowid(&store, "grinning", "smile").await.unwrap();
        assert_eq!(before, after, "unchanged alias row must not be rewritten");
        assert!(alias_rowid(&store, "grinning", "grinning").await.is_some());
    }

    #[tokio::test]
    async fn upsert_removes_dropped_aliases_and_keeps_the_rest() {
        let store = seeded().await;
        let kept = alias_rowid(&store, "smile", "smile").await.unwrap();

        let saved = store
            .upsert(&entry("smile", "people", &["smile", "happy"]), ts(2024, 4, 1))
            .await
            .unwrap();

        assert_eq!(saved.aliases, BTreeSet::from(["happy".to_owned(), "smile".to_owned()]));
        assert_eq!(alias_rowid(&store, "smile", "smile").await, Some(kept));
        assert!(alias_rowid(&store, "smile", "grinning").await.is_none());
    }

    #[tokio::test]
    async fn upsert_with_empty_alias_set_clears_aliases() {
        let store = seeded().await;
        let saved = store.upsert(&entry("smile", "people", &[]), ts(2024, 4, 1)).await.unwrap();
        assert!(saved.aliases.is_empty());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emoji_aliases WHERE name = 'smile'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn upsert_identical_data_is_idempotent() {
        let store = seeded().await;
        let same = entry("smile", "people", &["grinning", "smile"]);
        let first = store.upsert(&same, ts(2024, 4, 1)).await.unwrap();
        let second = store.upsert(&same, ts(2024, 4, 1)).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn remove_returns_snapshot_and_cascades_aliases() {
        let store = seeded().await;

        let removed = store.remove("smile").await.unwrap();
        assert_eq!(removed.aliases.len(), 2);
        assert_eq!(removed.url, "https://example.com/smile.png");

        let err = store.get("smile").await.unwrap_err();
        assert!(err.is_not_found());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM emoji_aliases WHERE name = 'smile'")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn failed_upsert_leaves_prior_state_unchanged() {
        let store = SqliteStore::in_memory().await.unwrap();
        let mut original = entry("a", "people", &["x", "gone"]);
        original.url = "u1".into();
        store.upsert(&original, ts(2024, 1, 1)).await.unwrap();
        let x_rowid = alias_rowid(&store, "a", "x").await.unwrap();

        sqlx::query(
            "CREATE TRIGGER reject_boom BEFORE INSERT ON emoji_aliases \
             WHEN NEW.alias = 'boom' BEGIN SELECT RAISE(ABORT, 'boom'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let mut changed = entry("a", "faces", &["x", "boom"]);
        changed.url = "u2".into();
        let err = store.upsert(&changed, ts(2024, 2, 1)).await.unwrap_err();
        assert!(matches!(err, MirrorError::Database(_)), "{err:?}");

        let stored = store.get("a").await.unwrap();
        assert_eq!(stored.url, "u1");
        assert_eq!(stored.category.as_deref(), Some("people"));
        assert_eq!(stored.updated_at, ts(2024, 1, 1));
        assert_eq!(stored.aliases, BTreeSet::from(["gone".to_owned(), "x".to_owned()]));
        assert_eq!(alias_rowid(&store, "a", "x").await, Some(x_rowid));
    }

    #[tokio::test]
    async fn failed_remove_keeps_entry_and_aliases() {
        let store = seeded().await;
        sqlx::query(
            "CREATE TRIGGER keep_smile BEFORE DELETE ON emojis \
             WHEN OLD.name = 'smile' BEGIN SELECT RAISE(ABORT, 'kept'); END",
        )
        .execute(store.pool())
        .await
        .unwrap();

        let err = store.remove("smile").await.unwrap_err();
        assert!(!err.is_not_found(), "{err:?}");

        let smile = store.get("smile").await.unwrap();
        assert_eq!(smile.aliases.len(), 2);
    }

    #[tokio::test]
    async fn remove_missing_is_not_found() {
        let store = seeded().await;
        let err = store.remove("not-exist").await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn alias_rows_require_an_existing_entry() {
        let store = SqliteStore::in_memory().await.unwrap();
        let result = sqlx::query("INSERT INTO emoji_aliases (name, alias) VALUES ('ghost', 'boo')")
            .execute(store.pool())
            .await;
        assert!(result.is_err(), "foreign key must reject orphan alias rows");
    }

    #[tokio::test]
    async fn marker_round_trips_and_overwrites() {
        let store = SqliteStore::in_memory().await.unwrap();
        assert_eq!(store.get_marker("last-updated").await.unwrap(), None);

        store.set_marker("last-updated", "2024-02-11T00:00:00+00:00").await.unwrap();
        store.set_marker("last-updated", "2024-02-12T00:00:00+00:00").await.unwrap();

        assert_eq!(
            store.get_marker("last-updated").await.unwrap().as_deref(),
            Some("2024-02-12T00:00:00+00:00")
        );
    }
}
