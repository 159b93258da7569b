//! Cache store: SQLite persistence for tracks, crate memberships, the
//! cache-state sentinel, and the FTS5 full-text mirror.

use crate::cache::models::{CacheState, CrateMembership, Track};
use mc_common::Result;
use sqlx::sqlite::SqlitePool;
use sqlx::{Row, Sqlite, Transaction};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Well-known cache database filename inside the repository root.
pub const CACHE_DB_NAME: &str = ".music-commander-cache.db";

/// Handle to the cache database.
///
/// A value type owning a connection pool; mutations go through
/// [`CacheStore::replace_all`] and [`CacheStore::patch`], each a single
/// transaction that keeps the FTS5 mirror in sync with the tracks table.
#[derive(Debug, Clone)]
pub struct CacheStore {
    pool: SqlitePool,
    db_path: PathBuf,
}

impl CacheStore {
    /// Open the cache database for a repository, creating tables on
    /// first use and enabling WAL.
    ///
    /// If the file is corrupt (truncated write, not a database), it is
    /// deleted and re-created exactly once; the cache is a derivative.
    pub async fn open_or_create(repo_root: &Path) -> Result<Self> {
        let db_path = repo_root.join(CACHE_DB_NAME);
        match Self::open_at(&db_path).await {
            Ok(store) => Ok(store),
            Err(e) if e.is_cache_corruption() => {
                warn!("cache database appears corrupt, rebuilding: {e}");
                delete_cache(repo_root)?;
                Self::open_at(&db_path).await
            }
            Err(e) => Err(e),
        }
    }

    async fn open_at(db_path: &Path) -> Result<Self> {
        let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = SqlitePool::connect(&db_url).await?;

        sqlx::query("PRAGMA journal_mode=WAL").execute(&pool).await?;
        create_schema(&pool).await?;

        Ok(Self {
            pool,
            db_path: db_path.to_path_buf(),
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub async fn close(self) {
        self.pool.close().await;
    }

    /// Current cache-state sentinel, or None before the first build.
    pub async fn state(&self) -> Result<Option<CacheState>> {
        let row = sqlx::query_as::<_, CacheState>(
            "SELECT branch_pointer, last_updated, track_count FROM cache_state WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn track_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM tracks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    /// Rowcount of the FTS5 mirror; equals the tracks rowcount after
    /// every successful commit.
    pub async fn mirror_count(&self) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM tracks_fts")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.get::<i64, _>("n"))
    }

    /// Truncate and rewrite all three tables plus the mirror in one
    /// transaction.
    pub async fn replace_all(
        &self,
        tracks: &[Track],
        memberships: &[CrateMembership],
        new_state: &CacheState,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM track_crates").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM tracks").execute(&mut *tx).await?;
        sqlx::query("DELETE FROM tracks_fts").execute(&mut *tx).await?;

        for track in tracks {
            insert_track(&mut tx, track).await?;
        }
        for membership in memberships {
            insert_membership(&mut tx, membership).await?;
        }
        upsert_state(&mut tx, new_state, tracks.len() as i64).await?;

        tx.commit().await?;
        debug!("cache rebuilt: {} tracks", tracks.len());
        Ok(())
    }

    /// Replace the rows for the given keys, insert replacements, update
    /// the sentinel, and reindex only the affected mirror rows, all in
    /// one transaction.
    pub async fn patch(
        &self,
        keys_to_replace: &[String],
        new_tracks: &[Track],
        new_memberships: &[CrateMembership],
        new_state: &CacheState,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for key in keys_to_replace {
            sqlx::query("DELETE FROM track_crates WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM tracks WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await?;
            sqlx::query("DELETE FROM tracks_fts WHERE key = ?")
                .bind(key)
                .execute(&mut *tx)
                .await?;
        }

        for track in new_tracks {
            insert_track(&mut tx, track).await?;
        }
        for membership in new_memberships {
            insert_membership(&mut tx, membership).await?;
        }

        let row = sqlx::query("SELECT COUNT(*) AS n FROM tracks")
            .fetch_one(&mut *tx)
            .await?;
        let count = row.get::<i64, _>("n");
        upsert_state(&mut tx, new_state, count).await?;

        tx.commit().await?;
        Ok(())
    }

    /// Crate memberships for the given keys, sorted per key.
    pub async fn load_crates(&self, keys: &[String]) -> Result<HashMap<String, Vec<String>>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        if keys.is_empty() {
            return Ok(map);
        }

        let placeholders = vec!["?"; keys.len()].join(", ");
        let sql = format!(
            "SELECT key, crate FROM track_crates WHERE key IN ({placeholders}) ORDER BY key, crate"
        );
        let mut query = sqlx::query_as::<_, CrateMembership>(&sql);
        for key in keys {
            query = query.bind(key);
        }

        for row in query.fetch_all(&self.pool).await? {
            map.entry(row.key).or_default().push(row.crate_name);
        }
        Ok(map)
    }

    /// Single track lookup by key.
    pub async fn track_by_key(&self, key: &str) -> Result<Option<Track>> {
        let row = sqlx::query_as::<_, Track>("SELECT * FROM tracks WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}

/// Delete the cache database file (and WAL sidecars) if present.
/// Returns true when a file was removed.
pub fn delete_cache(repo_root: &Path) -> Result<bool> {
    let db_path = repo_root.join(CACHE_DB_NAME);
    let mut removed = false;
    for suffix in ["", "-wal", "-shm"] {
        let path = PathBuf::from(format!("{}{suffix}", db_path.display()));
        if path.exists() {
            std::fs::remove_file(&path)?;
            removed = true;
        }
    }
    if removed {
        debug!("deleted cache database: {}", db_path.display());
    }
    Ok(removed)
}

async fn create_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            key TEXT PRIMARY KEY,
            file TEXT,
            artist TEXT,
            title TEXT,
            album TEXT,
            genre TEXT,
            bpm REAL,
            rating INTEGER,
            key_musical TEXT,
            year TEXT,
            tracknumber TEXT,
            comment TEXT,
            color TEXT,
            present INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS ix_tracks_bpm ON tracks(bpm)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS ix_tracks_rating ON tracks(rating)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS ix_tracks_year ON tracks(year)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS track_crates (
            key TEXT NOT NULL,
            crate TEXT NOT NULL,
            PRIMARY KEY (key, crate)
        )
        "#,
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS ix_track_crates_crate ON track_crates(crate)")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS cache_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            branch_pointer TEXT,
            last_updated TEXT,
            track_count INTEGER
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE VIRTUAL TABLE IF NOT EXISTS tracks_fts USING fts5(
            key, artist, title, album, genre, file
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn insert_track(tx: &mut Transaction<'_, Sqlite>, track: &Track) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tracks (
            key, file, artist, title, album, genre, bpm, rating,
            key_musical, year, tracknumber, comment, color, present
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&track.key)
    .bind(&track.file)
    .bind(&track.artist)
    .bind(&track.title)
    .bind(&track.album)
    .bind(&track.genre)
    .bind(track.bpm)
    .bind(track.rating)
    .bind(&track.key_musical)
    .bind(&track.year)
    .bind(&track.tracknumber)
    .bind(&track.comment)
    .bind(&track.color)
    .bind(track.present)
    .execute(&mut **tx)
    .await?;

    sqlx::query(
        "INSERT INTO tracks_fts (key, artist, title, album, genre, file) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&track.key)
    .bind(&track.artist)
    .bind(&track.title)
    .bind(&track.album)
    .bind(&track.genre)
    .bind(&track.file)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn insert_membership(
    tx: &mut Transaction<'_, Sqlite>,
    membership: &CrateMembership,
) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO track_crates (key, crate) VALUES (?, ?)")
        .bind(&membership.key)
        .bind(&membership.crate_name)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

async fn upsert_state(
    tx: &mut Transaction<'_, Sqlite>,
    state: &CacheState,
    track_count: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO cache_state (id, branch_pointer, last_updated, track_count)
        VALUES (1, ?, ?, ?)
        ON CONFLICT(id) DO UPDATE SET
            branch_pointer = excluded.branch_pointer,
            last_updated = excluded.last_updated,
            track_count = excluded.track_count
        "#,
    )
    .bind(&state.branch_pointer)
    .bind(&state.last_updated)
    .bind(track_count)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn track(key: &str, artist: &str) -> Track {
        Track {
            key: key.to_string(),
            file: Some(format!("{artist}/{key}.mp3")),
            artist: Some(artist.to_string()),
            present: true,
            ..Default::default()
        }
    }

    fn state(pointer: &str) -> CacheState {
        CacheState {
            branch_pointer: Some(pointer.to_string()),
            last_updated: Some(mc_common::time::now_rfc3339()),
            track_count: None,
        }
    }

    #[tokio::test]
    async fn replace_all_populates_tables_and_mirror() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open_or_create(dir.path()).await.unwrap();

        let tracks = vec![track("k1", "Alice"), track("k2", "Bob")];
        let crates = vec![CrateMembership {
            key: "k1".into(),
            crate_name: "Festival".into(),
        }];
        store.replace_all(&tracks, &crates, &state("p1")).await.unwrap();

        assert_eq!(store.track_count().await.unwrap(), 2);
        assert_eq!(store.mirror_count().await.unwrap(), 2);

        let st = store.state().await.unwrap().unwrap();
        assert_eq!(st.branch_pointer.as_deref(), Some("p1"));
        assert_eq!(st.track_count, Some(2));

        let crates = store.load_crates(&["k1".into()]).await.unwrap();
        assert_eq!(crates["k1"], vec!["Festival"]);
    }

    #[tokio::test]
    async fn patch_replaces_and_deletes_keys() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open_or_create(dir.path()).await.unwrap();

        let tracks = vec![track("k1", "Alice"), track("k2", "Bob")];
        let crates = vec![
            CrateMembership { key: "k1".into(), crate_name: "A".into() },
            CrateMembership { key: "k2".into(), crate_name: "B".into() },
        ];
        store.replace_all(&tracks, &crates, &state("p1")).await.unwrap();

        // k1 updated, k2 deleted (no replacement rows)
        let new_tracks = vec![track("k1", "Alicia")];
        store
            .patch(
                &["k1".into(), "k2".into()],
                &new_tracks,
                &[],
                &state("p2"),
            )
            .await
            .unwrap();

        assert_eq!(store.track_count().await.unwrap(), 1);
        assert_eq!(store.mirror_count().await.unwrap(), 1);
        assert!(store.track_by_key("k2").await.unwrap().is_none());
        let k1 = store.track_by_key("k1").await.unwrap().unwrap();
        assert_eq!(k1.artist.as_deref(), Some("Alicia"));

        let st = store.state().await.unwrap().unwrap();
        assert_eq!(st.branch_pointer.as_deref(), Some("p2"));
        assert_eq!(st.track_count, Some(1));
        assert!(store.load_crates(&["k2".into()]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn state_is_singleton() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open_or_create(dir.path()).await.unwrap();

        store.replace_all(&[], &[], &state("p1")).await.unwrap();
        store.replace_all(&[], &[], &state("p2")).await.unwrap();

        let row = sqlx::query("SELECT COUNT(*) AS n FROM cache_state")
            .fetch_one(store.pool())
            .await
            .unwrap();
        assert_eq!(row.get::<i64, _>("n"), 1);
        let st = store.state().await.unwrap().unwrap();
        assert_eq!(st.branch_pointer.as_deref(), Some("p2"));
    }

    #[tokio::test]
    async fn corrupt_database_is_recreated_once() {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join(CACHE_DB_NAME);
        std::fs::write(&db_path, b"this is not a sqlite database, not at all").unwrap();

        let store = CacheStore::open_or_create(dir.path()).await.unwrap();
        assert_eq!(store.track_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_cache_removes_file() {
        let dir = TempDir::new().unwrap();
        let store = CacheStore::open_or_create(dir.path()).await.unwrap();
        store.close().await;

        assert!(delete_cache(dir.path()).unwrap());
        assert!(!dir.path().join(CACHE_DB_NAME).exists());
        assert!(!delete_cache(dir.path()).unwrap());
    }
}
