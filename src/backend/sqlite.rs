use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::time::Duration;

use super::types::{CollectionEntry, Playlist, PlaylistVideo, Profile, Relation, StoreError};
use super::UserDataStore;

// ============================================================================
// Row Types
// ============================================================================

#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    id: i64,
    user_id: String,
    video_id: String,
    created_at: i64,
}

impl EntryRow {
    fn into_entry(self) -> CollectionEntry {
        CollectionEntry {
            id: self.id,
            user_id: self.user_id,
            video_id: self.video_id,
            created_at: from_millis(self.created_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlaylistRow {
    id: i64,
    user_id: String,
    name: String,
    description: String,
    created_at: i64,
}

impl PlaylistRow {
    fn into_playlist(self) -> Playlist {
        Playlist {
            id: self.id,
            user_id: self.user_id,
            name: self.name,
            description: self.description,
            created_at: from_millis(self.created_at),
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PlaylistVideoRow {
    id: i64,
    playlist_id: i64,
    video_id: String,
    created_at: i64,
}

impl PlaylistVideoRow {
    fn into_playlist_video(self) -> PlaylistVideo {
        PlaylistVideo {
            id: self.id,
            playlist_id: self.playlist_id,
            video_id: self.video_id,
            created_at: from_millis(self.created_at),
        }
    }
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn profile_from_row((full_name, picture): (String, i64)) -> Profile {
    Profile {
        full_name,
        profile_picture: u8::try_from(picture).unwrap_or(0),
    }
}

// ============================================================================
// SqliteStore
// ============================================================================

/// User data kept in a local SQLite file.
///
/// Mirrors the hosted schema table for table. Unlike the hosted store,
/// multi-step deletes run inside one transaction.
#[derive(Clone)]
pub struct SqliteStore {
    pub(crate) pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and run migrations.
    ///
    /// `":memory:"` opens a private in-memory database held on a single
    /// connection for the lifetime of the store.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let in_memory = path == ":memory:";
        let url = format!("sqlite:{}?mode=rwc", path);

        // Pre-create the file user-only so it never exists with umask permissions
        #[cfg(unix)]
        if !in_memory {
            use std::os::unix::fs::OpenOptionsExt;
            let db_path = std::path::Path::new(path);
            if !db_path.exists() {
                let _ = std::fs::OpenOptions::new()
                    .write(true)
                    .create_new(true)
                    .mode(0o600)
                    .open(db_path);
            }
        }

        let options = SqliteConnectOptions::from_str(&url)?
            .foreign_keys(true)
            .pragma("busy_timeout", "5000");

        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(10));
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;
        let store = Self { pool };
        store
            .migrate()
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))?;
        tracing::debug!(path = %path, "Opened SQLite data store");
        Ok(store)
    }

    /// Create tables and indexes in one transaction. Every statement is
    /// `IF NOT EXISTS`, so re-running on an existing file is a no-op.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        for relation in Relation::ALL {
            let table = relation.table();
            sqlx::query(&format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    id INTEGER PRIMARY KEY,
                    user_id TEXT NOT NULL,
                    video_id TEXT NOT NULL,
                    created_at INTEGER NOT NULL
                )
            "#
            ))
            .execute(&mut *tx)
            .await?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_user_created ON {table}(user_id, created_at DESC)"
            ))
            .execute(&mut *tx)
            .await?;

            sqlx::query(&format!(
                "CREATE INDEX IF NOT EXISTS idx_{table}_user_video ON {table}(user_id, video_id)"
            ))
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS playlists (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                name TEXT NOT NULL,
                description TEXT NOT NULL DEFAULT '',
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_playlists_user ON playlists(user_id)")
            .execute(&mut *tx)
            .await?;

        // No ON DELETE CASCADE: delete_playlist removes join rows explicitly
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS playlist_videos (
                id INTEGER PRIMARY KEY,
                playlist_id INTEGER NOT NULL REFERENCES playlists(id),
                video_id TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_playlist_videos_playlist ON playlist_videos(playlist_id, created_at DESC)",
        )
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT,
                full_name TEXT NOT NULL DEFAULT '',
                profile_picture INTEGER NOT NULL DEFAULT 0
            )
        "#,
        )
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl UserDataStore for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn find_entry(
        &self,
        relation: Relation,
        user_id: &str,
        video_id: &str,
    ) -> Result<Option<CollectionEntry>, StoreError> {
        let row: Option<EntryRow> = sqlx::query_as(&format!(
            "SELECT id, user_id, video_id, created_at FROM {} WHERE user_id = ? AND video_id = ? ORDER BY created_at DESC, id DESC LIMIT 1",
            relation.table()
        ))
        .bind(user_id)
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(EntryRow::into_entry))
    }

    async fn insert_entry(
        &self,
        relation: Relation,
        user_id: &str,
        video_id: &str,
    ) -> Result<CollectionEntry, StoreError> {
        let row: EntryRow = sqlx::query_as(&format!(
            "INSERT INTO {} (user_id, video_id, created_at) VALUES (?, ?, ?) RETURNING id, user_id, video_id, created_at",
            relation.table()
        ))
        .bind(user_id)
        .bind(video_id)
        .bind(now_millis())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_entry())
    }

    async fn delete_entries(
        &self,
        relation: Relation,
        user_id: &str,
        video_id: &str,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!(
            "DELETE FROM {} WHERE user_id = ? AND video_id = ?",
            relation.table()
        ))
        .bind(user_id)
        .bind(video_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_entry_by_id(
        &self,
        relation: Relation,
        entry_id: i64,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(&format!("DELETE FROM {} WHERE id = ?", relation.table()))
            .bind(entry_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn list_entries(
        &self,
        relation: Relation,
        user_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<CollectionEntry>, StoreError> {
        // SQLite treats a negative LIMIT as unbounded
        let limit = limit.map(i64::from).unwrap_or(-1);
        let rows: Vec<EntryRow> = sqlx::query_as(&format!(
            "SELECT id, user_id, video_id, created_at FROM {} WHERE user_id = ? ORDER BY created_at DESC, id DESC LIMIT ?",
            relation.table()
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(EntryRow::into_entry).collect())
    }

    async fn insert_playlist(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Playlist, StoreError> {
        let row: PlaylistRow = sqlx::query_as(
            "INSERT INTO playlists (user_id, name, description, created_at) VALUES (?, ?, ?, ?) RETURNING id, user_id, name, description, created_at",
        )
        .bind(user_id)
        .bind(name)
        .bind(description)
        .bind(now_millis())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_playlist())
    }

    async fn list_playlists(&self, user_id: &str) -> Result<Vec<Playlist>, StoreError> {
        let rows: Vec<PlaylistRow> = sqlx::query_as(
            "SELECT id, user_id, name, description, created_at FROM playlists WHERE user_id = ? ORDER BY created_at, id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PlaylistRow::into_playlist).collect())
    }

    async fn get_playlist(&self, playlist_id: i64) -> Result<Option<Playlist>, StoreError> {
        let row: Option<PlaylistRow> = sqlx::query_as(
            "SELECT id, user_id, name, description, created_at FROM playlists WHERE id = ?",
        )
        .bind(playlist_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PlaylistRow::into_playlist))
    }

    async fn find_playlist_video(
        &self,
        playlist_id: i64,
        video_id: &str,
    ) -> Result<Option<PlaylistVideo>, StoreError> {
        let row: Option<PlaylistVideoRow> = sqlx::query_as(
            "SELECT id, playlist_id, video_id, created_at FROM playlist_videos WHERE playlist_id = ? AND video_id = ? LIMIT 1",
        )
        .bind(playlist_id)
        .bind(video_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(PlaylistVideoRow::into_playlist_video))
    }

    async fn insert_playlist_video(
        &self,
        playlist_id: i64,
        video_id: &str,
    ) -> Result<PlaylistVideo, StoreError> {
        let row: PlaylistVideoRow = sqlx::query_as(
            "INSERT INTO playlist_videos (playlist_id, video_id, created_at) VALUES (?, ?, ?) RETURNING id, playlist_id, video_id, created_at",
        )
        .bind(playlist_id)
        .bind(video_id)
        .bind(now_millis())
        .fetch_one(&self.pool)
        .await?;
        Ok(row.into_playlist_video())
    }

    async fn list_playlist_videos(
        &self,
        playlist_id: i64,
    ) -> Result<Vec<PlaylistVideo>, StoreError> {
        let rows: Vec<PlaylistVideoRow> = sqlx::query_as(
            "SELECT id, playlist_id, video_id, created_at FROM playlist_videos WHERE playlist_id = ? ORDER BY created_at DESC, id DESC",
        )
        .bind(playlist_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(PlaylistVideoRow::into_playlist_video)
            .collect())
    }

    async fn delete_playlist_video(
        &self,
        playlist_id: i64,
        video_id: &str,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM playlist_videos WHERE playlist_id = ? AND video_id = ?")
            .bind(playlist_id)
            .bind(video_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn delete_playlist(&self, playlist_id: i64) -> Result<bool, StoreError> {
        let mut tx = self.pool.begin().await?;

        let videos = sqlx::query("DELETE FROM playlist_videos WHERE playlist_id = ?")
            .bind(playlist_id)
            .execute(&mut *tx)
            .await?;

        let playlist = sqlx::query("DELETE FROM playlists WHERE id = ?")
            .bind(playlist_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::debug!(
            playlist_id = playlist_id,
            videos = videos.rows_affected(),
            "Deleted playlist"
        );
        Ok(playlist.rows_affected() > 0)
    }

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT full_name, profile_picture FROM users WHERE id = ?")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(profile_from_row))
    }

    async fn upsert_profile(
        &self,
        user_id: &str,
        email: Option<&str>,
        profile: &Profile,
    ) -> Result<Profile, StoreError> {
        let row: (String, i64) = sqlx::query_as(
            r#"
            INSERT INTO users (id, email, full_name, profile_picture)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                email = COALESCE(excluded.email, users.email),
                full_name = excluded.full_name,
                profile_picture = excluded.profile_picture
            RETURNING full_name, profile_picture
        "#,
        )
        .bind(user_id)
        .bind(email)
        .bind(&profile.full_name)
        .bind(i64::from(profile.profile_picture))
        .fetch_one(&self.pool)
        .await?;
        Ok(profile_from_row(row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteStore {
        SqliteStore::open(":memory:").await.unwrap()
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let store = test_store().await;
        store.migrate().await.unwrap();
        store.migrate().await.unwrap();
    }

    #[tokio::test]
    async fn test_entries_newest_first() {
        let store = test_store().await;
        for video in ["1", "2", "3"] {
            store
                .insert_entry(Relation::History, "u1", video)
                .await
                .unwrap();
        }

        let entries = store
            .list_entries(Relation::History, "u1", None)
            .await
            .unwrap();
        let ids: Vec<_> = entries.iter().map(|e| e.video_id.as_str()).collect();
        assert_eq!(ids, vec!["3", "2", "1"]);

        let latest = store
            .list_entries(Relation::History, "u1", Some(1))
            .await
            .unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].video_id, "3");
    }

    #[tokio::test]
    async fn test_relations_are_isolated() {
        let store = test_store().await;
        store
            .insert_entry(Relation::Favourites, "u1", "10")
            .await
            .unwrap();

        assert!(store
            .find_entry(Relation::Favourites, "u1", "10")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .find_entry(Relation::WatchLater, "u1", "10")
            .await
            .unwrap()
            .is_none());
        assert!(store
            .find_entry(Relation::Favourites, "u2", "10")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_delete_entries_and_by_id() {
        let store = test_store().await;
        store
            .insert_entry(Relation::History, "u1", "5")
            .await
            .unwrap();
        let second = store
            .insert_entry(Relation::History, "u1", "5")
            .await
            .unwrap();
        store
            .insert_entry(Relation::History, "u1", "6")
            .await
            .unwrap();

        assert_eq!(
            store
                .delete_entry_by_id(Relation::History, second.id)
                .await
                .unwrap(),
            1
        );
        assert_eq!(
            store
                .delete_entries(Relation::History, "u1", "5")
                .await
                .unwrap(),
            1
        );
        // deleting again is a harmless no-op
        assert_eq!(
            store
                .delete_entries(Relation::History, "u1", "5")
                .await
                .unwrap(),
            0
        );

        let remaining = store
            .list_entries(Relation::History, "u1", None)
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].video_id, "6");
    }

    #[tokio::test]
    async fn test_delete_playlist_removes_join_rows() {
        let store = test_store().await;
        let playlist = store.insert_playlist("u1", "Road trip", "").await.unwrap();
        store.insert_playlist_video(playlist.id, "1").await.unwrap();
        store.insert_playlist_video(playlist.id, "2").await.unwrap();

        assert!(store.delete_playlist(playlist.id).await.unwrap());
        assert!(store.get_playlist(playlist.id).await.unwrap().is_none());
        assert!(store
            .list_playlist_videos(playlist.id)
            .await
            .unwrap()
            .is_empty());

        // second delete reports nothing was there
        assert!(!store.delete_playlist(playlist.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_join_row_needs_existing_playlist() {
        let store = test_store().await;
        assert!(store.insert_playlist_video(999, "7").await.is_err());
        assert!(store.list_playlist_videos(999).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_playlist_videos_newest_first() {
        let store = test_store().await;
        let playlist = store.insert_playlist("u1", "Mix", "desc").await.unwrap();
        store.insert_playlist_video(playlist.id, "a").await.unwrap();
        store.insert_playlist_video(playlist.id, "b").await.unwrap();

        let rows = store.list_playlist_videos(playlist.id).await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.video_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);

        assert_eq!(
            store.delete_playlist_video(playlist.id, "a").await.unwrap(),
            1
        );
        assert!(store
            .find_playlist_video(playlist.id, "a")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_profile_upsert() {
        let store = test_store().await;
        assert!(store.get_profile("u1").await.unwrap().is_none());

        let stored = store
            .upsert_profile(
                "u1",
                Some("a@example.com"),
                &Profile {
                    full_name: "Ada".into(),
                    profile_picture: 3,
                },
            )
            .await
            .unwrap();
        assert_eq!(stored.full_name, "Ada");

        // update without email keeps the stored one
        store
            .upsert_profile(
                "u1",
                None,
                &Profile {
                    full_name: "Ada L.".into(),
                    profile_picture: 5,
                },
            )
            .await
            .unwrap();

        let profile = store.get_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.full_name, "Ada L.");
        assert_eq!(profile.profile_picture, 5);

        let email: (Option<String>,) = sqlx::query_as("SELECT email FROM users WHERE id = ?")
            .bind("u1")
            .fetch_one(&store.pool)
            .await
            .unwrap();
        assert_eq!(email.0.as_deref(), Some("a@example.com"));
    }
}
