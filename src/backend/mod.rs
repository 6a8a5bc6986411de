//! Storage boundary for user-owned data.
//!
//! [`UserDataStore`] is the only seam between the collection logic and where
//! rows actually live. Two implementations ship:
//!
//! - [`RestStore`] - the hosted backend-as-a-service, through its REST interface
//! - [`SqliteStore`] - a local SQLite file (also what the test suites use)
//!
//! Lookups that find nothing return `Ok(None)` or an empty `Vec`; only
//! transport and storage failures are errors.

mod rest;
mod sqlite;
mod types;

use async_trait::async_trait;

pub use rest::RestStore;
pub use sqlite::SqliteStore;
pub use types::{CollectionEntry, Playlist, PlaylistVideo, Profile, Relation, StoreError};

#[async_trait]
pub trait UserDataStore: Send + Sync {
    /// Short backend name for logs ("rest", "sqlite").
    fn name(&self) -> &'static str;

    /// Most recent entry of `relation` for this user and video.
    async fn find_entry(
        &self,
        relation: Relation,
        user_id: &str,
        video_id: &str,
    ) -> Result<Option<CollectionEntry>, StoreError>;

    async fn insert_entry(
        &self,
        relation: Relation,
        user_id: &str,
        video_id: &str,
    ) -> Result<CollectionEntry, StoreError>;

    /// Delete every entry of `relation` for this user and video; returns the
    /// number of rows removed.
    async fn delete_entries(
        &self,
        relation: Relation,
        user_id: &str,
        video_id: &str,
    ) -> Result<u64, StoreError>;

    async fn delete_entry_by_id(&self, relation: Relation, entry_id: i64)
        -> Result<u64, StoreError>;

    /// Entries of `relation` for the user, newest first.
    async fn list_entries(
        &self,
        relation: Relation,
        user_id: &str,
        limit: Option<u32>,
    ) -> Result<Vec<CollectionEntry>, StoreError>;

    async fn insert_playlist(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Playlist, StoreError>;

    /// Playlists owned by the user, oldest first.
    async fn list_playlists(&self, user_id: &str) -> Result<Vec<Playlist>, StoreError>;

    async fn get_playlist(&self, playlist_id: i64) -> Result<Option<Playlist>, StoreError>;

    async fn find_playlist_video(
        &self,
        playlist_id: i64,
        video_id: &str,
    ) -> Result<Option<PlaylistVideo>, StoreError>;

    async fn insert_playlist_video(
        &self,
        playlist_id: i64,
        video_id: &str,
    ) -> Result<PlaylistVideo, StoreError>;

    /// Join rows of a playlist, newest first.
    async fn list_playlist_videos(&self, playlist_id: i64)
        -> Result<Vec<PlaylistVideo>, StoreError>;

    async fn delete_playlist_video(
        &self,
        playlist_id: i64,
        video_id: &str,
    ) -> Result<u64, StoreError>;

    /// Delete a playlist and its join rows; returns whether the playlist existed.
    async fn delete_playlist(&self, playlist_id: i64) -> Result<bool, StoreError>;

    async fn get_profile(&self, user_id: &str) -> Result<Option<Profile>, StoreError>;

    /// Insert or update the user's profile row and return what was stored.
    async fn upsert_profile(
        &self,
        user_id: &str,
        email: Option<&str>,
        profile: &Profile,
    ) -> Result<Profile, StoreError>;
}
