use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;

use super::{
    CollectionError, PlaylistWithVideos, AVATAR_IDS, DESCRIPTION_MAX_LEN, MAX_PLAYLISTS,
    NAME_MAX_LEN,
};
use crate::backend::{
    CollectionEntry, Playlist, PlaylistVideo, Profile, Relation, UserDataStore,
};
use crate::catalog::{CatalogClient, Video};

/// Catalog lookups in flight at once when resolving stored ids.
const RESOLVE_CONCURRENCY: usize = 8;

/// Collection operations for a signed-in user.
///
/// Every operation takes the user id explicitly; nothing here knows about
/// sessions. Existence checks degrade to `false` on failure (the error is
/// logged), mutations return the error to the caller.
#[derive(Clone)]
pub struct CollectionClient {
    store: Arc<dyn UserDataStore>,
    catalog: CatalogClient,
}

impl std::fmt::Debug for CollectionClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionClient")
            .field("store", &self.store.name())
            .field("catalog", &self.catalog)
            .finish()
    }
}

impl CollectionClient {
    pub fn new(store: Arc<dyn UserDataStore>, catalog: CatalogClient) -> Self {
        Self { store, catalog }
    }

    // ========================================================================
    // Membership
    // ========================================================================

    pub async fn is_saved(&self, relation: Relation, user_id: &str, video_id: &str) -> bool {
        match self.store.find_entry(relation, user_id, video_id).await {
            Ok(entry) => entry.is_some(),
            Err(e) => {
                tracing::warn!(
                    relation = %relation,
                    video_id = %video_id,
                    error = %e,
                    "Membership check failed, treating as not saved"
                );
                false
            }
        }
    }

    pub async fn add(
        &self,
        relation: Relation,
        user_id: &str,
        video_id: &str,
    ) -> Result<CollectionEntry, CollectionError> {
        let entry = self.store.insert_entry(relation, user_id, video_id).await?;
        tracing::debug!(relation = %relation, video_id = %video_id, "Saved video");
        Ok(entry)
    }

    /// Remove every entry for the video; removing something absent is not an error.
    pub async fn remove(
        &self,
        relation: Relation,
        user_id: &str,
        video_id: &str,
    ) -> Result<u64, CollectionError> {
        let removed = self
            .store
            .delete_entries(relation, user_id, video_id)
            .await?;
        tracing::debug!(relation = %relation, video_id = %video_id, removed = removed, "Removed video");
        Ok(removed)
    }

    /// Delete a single history row by its entry id.
    pub async fn remove_history_entry(&self, entry_id: i64) -> Result<u64, CollectionError> {
        Ok(self
            .store
            .delete_entry_by_id(Relation::History, entry_id)
            .await?)
    }

    /// Record a view, unless the most recent history entry is already this video.
    ///
    /// Returns the inserted entry, or `None` when the insert was skipped.
    /// A failed read of the latest entry is logged and also skips the insert.
    pub async fn add_history(
        &self,
        user_id: &str,
        video_id: &str,
    ) -> Result<Option<CollectionEntry>, CollectionError> {
        let latest = match self
            .store
            .list_entries(Relation::History, user_id, Some(1))
            .await
        {
            Ok(entries) => entries.into_iter().next(),
            Err(e) => {
                tracing::warn!(error = %e, "Could not read latest history entry, skipping insert");
                return Ok(None);
            }
        };

        if latest.is_some_and(|entry| entry.video_id == video_id) {
            tracing::debug!(video_id = %video_id, "Repeat view, history unchanged");
            return Ok(None);
        }

        let entry = self
            .store
            .insert_entry(Relation::History, user_id, video_id)
            .await?;
        Ok(Some(entry))
    }

    /// Entries of `relation`, newest first.
    pub async fn list(
        &self,
        relation: Relation,
        user_id: &str,
    ) -> Result<Vec<CollectionEntry>, CollectionError> {
        Ok(self.store.list_entries(relation, user_id, None).await?)
    }

    /// Ids of every video in `relation`.
    pub async fn saved_ids(
        &self,
        relation: Relation,
        user_id: &str,
    ) -> Result<HashSet<String>, CollectionError> {
        let entries = self.store.list_entries(relation, user_id, None).await?;
        Ok(entries.into_iter().map(|e| e.video_id).collect())
    }

    // ========================================================================
    // Resolution
    // ========================================================================

    /// Pair each entry with its catalog record, keeping entry order.
    ///
    /// Entries whose video cannot be fetched are dropped.
    pub async fn resolve_entries(
        &self,
        entries: Vec<CollectionEntry>,
    ) -> Vec<(CollectionEntry, Video)> {
        self.resolve(entries, |e| e.video_id.as_str()).await
    }

    async fn resolve<T>(&self, items: Vec<T>, id_of: impl Fn(&T) -> &str) -> Vec<(T, Video)> {
        let lookups = items
            .iter()
            .map(|item| self.catalog.get_by_id(id_of(item)));
        let results: Vec<_> = stream::iter(lookups)
            .buffered(RESOLVE_CONCURRENCY)
            .collect()
            .await;

        items
            .into_iter()
            .zip(results)
            .filter_map(|(item, result)| match result {
                Ok(video) => Some((item, video)),
                Err(e) => {
                    tracing::warn!(video_id = %id_of(&item), error = %e, "Dropping unresolved video");
                    None
                }
            })
            .collect()
    }

    // ========================================================================
    // Playlists
    // ========================================================================

    /// Create a playlist after checking its fields and the per-user ceiling.
    ///
    /// Nothing is inserted when validation fails or the user already owns
    /// [`MAX_PLAYLISTS`]. The ceiling is checked with a read, then the insert
    /// follows, so two concurrent creates can both pass the check.
    pub async fn create_playlist(
        &self,
        user_id: &str,
        name: &str,
        description: &str,
    ) -> Result<Playlist, CollectionError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > NAME_MAX_LEN {
            return Err(CollectionError::InvalidName);
        }
        let description = description.trim();
        if description.chars().count() > DESCRIPTION_MAX_LEN {
            return Err(CollectionError::InvalidDescription);
        }

        let owned = self.store.list_playlists(user_id).await?;
        if owned.len() >= MAX_PLAYLISTS {
            tracing::info!(owned = owned.len(), "Playlist limit reached");
            return Err(CollectionError::PlaylistLimit);
        }

        let playlist = self
            .store
            .insert_playlist(user_id, name, description)
            .await?;
        tracing::info!(playlist_id = playlist.id, name = %playlist.name, "Created playlist");
        Ok(playlist)
    }

    pub async fn list_playlists_by_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Playlist>, CollectionError> {
        Ok(self.store.list_playlists(user_id).await?)
    }

    pub async fn is_video_in_playlist(&self, playlist_id: i64, video_id: &str) -> bool {
        match self.store.find_playlist_video(playlist_id, video_id).await {
            Ok(row) => row.is_some(),
            Err(e) => {
                tracing::warn!(
                    playlist_id = playlist_id,
                    video_id = %video_id,
                    error = %e,
                    "Playlist membership check failed"
                );
                false
            }
        }
    }

    /// The playlist, if it exists and `user_id` owns it.
    async fn owned_playlist(
        &self,
        user_id: &str,
        playlist_id: i64,
    ) -> Result<Playlist, CollectionError> {
        match self.store.get_playlist(playlist_id).await? {
            Some(playlist) if playlist.user_id == user_id => Ok(playlist),
            Some(_) => {
                tracing::warn!(playlist_id = playlist_id, "Playlist owned by another user");
                Err(CollectionError::PlaylistNotFound(playlist_id))
            }
            None => Err(CollectionError::PlaylistNotFound(playlist_id)),
        }
    }

    pub async fn add_video_to_playlist(
        &self,
        user_id: &str,
        playlist_id: i64,
        video_id: &str,
    ) -> Result<PlaylistVideo, CollectionError> {
        self.owned_playlist(user_id, playlist_id).await?;
        if self.is_video_in_playlist(playlist_id, video_id).await {
            return Err(CollectionError::AlreadyInPlaylist);
        }
        Ok(self
            .store
            .insert_playlist_video(playlist_id, video_id)
            .await?)
    }

    /// Delete one of the user's playlists and its videos. Returns whether it
    /// existed; another user's playlist reads as absent and is left alone.
    pub async fn delete_playlist(
        &self,
        user_id: &str,
        playlist_id: i64,
    ) -> Result<bool, CollectionError> {
        match self.owned_playlist(user_id, playlist_id).await {
            Ok(_) => Ok(self.store.delete_playlist(playlist_id).await?),
            Err(CollectionError::PlaylistNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub async fn delete_video_from_playlist(
        &self,
        user_id: &str,
        playlist_id: i64,
        video_id: &str,
    ) -> Result<u64, CollectionError> {
        self.owned_playlist(user_id, playlist_id).await?;
        Ok(self
            .store
            .delete_playlist_video(playlist_id, video_id)
            .await?)
    }

    /// The playlist and its videos, newest addition first.
    ///
    /// Videos the catalog no longer returns are left out.
    pub async fn get_playlist_with_videos(
        &self,
        playlist_id: i64,
    ) -> Result<PlaylistWithVideos, CollectionError> {
        let Some(playlist) = self.store.get_playlist(playlist_id).await? else {
            return Ok(PlaylistWithVideos::default());
        };

        let rows = self.store.list_playlist_videos(playlist_id).await?;
        let videos = self
            .resolve(rows, |r| r.video_id.as_str())
            .await
            .into_iter()
            .map(|(_, video)| video)
            .collect();

        Ok(PlaylistWithVideos {
            playlist: Some(playlist),
            videos,
        })
    }

    // ========================================================================
    // Profile
    // ========================================================================

    /// The stored profile, or an empty one for users who never saved one.
    pub async fn get_profile(&self, user_id: &str) -> Result<Profile, CollectionError> {
        Ok(self.store.get_profile(user_id).await?.unwrap_or_default())
    }

    pub async fn update_profile(
        &self,
        user_id: &str,
        email: Option<&str>,
        full_name: &str,
        avatar: u8,
    ) -> Result<Profile, CollectionError> {
        if avatar != 0 && !AVATAR_IDS.contains(&avatar) {
            return Err(CollectionError::InvalidAvatar(avatar));
        }
        let profile = Profile {
            full_name: full_name.trim().to_string(),
            profile_picture: avatar,
        };
        let stored = self.store.upsert_profile(user_id, email, &profile).await?;
        tracing::info!(avatar = stored.profile_picture, "Profile updated");
        Ok(stored)
    }
}
