use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::feed::LoadOutcome;
use super::notice::Notice;
use super::session::SessionStore;
use crate::backend::Relation;
use crate::catalog::Video;
use crate::collections::CollectionClient;

/// A saved video together with the entry that saved it.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionVideo {
    pub entry_id: i64,
    pub saved_at: DateTime<Utc>,
    pub video: Video,
}

/// State behind the favourites, watch-later and history views.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectionView {
    /// Relation whose videos are in `videos`, if one has been fetched.
    pub relation: Option<Relation>,
    pub videos: Vec<CollectionVideo>,
    pub favourites: HashSet<String>,
    pub watch_later: HashSet<String>,
    pub is_loading: bool,
    pub error: Option<String>,
}

impl CollectionView {
    fn ids_mut(&mut self, relation: Relation) -> Option<&mut HashSet<String>> {
        match relation {
            Relation::Favourites => Some(&mut self.favourites),
            Relation::WatchLater => Some(&mut self.watch_later),
            Relation::History => None,
        }
    }
}

#[derive(Default)]
struct Inner {
    view: CollectionView,
    generation: u64,
}

/// The signed-in user's saved videos.
///
/// Membership sets give instant "already saved?" answers. Every add or
/// remove updates the set first, then calls the backend; on success the set
/// is re-read from the backend, on failure the local change is undone.
pub struct CollectionStore {
    client: CollectionClient,
    session: Arc<SessionStore>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CollectionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionStore")
            .field("view", &self.lock().view)
            .finish_non_exhaustive()
    }
}

impl CollectionStore {
    pub fn new(client: CollectionClient, session: Arc<SessionStore>) -> Self {
        Self {
            client,
            session,
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> CollectionView {
        self.lock().view.clone()
    }

    pub fn is_favourite(&self, video_id: &str) -> bool {
        self.lock().view.favourites.contains(video_id)
    }

    pub fn is_in_watch_later(&self, video_id: &str) -> bool {
        self.lock().view.watch_later.contains(video_id)
    }

    fn record_error(&self, message: &str) {
        self.lock().view.error = Some(message.to_string());
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    pub async fn fetch_favourites(&self) -> LoadOutcome {
        self.fetch(Relation::Favourites).await
    }

    pub async fn fetch_watch_later(&self) -> LoadOutcome {
        self.fetch(Relation::WatchLater).await
    }

    pub async fn fetch_history(&self) -> LoadOutcome {
        self.fetch(Relation::History).await
    }

    /// Read all three relations together, resolve the videos of `relation`
    /// and replace the view. The membership sets are refreshed as well.
    async fn fetch(&self, relation: Relation) -> LoadOutcome {
        let Some(user_id) = self.session.user_id() else {
            self.record_error(&Notice::login_required().message);
            return LoadOutcome::Failed;
        };

        let generation = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.view.is_loading = true;
            inner.view.error = None;
            inner.generation
        };

        let lists = futures::try_join!(
            self.client.list(Relation::Favourites, &user_id),
            self.client.list(Relation::WatchLater, &user_id),
            self.client.list(Relation::History, &user_id),
        );
        let (favourites, watch_later, history) = match lists {
            Ok(lists) => lists,
            Err(e) => {
                tracing::warn!(relation = %relation, error = %e, "Collection fetch failed");
                let mut inner = self.lock();
                if inner.generation == generation {
                    inner.view.is_loading = false;
                    inner.view.error = Some(e.to_string());
                }
                return LoadOutcome::Failed;
            }
        };

        let favourite_ids: HashSet<String> = favourites.iter().map(|e| e.video_id.clone()).collect();
        let watch_later_ids: HashSet<String> =
            watch_later.iter().map(|e| e.video_id.clone()).collect();
        let entries = match relation {
            Relation::Favourites => favourites,
            Relation::WatchLater => watch_later,
            Relation::History => history,
        };

        let videos: Vec<CollectionVideo> = self
            .client
            .resolve_entries(entries)
            .await
            .into_iter()
            .map(|(entry, video)| CollectionVideo {
                entry_id: entry.id,
                saved_at: entry.created_at,
                video,
            })
            .collect();
        let count = videos.len();

        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::debug!(relation = %relation, "Dropping stale collection fetch");
            return LoadOutcome::Stale;
        }
        inner.view = CollectionView {
            relation: Some(relation),
            videos,
            favourites: favourite_ids,
            watch_later: watch_later_ids,
            is_loading: false,
            error: None,
        };
        LoadOutcome::Loaded { count }
    }

    /// Refresh both membership sets without touching the video list.
    pub async fn sync_membership(&self) -> Result<(), Notice> {
        let user_id = self.session.user_id().ok_or_else(Notice::login_required)?;
        let sets = futures::try_join!(
            self.client.saved_ids(Relation::Favourites, &user_id),
            self.client.saved_ids(Relation::WatchLater, &user_id),
        );
        match sets {
            Ok((favourites, watch_later)) => {
                let mut inner = self.lock();
                inner.view.favourites = favourites;
                inner.view.watch_later = watch_later;
                Ok(())
            }
            Err(e) => {
                self.record_error(&e.to_string());
                Err(Notice::error(e.to_string()))
            }
        }
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Add to favourites. Already-favourite videos get a notice and no request.
    pub async fn toggle_favourite(&self, video_id: &str) -> Notice {
        self.add_to(Relation::Favourites, video_id).await
    }

    /// Add to watch later. Videos already there get a notice and no request.
    pub async fn toggle_watch_later(&self, video_id: &str) -> Notice {
        self.add_to(Relation::WatchLater, video_id).await
    }

    pub async fn remove_favourite(&self, video_id: &str) -> Notice {
        self.remove_from(Relation::Favourites, video_id).await
    }

    pub async fn remove_watch_later(&self, video_id: &str) -> Notice {
        self.remove_from(Relation::WatchLater, video_id).await
    }

    async fn add_to(&self, relation: Relation, video_id: &str) -> Notice {
        let Some(user_id) = self.session.user_id() else {
            return Notice::login_required();
        };

        {
            let mut inner = self.lock();
            let Some(ids) = inner.view.ids_mut(relation) else {
                return Notice::error(format!("Cannot add to {relation} directly"));
            };
            if !ids.insert(video_id.to_string()) {
                return Notice::error(format!("Video is already in {relation}"));
            }
        }

        match self.client.add(relation, &user_id, video_id).await {
            Ok(_) => {
                self.reconcile(relation, &user_id).await;
                Notice::success(format!("Video added to {relation}"))
            }
            Err(e) => {
                tracing::warn!(relation = %relation, video_id = %video_id, error = %e, "Add failed");
                let mut inner = self.lock();
                if let Some(ids) = inner.view.ids_mut(relation) {
                    ids.remove(video_id);
                }
                inner.view.error = Some(e.to_string());
                Notice::error(format!("Failed to add video to {relation}"))
            }
        }
    }

    async fn remove_from(&self, relation: Relation, video_id: &str) -> Notice {
        let Some(user_id) = self.session.user_id() else {
            return Notice::login_required();
        };

        let removed_videos = {
            let mut inner = self.lock();
            let Some(ids) = inner.view.ids_mut(relation) else {
                return Notice::error(format!("Cannot remove from {relation} by video"));
            };
            if !ids.remove(video_id) {
                return Notice::info(format!("Video is not in {relation}"));
            }
            if inner.view.relation == Some(relation) {
                let (removed, kept): (Vec<CollectionVideo>, Vec<CollectionVideo>) = std::mem::take(&mut inner.view.videos)
                    .into_iter()
                    .partition(|v| v.video.id == video_id);
                inner.view.videos = kept;
                removed
            } else {
                Vec::new()
            }
        };

        match self.client.remove(relation, &user_id, video_id).await {
            Ok(_) => {
                self.reconcile(relation, &user_id).await;
                Notice::success(format!("Video removed from {relation}"))
            }
            Err(e) => {
                tracing::warn!(relation = %relation, video_id = %video_id, error = %e, "Remove failed");
                let mut inner = self.lock();
                if let Some(ids) = inner.view.ids_mut(relation) {
                    ids.insert(video_id.to_string());
                }
                if inner.view.relation == Some(relation) && !removed_videos.is_empty() {
                    inner.view.videos.extend(removed_videos);
                    inner.view.videos.sort_by(|a, b| {
                        b.saved_at.cmp(&a.saved_at).then(b.entry_id.cmp(&a.entry_id))
                    });
                }
                inner.view.error = Some(e.to_string());
                Notice::error(format!("Failed to remove video from {relation}"))
            }
        }
    }

    /// Delete one history row and drop it from the view.
    pub async fn delete_history_entry(&self, entry_id: i64) -> Notice {
        if !self.session.is_signed_in() {
            return Notice::login_required();
        }

        match self.client.remove_history_entry(entry_id).await {
            Ok(_) => {
                let mut inner = self.lock();
                if inner.view.relation == Some(Relation::History) {
                    inner.view.videos.retain(|v| v.entry_id != entry_id);
                }
                Notice::success("Video removed from history")
            }
            Err(e) => {
                tracing::warn!(entry_id = entry_id, error = %e, "History delete failed");
                self.record_error(&e.to_string());
                Notice::error("Failed to remove video from history")
            }
        }
    }

    /// Note that the user watched `video_id`. Does nothing when signed out.
    pub async fn record_view(&self, video_id: &str) {
        let Some(user_id) = self.session.user_id() else {
            return;
        };
        if let Err(e) = self.client.add_history(&user_id, video_id).await {
            tracing::warn!(video_id = %video_id, error = %e, "Could not record view");
        }
    }

    /// Replace the local set for `relation` with the backend's view of it.
    async fn reconcile(&self, relation: Relation, user_id: &str) {
        match self.client.saved_ids(relation, user_id).await {
            Ok(ids) => {
                let mut inner = self.lock();
                if let Some(local) = inner.view.ids_mut(relation) {
                    if *local != ids {
                        tracing::debug!(relation = %relation, "Local membership drifted, replaced");
                    }
                    *local = ids;
                }
            }
            Err(e) => {
                tracing::warn!(relation = %relation, error = %e, "Could not reconcile membership");
            }
        }
    }
}
