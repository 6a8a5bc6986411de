use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::catalog::{canonical_category, CatalogClient, CatalogError, CatalogPage, Video, ALL_CATEGORY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedPhase {
    Idle,
    Loading,
    Loaded,
    Errored,
}

/// What the feed currently shows.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedState {
    /// Active filter; [`ALL_CATEGORY`] means the popular feed.
    pub category: String,
    /// Videos in catalog order, pages appended as they arrive.
    pub videos: Vec<Video>,
    /// Last page requested (1-based).
    pub page: u32,
    pub has_more: bool,
    pub is_loading: bool,
    pub error: Option<String>,
    pub phase: FeedPhase,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            category: ALL_CATEGORY.to_string(),
            videos: Vec::new(),
            page: 1,
            has_more: true,
            is_loading: false,
            error: None,
            phase: FeedPhase::Idle,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Another fetch for this feed is still outstanding.
    InFlight,
    /// The last page came back empty, or the last fetch failed.
    Exhausted,
}

/// Result of one feed action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadOutcome {
    Loaded { count: usize },
    Skipped(SkipReason),
    /// A newer `load`/`set_category` started while this fetch was out; its
    /// result was dropped.
    Stale,
    /// The fetch failed; the message is in [`FeedState::error`].
    Failed,
}

#[derive(Debug)]
struct Inner {
    state: FeedState,
    generation: u64,
    in_flight: bool,
}

/// Paginated, category-filtered video feed.
///
/// All operations take `&self`; share the store with an `Arc`. Every
/// `load`/`set_category` bumps a generation counter so a response that
/// arrives after the feed was reset is discarded instead of overwriting
/// newer state. `load_more` does nothing while a fetch is in flight.
pub struct FeedStore {
    catalog: CatalogClient,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for FeedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedStore")
            .field("state", &self.lock().state)
            .finish_non_exhaustive()
    }
}

impl FeedStore {
    pub fn new(catalog: CatalogClient) -> Self {
        Self {
            catalog,
            inner: Mutex::new(Inner {
                state: FeedState::default(),
                generation: 0,
                in_flight: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn snapshot(&self) -> FeedState {
        self.lock().state.clone()
    }

    /// Reset to the popular feed and fetch its first page.
    pub async fn load(&self) -> LoadOutcome {
        self.reset_and_fetch(ALL_CATEGORY.to_string()).await
    }

    /// Switch the filter and fetch page 1 of it.
    ///
    /// Known category names are matched case-insensitively; anything else is
    /// used as a free-text search.
    pub async fn set_category(&self, name: &str) -> LoadOutcome {
        let category = canonical_category(name)
            .map(str::to_string)
            .unwrap_or_else(|| name.trim().to_string());
        let category = if category.is_empty() {
            ALL_CATEGORY.to_string()
        } else {
            category
        };
        self.reset_and_fetch(category).await
    }

    /// Fetch the next page of the current filter and append it.
    pub async fn load_more(&self) -> LoadOutcome {
        let (generation, category, page) = {
            let mut inner = self.lock();
            if inner.in_flight {
                tracing::debug!("load_more ignored, fetch in flight");
                return LoadOutcome::Skipped(SkipReason::InFlight);
            }
            if !inner.state.has_more {
                return LoadOutcome::Skipped(SkipReason::Exhausted);
            }
            inner.in_flight = true;
            inner.state.is_loading = true;
            inner.state.phase = FeedPhase::Loading;
            (
                inner.generation,
                inner.state.category.clone(),
                inner.state.page + 1,
            )
        };

        let guard = InFlightGuard::new(&self.inner, generation);
        let result = self.fetch(&category, page).await;
        guard.disarm();

        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::debug!(category = %category, page = page, "Dropping stale feed page");
            return LoadOutcome::Stale;
        }
        inner.in_flight = false;
        apply(&mut inner.state, result, page, Mode::Append)
    }

    async fn reset_and_fetch(&self, category: String) -> LoadOutcome {
        let generation = {
            let mut inner = self.lock();
            inner.generation += 1;
            inner.in_flight = true;
            inner.state = FeedState {
                category: category.clone(),
                is_loading: true,
                phase: FeedPhase::Loading,
                ..FeedState::default()
            };
            inner.generation
        };

        let guard = InFlightGuard::new(&self.inner, generation);
        let result = self.fetch(&category, 1).await;
        guard.disarm();

        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::debug!(category = %category, "Dropping stale feed reset");
            return LoadOutcome::Stale;
        }
        inner.in_flight = false;
        apply(&mut inner.state, result, 1, Mode::Replace)
    }

    async fn fetch(&self, category: &str, page: u32) -> Result<CatalogPage, CatalogError> {
        if category == ALL_CATEGORY {
            self.catalog.fetch_popular(page).await
        } else {
            self.catalog.search(category, page).await
        }
    }
}

/// Releases the in-flight flag when a fetch future is dropped before it
/// completes, so a cancelled `load_more` does not block the next one.
struct InFlightGuard<'a> {
    inner: &'a Mutex<Inner>,
    generation: u64,
    armed: bool,
}

impl<'a> InFlightGuard<'a> {
    fn new(inner: &'a Mutex<Inner>, generation: u64) -> Self {
        Self {
            inner,
            generation,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        // a newer reset owns the flag now
        if inner.generation != self.generation {
            return;
        }
        tracing::debug!(generation = self.generation, "Feed fetch cancelled");
        inner.in_flight = false;
        inner.state.is_loading = false;
        inner.state.phase = if inner.state.videos.is_empty() {
            FeedPhase::Idle
        } else {
            FeedPhase::Loaded
        };
    }
}

enum Mode {
    Replace,
    Append,
}

/// Fold a fetch result into the state. The page cursor only moves when
/// `page_number` actually arrived.
fn apply(
    state: &mut FeedState,
    result: Result<CatalogPage, CatalogError>,
    page_number: u32,
    mode: Mode,
) -> LoadOutcome {
    state.is_loading = false;
    match result {
        Ok(page) => {
            let count = page.videos.len();
            state.page = page_number;
            // An empty page ends pagination; a short one does not
            state.has_more = !page.is_empty();
            match mode {
                Mode::Replace => state.videos = page.videos,
                Mode::Append => state.videos.extend(page.videos),
            }
            state.error = None;
            state.phase = FeedPhase::Loaded;
            tracing::debug!(
                category = %state.category,
                page = state.page,
                count = count,
                total = state.videos.len(),
                "Feed updated"
            );
            LoadOutcome::Loaded { count }
        }
        Err(e) => {
            tracing::warn!(category = %state.category, page = page_number, error = %e, "Feed fetch failed");
            state.error = Some(e.to_string());
            state.has_more = false;
            state.phase = FeedPhase::Errored;
            LoadOutcome::Failed
        }
    }
}
