//! Per-user collections: watch-later, favourites, history, playlists and
//! the display profile.
//!
//! [`CollectionClient`] pairs a [`UserDataStore`](crate::backend::UserDataStore)
//! with the catalog so stored video ids can be turned back into full
//! [`Video`](crate::catalog::Video) records.

mod client;

use thiserror::Error;

use crate::backend::{Playlist, StoreError};
use crate::catalog::Video;

pub use client::CollectionClient;

/// Most playlists a single user may own.
pub const MAX_PLAYLISTS: usize = 5;

pub const NAME_MAX_LEN: usize = 50;
pub const DESCRIPTION_MAX_LEN: usize = 200;

/// Selectable avatar ids. A stored 0 means none has been chosen.
pub const AVATAR_IDS: std::ops::RangeInclusive<u8> = 1..=6;

#[derive(Debug, Error)]
pub enum CollectionError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("You have reached the maximum number of playlists.")]
    PlaylistLimit,

    #[error("Playlist name must be 1 to {NAME_MAX_LEN} characters")]
    InvalidName,

    #[error("Playlist description must be at most {DESCRIPTION_MAX_LEN} characters")]
    InvalidDescription,

    /// No such playlist, or it belongs to another user.
    #[error("Playlist #{0} not found")]
    PlaylistNotFound(i64),

    #[error("Video is already in this playlist.")]
    AlreadyInPlaylist,

    #[error("Unknown avatar {0}")]
    InvalidAvatar(u8),
}

/// A playlist with its videos resolved from the catalog, newest first.
///
/// `playlist` is `None` when no playlist has that id; `videos` is then empty.
#[derive(Debug, Clone, Default)]
pub struct PlaylistWithVideos {
    pub playlist: Option<Playlist>,
    pub videos: Vec<Video>,
}
