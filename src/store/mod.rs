//! Stateful services the front end drives.
//!
//! Each store is constructed with its dependencies and owns its state behind
//! a mutex; share one with an `Arc`. Actions take `&self`, await the clients
//! and write the outcome back into state that callers read via `snapshot()`.
//!
//! - [`FeedStore`] - the paginated, category-filtered catalog feed
//! - [`CollectionStore`] - favourites, watch later and history views
//! - [`SessionStore`] - the signed-in identity and profile

mod collection;
mod feed;
mod notice;
mod session;

pub use collection::{CollectionStore, CollectionVideo, CollectionView};
pub use feed::{FeedPhase, FeedState, FeedStore, LoadOutcome, SkipReason};
pub use notice::{Notice, NoticeLevel};
pub use session::{SessionError, SessionSnapshot, SessionStore};
