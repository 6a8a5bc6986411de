//! Video catalog access.
//!
//! - [`client`] - paginated popular/search listings and single-id lookup
//! - [`model`] - normalized [`Video`] records built from raw catalog hits
//! - [`category`] - the static category list and tag-based labelling

mod category;
mod client;
mod model;

pub use category::{
    canonical_category, category_from_tags, ALL_CATEGORY, CATEGORIES, FALLBACK_CATEGORY,
};
pub use client::{CatalogClient, CatalogError, DEFAULT_BASE_URL, PAGE_SIZE};
pub use model::{CatalogPage, Rendition, Video};
